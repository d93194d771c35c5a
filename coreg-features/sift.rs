//! Scale-invariant feature transform.
//!
//! Difference-of-Gaussians extrema are refined to sub-pixel and sub-scale
//! accuracy, filtered for low contrast and edge responses, assigned one or more
//! dominant gradient orientations and described by a 4x4 grid of 8-bin
//! gradient orientation histograms.

use std::f32::consts::{SQRT_2, TAU};

use coreg_core::{ensure_non_empty, CoregError, CoregResult, Descriptors, DetectorMode, FloatDescriptor, Keypoint};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;

use crate::{FeatureExtractor, Features};

type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Blur assumed to be present in the input image
const INPUT_BLUR: f32 = 0.5;
/// Extrema closer than this to an octave's edge are ignored
const IMG_BORDER: i32 = 5;
const MAX_INTERP_STEPS: usize = 5;
const MIN_OCTAVE_SIZE: u32 = 16;
const MAX_OCTAVES: usize = 8;

const ORI_HIST_BINS: usize = 36;
const ORI_SIG_FACTOR: f32 = 1.5;
const ORI_RADIUS_FACTOR: f32 = 3.0 * ORI_SIG_FACTOR;
const ORI_PEAK_RATIO: f32 = 0.8;

const DESCR_WIDTH: usize = 4;
const DESCR_HIST_BINS: usize = 8;
const DESCR_SCALE_FACTOR: f32 = 3.0;
const DESCR_MAG_THRESHOLD: f32 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct SiftConfig {
    pub max_features: usize,
    pub scales_per_octave: usize,
    /// Blur of the first scale of every octave, in octave pixels
    pub sigma: f32,
    pub contrast_threshold: f32,
    /// Maximum ratio of principal curvatures
    pub edge_threshold: f32,
}

impl Default for SiftConfig {
    fn default() -> Self {
        Self {
            max_features: 10_000,
            scales_per_octave: 3,
            sigma: 1.6,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
        }
    }
}

impl SiftConfig {
    pub fn validate(&self) -> CoregResult<()> {
        if self.max_features == 0 {
            return Err(CoregError::InvalidParameter {
                name: "max_features",
                reason: "must be > 0".to_string(),
            });
        }
        if self.scales_per_octave == 0 {
            return Err(CoregError::InvalidParameter {
                name: "scales_per_octave",
                reason: "must be > 0".to_string(),
            });
        }
        if !(self.sigma > INPUT_BLUR) {
            return Err(CoregError::InvalidParameter {
                name: "sigma",
                reason: format!("{} (must exceed the assumed input blur {})", self.sigma, INPUT_BLUR),
            });
        }
        if !(self.edge_threshold > 1.0) {
            return Err(CoregError::InvalidParameter {
                name: "edge_threshold",
                reason: format!("{} (must be > 1)", self.edge_threshold),
            });
        }
        Ok(())
    }
}

struct Octave {
    gaussians: Vec<FloatImage>,
    dogs: Vec<Vec<f32>>,
    width: i32,
    height: i32,
    /// Size of one octave pixel in input pixels
    spacing: f32,
}

impl Octave {
    #[inline]
    fn dog(&self, layer: i32, x: i32, y: i32) -> f32 {
        self.dogs[layer as usize][(y * self.width + x) as usize]
    }

    #[inline]
    fn gaussian(&self, layer: usize, x: i32, y: i32) -> f32 {
        self.gaussians[layer].as_raw()[(y * self.width + x) as usize]
    }
}

/// Refined scale-space extremum
struct Extremum {
    x: i32,
    y: i32,
    layer: i32,
    offset: [f32; 3],
    response: f32,
}

/// Oriented keypoint waiting for its descriptor
struct Candidate {
    keypoint: Keypoint,
    octave: usize,
    layer: usize,
    x: i32,
    y: i32,
    /// Scale in octave pixels
    sigma: f32,
}

#[derive(Debug, Clone)]
pub struct SiftExtractor {
    config: SiftConfig,
}

impl SiftExtractor {
    pub fn new(config: SiftConfig) -> CoregResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_max_features(max_features: usize) -> CoregResult<Self> {
        Self::new(SiftConfig {
            max_features,
            ..SiftConfig::default()
        })
    }

    fn build_octaves(&self, img: &GrayImage) -> Vec<Octave> {
        let cfg = &self.config;
        let s = cfg.scales_per_octave;
        let (w, h) = img.dimensions();

        let base: FloatImage = ImageBuffer::from_fn(w, h, |x, y| Luma([img.get_pixel(x, y)[0] as f32 / 255.0]));
        let initial = (cfg.sigma * cfg.sigma - INPUT_BLUR * INPUT_BLUR).max(0.01).sqrt();
        let mut seed = gaussian_blur_f32(&base, initial);

        let k = 2f32.powf(1.0 / s as f32);
        let increments: Vec<f32> = (1..s + 3)
            .map(|i| {
                let prev = cfg.sigma * k.powi(i as i32 - 1);
                let total = prev * k;
                (total * total - prev * prev).sqrt()
            })
            .collect();

        let mut n_octaves = 0;
        let mut side = seed.width().min(seed.height());
        while side >= MIN_OCTAVE_SIZE && n_octaves < MAX_OCTAVES {
            n_octaves += 1;
            side /= 2;
        }

        let mut octaves = Vec::with_capacity(n_octaves.max(1));
        for o in 0..n_octaves.max(1) {
            let (ow, oh) = seed.dimensions();
            let mut gaussians = Vec::with_capacity(s + 3);
            gaussians.push(seed);
            for &inc in &increments {
                let next = gaussian_blur_f32(&gaussians[gaussians.len() - 1], inc);
                gaussians.push(next);
            }

            let dogs: Vec<Vec<f32>> = gaussians
                .windows(2)
                .map(|pair| {
                    pair[1]
                        .as_raw()
                        .iter()
                        .zip(pair[0].as_raw())
                        .map(|(b, a)| b - a)
                        .collect::<Vec<f32>>()
                })
                .collect();

            // Scale 2*sigma of this octave seeds the next one at half resolution.
            let src = &gaussians[s];
            seed = ImageBuffer::from_fn((ow / 2).max(1), (oh / 2).max(1), |x, y| *src.get_pixel(2 * x, 2 * y));

            octaves.push(Octave {
                gaussians,
                dogs,
                width: ow as i32,
                height: oh as i32,
                spacing: (1u32 << o) as f32,
            });
        }

        octaves
    }

    fn find_extrema(&self, octave: &Octave, octave_idx: usize, out: &mut Vec<Candidate>) {
        let s = self.config.scales_per_octave;
        let threshold = 0.5 * self.config.contrast_threshold / s as f32;
        let (w, h) = (octave.width, octave.height);
        if w <= 2 * IMG_BORDER || h <= 2 * IMG_BORDER {
            return;
        }

        for layer in 1..=s {
            let (prev, cur, next) = (
                octave.dogs[layer - 1].as_slice(),
                octave.dogs[layer].as_slice(),
                octave.dogs[layer + 1].as_slice(),
            );
            for y in IMG_BORDER..h - IMG_BORDER {
                for x in IMG_BORDER..w - IMG_BORDER {
                    let idx = (y * w + x) as usize;
                    let v = cur[idx];
                    if v.abs() <= threshold || !is_extremum([prev, cur, next], idx, w as usize, v) {
                        continue;
                    }
                    if let Some(ext) = self.localize(octave, layer as i32, x, y) {
                        self.orient(octave, octave_idx, &ext, out);
                    }
                }
            }
        }
    }

    /// Iterative quadratic fit of the DoG around a discrete extremum
    fn localize(&self, octave: &Octave, layer: i32, x: i32, y: i32) -> Option<Extremum> {
        let s = self.config.scales_per_octave as i32;
        let (w, h) = (octave.width, octave.height);
        let (mut x, mut y, mut layer) = (x, y, layer);
        let mut offset = [0.0f32; 3];
        let mut converged = false;

        for _ in 0..MAX_INTERP_STEPS {
            let (grad, hess) = derivatives(octave, layer, x, y);
            let step = solve3(&hess, &grad)?;
            offset = [-step[0], -step[1], -step[2]];

            if offset.iter().all(|v| v.abs() < 0.5) {
                converged = true;
                break;
            }
            if offset.iter().any(|v| v.abs() > (w.max(h)) as f32) {
                return None;
            }

            x += offset[0].round() as i32;
            y += offset[1].round() as i32;
            layer += offset[2].round() as i32;
            if layer < 1 || layer > s || x < IMG_BORDER || x >= w - IMG_BORDER || y < IMG_BORDER || y >= h - IMG_BORDER {
                return None;
            }
        }
        if !converged {
            return None;
        }

        let (grad, hess) = derivatives(octave, layer, x, y);
        let contrast = octave.dog(layer, x, y) + 0.5 * (grad[0] * offset[0] + grad[1] * offset[1] + grad[2] * offset[2]);
        if contrast.abs() * (s as f32) < self.config.contrast_threshold {
            return None;
        }

        // Reject edge-like responses: ratio of principal curvatures
        let (dxx, dyy, dxy) = (hess[0][0], hess[1][1], hess[0][1]);
        let trace = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let r = self.config.edge_threshold;
        if det <= 0.0 || trace * trace * r >= (r + 1.0) * (r + 1.0) * det {
            return None;
        }

        Some(Extremum {
            x,
            y,
            layer,
            offset,
            response: contrast.abs(),
        })
    }

    /// Emit one candidate per dominant gradient orientation
    fn orient(&self, octave: &Octave, octave_idx: usize, ext: &Extremum, out: &mut Vec<Candidate>) {
        let s = self.config.scales_per_octave as f32;
        let sigma = self.config.sigma * 2f32.powf((ext.layer as f32 + ext.offset[2]) / s);
        let layer = ext.layer as usize;

        let radius = (ORI_RADIUS_FACTOR * sigma).round() as i32;
        let exp_scale = -1.0 / (2.0 * (ORI_SIG_FACTOR * sigma).powi(2));
        let mut hist = [0.0f32; ORI_HIST_BINS];

        for i in -radius..=radius {
            let py = ext.y + i;
            if py <= 0 || py >= octave.height - 1 {
                continue;
            }
            for j in -radius..=radius {
                let px = ext.x + j;
                if px <= 0 || px >= octave.width - 1 {
                    continue;
                }
                let dx = octave.gaussian(layer, px + 1, py) - octave.gaussian(layer, px - 1, py);
                let dy = octave.gaussian(layer, px, py + 1) - octave.gaussian(layer, px, py - 1);
                let weight = (((i * i + j * j) as f32) * exp_scale).exp();
                let bin = ((dy.atan2(dx) / TAU) * ORI_HIST_BINS as f32).round() as i32;
                hist[bin.rem_euclid(ORI_HIST_BINS as i32) as usize] += weight * (dx * dx + dy * dy).sqrt();
            }
        }

        let hist = smooth_histogram(&hist);
        let max = hist.iter().cloned().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return;
        }

        let keypoint = Keypoint {
            x: (ext.x as f32 + ext.offset[0]) * octave.spacing,
            y: (ext.y as f32 + ext.offset[1]) * octave.spacing,
            size: 2.0 * sigma * octave.spacing,
            angle: 0.0,
            response: ext.response,
            octave: octave_idx as i32,
        };

        for i in 0..ORI_HIST_BINS {
            let left = hist[(i + ORI_HIST_BINS - 1) % ORI_HIST_BINS];
            let right = hist[(i + 1) % ORI_HIST_BINS];
            let c = hist[i];
            if c > left && c > right && c >= ORI_PEAK_RATIO * max {
                let bin = i as f32 + 0.5 * (left - right) / (left - 2.0 * c + right);
                let angle = (bin * TAU / ORI_HIST_BINS as f32).rem_euclid(TAU);
                out.push(Candidate {
                    keypoint: Keypoint { angle, ..keypoint },
                    octave: octave_idx,
                    layer,
                    x: ext.x,
                    y: ext.y,
                    sigma,
                });
            }
        }
    }

    fn describe(&self, octave: &Octave, c: &Candidate) -> FloatDescriptor {
        let d = DESCR_WIDTH as f32;
        let n = DESCR_HIST_BINS;
        let hist_width = DESCR_SCALE_FACTOR * c.sigma;
        let max_radius = (octave.width as f32).hypot(octave.height as f32);
        let radius = (hist_width * SQRT_2 * (d + 1.0) * 0.5).round().min(max_radius) as i32;

        let (sin_t, cos_t) = c.keypoint.angle.sin_cos();
        let (sin_t, cos_t) = (sin_t / hist_width, cos_t / hist_width);
        let bins_per_rad = n as f32 / TAU;
        let exp_scale = -1.0 / (d * d * 0.5);

        let mut hist = [0.0f32; DESCR_WIDTH * DESCR_WIDTH * DESCR_HIST_BINS];

        for i in -radius..=radius {
            for j in -radius..=radius {
                // Sample offset expressed in the keypoint frame, in histogram cells
                let x_rot = j as f32 * cos_t + i as f32 * sin_t;
                let y_rot = -(j as f32) * sin_t + i as f32 * cos_t;
                let rbin = y_rot + d / 2.0 - 0.5;
                let cbin = x_rot + d / 2.0 - 0.5;
                if rbin <= -1.0 || rbin >= d || cbin <= -1.0 || cbin >= d {
                    continue;
                }

                let (px, py) = (c.x + j, c.y + i);
                if px <= 0 || px >= octave.width - 1 || py <= 0 || py >= octave.height - 1 {
                    continue;
                }

                let dx = octave.gaussian(c.layer, px + 1, py) - octave.gaussian(c.layer, px - 1, py);
                let dy = octave.gaussian(c.layer, px, py + 1) - octave.gaussian(c.layer, px, py - 1);
                let ori = (dy.atan2(dx) - c.keypoint.angle).rem_euclid(TAU);
                let weight = ((x_rot * x_rot + y_rot * y_rot) * exp_scale).exp();
                let value = (dx * dx + dy * dy).sqrt() * weight;

                trilinear_add(&mut hist, rbin, cbin, ori * bins_per_rad, value);
            }
        }

        normalize_descriptor(&mut hist);
        hist
    }
}

impl FeatureExtractor for SiftExtractor {
    fn mode(&self) -> DetectorMode {
        DetectorMode::ScaleInvariant
    }

    fn detect_and_describe(&self, img: &GrayImage) -> CoregResult<Features> {
        ensure_non_empty(img)?;
        let octaves = self.build_octaves(img);

        let mut candidates = Vec::new();
        for (o, octave) in octaves.iter().enumerate() {
            self.find_extrema(octave, o, &mut candidates);
        }
        let found = candidates.len();

        // Stable: equal responses keep detection order.
        candidates.sort_by(|a, b| b.keypoint.response.total_cmp(&a.keypoint.response));
        candidates.truncate(self.config.max_features);

        let descriptors = candidates.iter().map(|c| self.describe(&octaves[c.octave], c)).collect();
        let keypoints = candidates.into_iter().map(|c| c.keypoint).collect();
        let features = Features::new(keypoints, Descriptors::Float(descriptors));

        log::debug!(
            "SIFT: {} octaves, {} oriented keypoints, kept {}",
            octaves.len(),
            found,
            features.len()
        );
        Ok(features)
    }
}

fn is_extremum(planes: [&[f32]; 3], idx: usize, w: usize, v: f32) -> bool {
    let rows = [idx - w, idx, idx + w];
    for (p, plane) in planes.iter().enumerate() {
        for &row in &rows {
            for n in row - 1..=row + 1 {
                if p == 1 && n == idx {
                    continue;
                }
                let other = plane[n];
                if (v > 0.0 && other > v) || (v < 0.0 && other < v) {
                    return false;
                }
            }
        }
    }
    true
}

/// Gradient and Hessian of the DoG in (x, y, scale) by central differences
fn derivatives(o: &Octave, l: i32, x: i32, y: i32) -> ([f32; 3], [[f32; 3]; 3]) {
    let v2 = 2.0 * o.dog(l, x, y);

    let dx = (o.dog(l, x + 1, y) - o.dog(l, x - 1, y)) * 0.5;
    let dy = (o.dog(l, x, y + 1) - o.dog(l, x, y - 1)) * 0.5;
    let ds = (o.dog(l + 1, x, y) - o.dog(l - 1, x, y)) * 0.5;

    let dxx = o.dog(l, x + 1, y) + o.dog(l, x - 1, y) - v2;
    let dyy = o.dog(l, x, y + 1) + o.dog(l, x, y - 1) - v2;
    let dss = o.dog(l + 1, x, y) + o.dog(l - 1, x, y) - v2;
    let dxy = (o.dog(l, x + 1, y + 1) - o.dog(l, x - 1, y + 1) - o.dog(l, x + 1, y - 1) + o.dog(l, x - 1, y - 1)) * 0.25;
    let dxs = (o.dog(l + 1, x + 1, y) - o.dog(l + 1, x - 1, y) - o.dog(l - 1, x + 1, y) + o.dog(l - 1, x - 1, y)) * 0.25;
    let dys = (o.dog(l + 1, x, y + 1) - o.dog(l + 1, x, y - 1) - o.dog(l - 1, x, y + 1) + o.dog(l - 1, x, y - 1)) * 0.25;

    ([dx, dy, ds], [[dxx, dxy, dxs], [dxy, dyy, dys], [dxs, dys, dss]])
}

/// Solve `m * x = b` by Cramer's rule
fn solve3(m: &[[f32; 3]; 3], b: &[f32; 3]) -> Option<[f32; 3]> {
    let m: [[f64; 3]; 3] = m.map(|row| row.map(f64::from));
    let b = b.map(f64::from);
    let det3 = |a: &[[f64; 3]; 3]| {
        a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1]) - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
            + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0])
    };

    let det = det3(&m);
    if det == 0.0 || !det.is_finite() {
        return None;
    }

    let mut x = [0.0f32; 3];
    for (col, xi) in x.iter_mut().enumerate() {
        let mut mc = m;
        for row in 0..3 {
            mc[row][col] = b[row];
        }
        *xi = (det3(&mc) / det) as f32;
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Circular [1, 4, 6, 4, 1] / 16 smoothing
fn smooth_histogram(hist: &[f32; ORI_HIST_BINS]) -> [f32; ORI_HIST_BINS] {
    let n = ORI_HIST_BINS;
    let mut out = [0.0f32; ORI_HIST_BINS];
    for (i, o) in out.iter_mut().enumerate() {
        *o = (hist[(i + n - 2) % n] + hist[(i + 2) % n]) * (1.0 / 16.0)
            + (hist[(i + n - 1) % n] + hist[(i + 1) % n]) * (4.0 / 16.0)
            + hist[i] * (6.0 / 16.0);
    }
    out
}

/// Spread `value` over the 8 neighbouring (row, col, orientation) cells
fn trilinear_add(hist: &mut [f32], rbin: f32, cbin: f32, obin: f32, value: f32) {
    let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
    let (dr, dc, dob) = (rbin - r0, cbin - c0, obin - o0);
    let (r0, c0, o0) = (r0 as i32, c0 as i32, o0 as i32);
    let w = DESCR_WIDTH as i32;
    let n = DESCR_HIST_BINS as i32;

    for (r, wr) in [(r0, 1.0 - dr), (r0 + 1, dr)] {
        if r < 0 || r >= w {
            continue;
        }
        for (c, wc) in [(c0, 1.0 - dc), (c0 + 1, dc)] {
            if c < 0 || c >= w {
                continue;
            }
            for (o, wo) in [(o0, 1.0 - dob), (o0 + 1, dob)] {
                let bin = ((r * w + c) * n + o.rem_euclid(n)) as usize;
                hist[bin] += value * wr * wc * wo;
            }
        }
    }
}

/// Unit-normalize, clip large components and renormalize
fn normalize_descriptor(hist: &mut [f32]) {
    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return;
    }
    let clip = DESCR_MAG_THRESHOLD * norm;
    for v in hist.iter_mut() {
        *v = v.min(clip);
    }
    let norm = hist.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
    for v in hist.iter_mut() {
        *v /= norm;
    }
}
