use coreg_core::{CoregError, CoregResult};
use image::GrayImage;

/// Bresenham circle of radius 3, clockwise from 12 o'clock
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Corner found by the segment test, in the coordinates of the scanned image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// FAST segment-test corner detector
#[derive(Debug, Clone)]
pub struct FastDetector {
    threshold: u8,
    arc_length: u32,
}

impl FastDetector {
    /// `arc_length` contiguous circle pixels must all be brighter or all darker
    /// than the centre by more than `threshold`.
    pub fn new(threshold: u8, arc_length: u32) -> CoregResult<Self> {
        if threshold == 0 || threshold > 127 {
            return Err(CoregError::InvalidParameter {
                name: "fast_threshold",
                reason: format!("{} (must be 1-127)", threshold),
            });
        }
        if !(9..=12).contains(&arc_length) {
            return Err(CoregError::InvalidParameter {
                name: "arc_length",
                reason: format!("{} (must be 9-12)", arc_length),
            });
        }
        Ok(Self {
            threshold,
            arc_length,
        })
    }

    /// Detect corners at least `border` pixels away from the image edge,
    /// non-maximum suppressed over a 3x3 neighbourhood.
    pub fn detect(&self, img: &GrayImage, border: u32) -> Vec<Corner> {
        let (width, height) = img.dimensions();
        let border = border.max(4);
        if width <= 2 * border || height <= 2 * border {
            return Vec::new();
        }

        let scores = self.score_map(img, border);
        let w = width as usize;
        let mut corners = Vec::new();

        for y in border..height - border {
            for x in border..width - border {
                let idx = y as usize * w + x as usize;
                let s = scores[idx];
                if s > 0.0 && Self::is_local_max(&scores, w, idx, s) {
                    corners.push(Corner { x, y, score: s });
                }
            }
        }

        corners
    }

    /// Segment-test score for every pixel, zero where there is no corner
    fn score_map(&self, img: &GrayImage, border: u32) -> Vec<f32> {
        let (width, height) = img.dimensions();
        let mut scores = vec![0.0f32; (width * height) as usize];
        let raw = img.as_raw();
        let w = width as i32;
        let offsets: Vec<i32> = CIRCLE.iter().map(|&(dx, dy)| dy * w + dx).collect();

        // One pixel of margin around the detection window keeps NMS honest at the border.
        let lo = border - 1;
        for y in lo..(height - lo) {
            for x in lo..(width - lo) {
                let idx = (y * width + x) as usize;
                scores[idx] = self.corner_score(raw, idx as i32, &offsets);
            }
        }

        scores
    }

    fn corner_score(&self, raw: &[u8], idx: i32, offsets: &[i32]) -> f32 {
        let center = raw[idx as usize] as i32;
        let t = self.threshold as i32;
        let ring = |i: usize| raw[(idx + offsets[i]) as usize] as i32;

        // Any arc of 9 or more covers at least two of the four compass points.
        let compass = [ring(0), ring(4), ring(8), ring(12)];
        let bright_compass = compass.iter().filter(|&&v| v > center + t).count();
        let dark_compass = compass.iter().filter(|&&v| v < center - t).count();
        if bright_compass < 2 && dark_compass < 2 {
            return 0.0;
        }

        let mut bright_mask = 0u16;
        let mut dark_mask = 0u16;
        let mut bright_sum = 0i32;
        let mut dark_sum = 0i32;
        for i in 0..16 {
            let v = ring(i);
            if v > center + t {
                bright_mask |= 1 << i;
                bright_sum += v - center - t;
            } else if v < center - t {
                dark_mask |= 1 << i;
                dark_sum += center - t - v;
            }
        }

        let mut score = 0;
        if has_arc(bright_mask, self.arc_length) {
            score = bright_sum;
        }
        if has_arc(dark_mask, self.arc_length) {
            score = score.max(dark_sum);
        }
        score as f32
    }

    /// Strictly greater than earlier neighbours, not smaller than later ones,
    /// so plateaus keep exactly one corner.
    fn is_local_max(scores: &[f32], w: usize, idx: usize, s: f32) -> bool {
        let before = [idx - w - 1, idx - w, idx - w + 1, idx - 1];
        let after = [idx + 1, idx + w - 1, idx + w, idx + w + 1];
        before.iter().all(|&n| s > scores[n]) && after.iter().all(|&n| s >= scores[n])
    }
}

/// True when `mask` has a run of at least `len` set bits on the 16-bit circle
fn has_arc(mask: u16, len: u32) -> bool {
    if mask.count_ones() < len {
        return false;
    }
    let mut run = mask;
    for i in 1..len {
        run &= mask.rotate_left(i);
        if run == 0 {
            return false;
        }
    }
    true
}

/// Intensity-centroid orientation over a disc of `radius` pixels, in radians
pub fn intensity_centroid_angle(img: &GrayImage, x: u32, y: u32, radius: i32) -> f32 {
    let (width, height) = img.dimensions();
    let mut m10 = 0i64;
    let mut m01 = 0i64;
    let r2 = radius * radius;

    for v in -radius..=radius {
        let py = y as i32 + v;
        if py < 0 || py >= height as i32 {
            continue;
        }
        for u in -radius..=radius {
            let px = x as i32 + u;
            if u * u + v * v > r2 || px < 0 || px >= width as i32 {
                continue;
            }
            let intensity = img.get_pixel(px as u32, py as u32)[0] as i64;
            m10 += u as i64 * intensity;
            m01 += v as i64 * intensity;
        }
    }

    if m10 == 0 && m01 == 0 {
        0.0
    } else {
        (m01 as f32).atan2(m10 as f32)
    }
}
