use coreg_core::{BinaryDescriptor, CoregError, CoregResult, BINARY_DESCRIPTOR_LEN};
use image::GrayImage;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

const N_PAIRS: usize = BINARY_DESCRIPTOR_LEN * 8;

/// Largest offset of a test point from the keypoint, before rotation
pub const PATTERN_EXTENT: i32 = 13;

/// Steered BRIEF sampling pattern: 256 intensity comparisons around a keypoint.
#[derive(Debug, Clone)]
pub struct BriefPattern {
    pairs: Vec<[(f32, f32); 2]>,
}

impl BriefPattern {
    /// Draw the test pairs from an isotropic Gaussian (sigma = patch_size / 5)
    /// clamped to the pattern extent. The same seed always yields the same
    /// pattern, which is what makes descriptors comparable across images.
    pub fn generate(patch_size: u32, seed: u64) -> CoregResult<Self> {
        let sigma = patch_size as f32 / 5.0;
        // Below one pixel nearly every pair rounds onto the keypoint itself.
        let normal = Normal::new(0.0f32, sigma)
            .ok()
            .filter(|_| sigma >= 1.0)
            .ok_or_else(|| CoregError::InvalidParameter {
                name: "patch_size",
                reason: format!("{} (must be >= 5)", patch_size),
            })?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut coord = || {
            normal
                .sample(&mut rng)
                .round()
                .clamp(-PATTERN_EXTENT as f32, PATTERN_EXTENT as f32)
        };

        let mut pairs = Vec::with_capacity(N_PAIRS);
        while pairs.len() < N_PAIRS {
            let a = (coord(), coord());
            let b = (coord(), coord());
            if a != b {
                pairs.push([a, b]);
            }
        }

        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Compute the descriptor of the keypoint at (`cx`, `cy`) with orientation
    /// `angle` on an already smoothed image.
    pub fn describe(&self, smoothed: &GrayImage, cx: f32, cy: f32, angle: f32) -> BinaryDescriptor {
        let (s, c) = angle.sin_cos();
        let mut d = [0u8; BINARY_DESCRIPTOR_LEN];

        for (i, [(x1, y1), (x2, y2)]) in self.pairs.iter().enumerate() {
            let (rx1, ry1) = (cx + c * x1 - s * y1, cy + s * x1 + c * y1);
            let (rx2, ry2) = (cx + c * x2 - s * y2, cy + s * x2 + c * y2);

            let bit = (bilinear_sample(smoothed, rx1, ry1) < bilinear_sample(smoothed, rx2, ry2)) as u8;
            d[i / 8] |= bit << (i % 8);
        }
        d
    }
}

/// Bilinear interpolation for subpixel sampling, clamped at the image border
pub fn bilinear_sample(img: &GrayImage, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let dx = x - x0;
    let dy = y - y0;

    let x0i = x0 as u32;
    let y0i = y0 as u32;
    let x1i = (x0i + 1).min(w - 1);
    let y1i = (y0i + 1).min(h - 1);

    let p00 = img.get_pixel(x0i, y0i)[0] as f32;
    let p10 = img.get_pixel(x1i, y0i)[0] as f32;
    let p01 = img.get_pixel(x0i, y1i)[0] as f32;
    let p11 = img.get_pixel(x1i, y1i)[0] as f32;

    let top = p00 * (1.0 - dx) + p10 * dx;
    let bottom = p01 * (1.0 - dx) + p11 * dx;
    top * (1.0 - dy) + bottom * dy
}
