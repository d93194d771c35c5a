use coreg_core::{ensure_non_empty, CoregError, CoregResult, DescriptorKind, Descriptors, DetectorMode, Keypoint};
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;

use crate::brief::{BriefPattern, PATTERN_EXTENT};
use crate::fast::{intensity_centroid_angle, FastDetector};
use crate::pyramid::ImagePyramid;
use crate::{FeatureExtractor, Features};

/// ORB detector settings
#[derive(Debug, Clone, PartialEq)]
pub struct OrbConfig {
    pub max_features: usize,
    pub n_levels: usize,
    pub scale_factor: f32,
    pub fast_threshold: u8,
    /// Keypoints closer than this to a level's edge are discarded
    pub edge_threshold: u32,
    pub patch_size: u32,
    pub pattern_seed: u64,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            max_features: 10_000,
            n_levels: 8,
            scale_factor: 1.2,
            fast_threshold: 20,
            edge_threshold: 31,
            patch_size: 31,
            pattern_seed: 0x5EED,
        }
    }
}

impl OrbConfig {
    pub fn validate(&self) -> CoregResult<()> {
        if self.max_features == 0 {
            return Err(CoregError::InvalidParameter {
                name: "max_features",
                reason: "must be > 0".to_string(),
            });
        }
        if self.n_levels == 0 {
            return Err(CoregError::InvalidParameter {
                name: "n_levels",
                reason: "must be > 0".to_string(),
            });
        }
        if !(self.scale_factor > 1.0) {
            return Err(CoregError::InvalidParameter {
                name: "scale_factor",
                reason: format!("{} (must be > 1)", self.scale_factor),
            });
        }
        // Rotated test points must stay inside the level image.
        let reach = (PATTERN_EXTENT as f32 * std::f32::consts::SQRT_2).ceil() as u32 + 1;
        if self.edge_threshold < reach.max(self.patch_size / 2 + 1) {
            return Err(CoregError::InvalidParameter {
                name: "edge_threshold",
                reason: format!("{} (must be >= {})", self.edge_threshold, reach.max(self.patch_size / 2 + 1)),
            });
        }
        Ok(())
    }
}

/// Oriented FAST keypoints with rotated BRIEF descriptors
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    config: OrbConfig,
    fast: FastDetector,
    pattern: BriefPattern,
}

impl OrbExtractor {
    pub fn new(config: OrbConfig) -> CoregResult<Self> {
        config.validate()?;
        let fast = FastDetector::new(config.fast_threshold, 9)?;
        let pattern = BriefPattern::generate(config.patch_size, config.pattern_seed)?;
        Ok(Self {
            config,
            fast,
            pattern,
        })
    }

    pub fn with_max_features(max_features: usize) -> CoregResult<Self> {
        Self::new(OrbConfig {
            max_features,
            ..OrbConfig::default()
        })
    }

    /// Per-level keypoint budget, a geometric series over the level scale
    fn level_quotas(&self, n_levels: usize) -> Vec<usize> {
        let factor = 1.0 / self.config.scale_factor as f64;
        let total = self.config.max_features as f64;
        let mut per_level = total * (1.0 - factor) / (1.0 - factor.powi(n_levels as i32));

        let mut quotas = Vec::with_capacity(n_levels);
        let mut assigned = 0usize;
        for _ in 0..n_levels.saturating_sub(1) {
            let q = per_level.round() as usize;
            quotas.push(q);
            assigned += q;
            per_level *= factor;
        }
        quotas.push(self.config.max_features.saturating_sub(assigned));
        quotas
    }
}

impl FeatureExtractor for OrbExtractor {
    fn mode(&self) -> DetectorMode {
        DetectorMode::Binary
    }

    fn detect_and_describe(&self, img: &GrayImage) -> CoregResult<Features> {
        ensure_non_empty(img)?;
        let edge = self.config.edge_threshold;
        let half_patch = (self.config.patch_size / 2) as i32;

        let levels = ImagePyramid::build(img, self.config.n_levels, self.config.scale_factor, 2 * edge + 1);
        if levels.is_empty() {
            log::debug!("ORB: {}x{} image is smaller than the border margin", img.width(), img.height());
            return Ok(Features::new(Vec::new(), Descriptors::empty(DescriptorKind::Binary)));
        }
        let quotas = self.level_quotas(levels.len());

        let mut keypoints = Vec::new();
        let mut descriptors = Vec::new();

        for (level, quota) in levels.iter().zip(quotas) {
            let mut corners = self.fast.detect(&level.image, edge);
            corners.sort_by(|a, b| b.score.total_cmp(&a.score));
            corners.truncate(quota);
            if corners.is_empty() {
                continue;
            }

            let smoothed = gaussian_blur_f32(&level.image, 2.0);
            for corner in corners {
                let angle = intensity_centroid_angle(&level.image, corner.x, corner.y, half_patch);
                descriptors.push(self.pattern.describe(&smoothed, corner.x as f32, corner.y as f32, angle));
                keypoints.push(Keypoint {
                    x: corner.x as f32 * level.scale,
                    y: corner.y as f32 * level.scale,
                    size: self.config.patch_size as f32 * level.scale,
                    angle,
                    response: corner.score,
                    octave: level.level as i32,
                });
            }
        }

        let features = Features::new(keypoints, Descriptors::Binary(descriptors))
            .strongest(self.config.max_features);
        log::debug!(
            "ORB: {} keypoints over {} pyramid levels",
            features.len(),
            levels.len()
        );
        Ok(features)
    }
}
