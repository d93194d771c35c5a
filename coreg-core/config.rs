use crate::error::{CoregError, CoregResult};
use crate::types::DetectorMode;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Contrast-limited adaptive histogram equalization settings.
///
/// Higher `clip_limit` gives more local contrast at the risk of amplifying
/// noise. Smaller tiles (more of them) adapt more locally but can look blocky.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClaheConfig {
    pub clip_limit: f32,
    /// Number of tiles as (rows, cols)
    pub tile_grid: (u32, u32),
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            clip_limit: 18.0,
            tile_grid: (8, 8),
        }
    }
}

impl ClaheConfig {
    pub fn validate(&self) -> CoregResult<()> {
        if !self.clip_limit.is_finite() || self.clip_limit <= 0.0 {
            return Err(CoregError::invalid(
                "clahe.clip_limit",
                format!("{} (must be finite and > 0)", self.clip_limit),
            ));
        }
        if self.tile_grid.0 == 0 || self.tile_grid.1 == 0 {
            return Err(CoregError::invalid(
                "clahe.tile_grid",
                format!("{:?} (both tile counts must be > 0)", self.tile_grid),
            ));
        }
        Ok(())
    }
}

/// Robust similarity estimation settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RansacConfig {
    /// Upper bound on sampling rounds
    pub max_iterations: usize,
    /// Reprojection error in pixels below which a correspondence is an inlier
    pub inlier_threshold: f64,
    /// Stop early once this probability of having drawn an all-inlier sample is reached
    pub confidence: f64,
    /// Minimum consensus size for the result to count as a transform
    pub min_inliers: usize,
    /// Minimum share of the correspondences the consensus must cover
    pub min_inlier_ratio: f64,
    /// Allowed scale (min, max). Hypotheses outside it are rejected as implausible.
    pub scale_range: (f64, f64),
    /// Least-squares re-fits over the consensus set
    pub refine_iterations: usize,
    /// Sample from `seed` instead of OS entropy
    pub deterministic: bool,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            inlier_threshold: 3.0,
            confidence: 0.99,
            min_inliers: 3,
            min_inlier_ratio: 0.5,
            scale_range: (0.5, 2.0),
            refine_iterations: 10,
            deterministic: true,
            seed: 0,
        }
    }
}

impl RansacConfig {
    pub fn validate(&self) -> CoregResult<()> {
        if self.max_iterations == 0 {
            return Err(CoregError::invalid("ransac.max_iterations", "must be > 0"));
        }
        if !self.inlier_threshold.is_finite() || self.inlier_threshold <= 0.0 {
            return Err(CoregError::invalid(
                "ransac.inlier_threshold",
                format!("{} (must be finite and > 0)", self.inlier_threshold),
            ));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(CoregError::invalid(
                "ransac.confidence",
                format!("{} (must be in (0, 1))", self.confidence),
            ));
        }
        if self.min_inliers < 3 {
            return Err(CoregError::invalid(
                "ransac.min_inliers",
                format!("{} (must be >= 3)", self.min_inliers),
            ));
        }
        if !(self.min_inlier_ratio > 0.0 && self.min_inlier_ratio <= 1.0) {
            return Err(CoregError::invalid(
                "ransac.min_inlier_ratio",
                format!("{} (must be in (0, 1])", self.min_inlier_ratio),
            ));
        }
        let (min_scale, max_scale) = self.scale_range;
        if !(min_scale > 0.0 && max_scale > min_scale) {
            return Err(CoregError::invalid(
                "ransac.scale_range",
                format!("({}, {}) (must have 0 < min < max)", min_scale, max_scale),
            ));
        }
        Ok(())
    }
}

/// Resampling kernel used by the warper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Interpolation {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WarpConfig {
    pub interpolation: Interpolation,
    /// Value written where the inverse mapping falls outside the source
    pub fill: u8,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Bilinear,
            fill: 0,
        }
    }
}

/// Complete registration configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AlignConfig {
    pub mode: DetectorMode,
    /// Strongest keypoints kept per image
    pub max_features: usize,
    /// k=2 matching followed by Lowe's ratio test instead of mutual nearest neighbours
    pub use_ratio_test: bool,
    pub ratio_threshold: f32,
    /// Drop matches whose keypoints lie further apart than `spatial_distance`.
    ///
    /// Only meaningful when both images already cover nearly the same field of
    /// view: true correspondences then sit close to zero displacement.
    pub use_spatial_filter: bool,
    pub spatial_distance: f32,
    /// CLAHE both inputs before scoring in `evaluate`
    pub equalize: bool,
    pub clahe: ClaheConfig,
    /// Histogram bins per axis for mutual information
    pub mi_bins: usize,
    pub ransac: RansacConfig,
    pub warp: WarpConfig,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            mode: DetectorMode::ScaleInvariant,
            max_features: 10_000,
            use_ratio_test: false,
            ratio_threshold: 0.75,
            use_spatial_filter: false,
            spatial_distance: 200.0,
            equalize: true,
            clahe: ClaheConfig::default(),
            mi_bins: 256,
            ransac: RansacConfig::default(),
            warp: WarpConfig::default(),
        }
    }
}

impl AlignConfig {
    pub fn builder() -> AlignConfigBuilder {
        AlignConfigBuilder::new()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> CoregResult<()> {
        if self.max_features == 0 {
            return Err(CoregError::invalid("max_features", "must be > 0"));
        }
        if !(self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0) {
            return Err(CoregError::invalid(
                "ratio_threshold",
                format!("{} (must be in (0, 1])", self.ratio_threshold),
            ));
        }
        if !self.spatial_distance.is_finite() || self.spatial_distance <= 0.0 {
            return Err(CoregError::invalid(
                "spatial_distance",
                format!("{} (must be finite and > 0)", self.spatial_distance),
            ));
        }
        if self.mi_bins == 0 || self.mi_bins > 256 {
            return Err(CoregError::invalid(
                "mi_bins",
                format!("{} (must be in 1..=256)", self.mi_bins),
            ));
        }
        self.clahe.validate()?;
        self.ransac.validate()
    }

    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "AlignConfig: mode={}, max_features={}, ratio_test={} ({}), spatial_filter={} ({} px), clahe={}x{}@{}, mi_bins={}",
            self.mode,
            self.max_features,
            self.use_ratio_test,
            self.ratio_threshold,
            self.use_spatial_filter,
            self.spatial_distance,
            self.clahe.tile_grid.0,
            self.clahe.tile_grid.1,
            self.clahe.clip_limit,
            self.mi_bins
        )
    }

    /// Save configuration to JSON file
    #[cfg(feature = "serde")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load configuration from JSON file
    #[cfg(feature = "serde")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save configuration to TOML file
    #[cfg(feature = "serde")]
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Load configuration from TOML file
    #[cfg(feature = "serde")]
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}

/// Fluent API builder for [`AlignConfig`]
#[derive(Debug, Clone, Default)]
pub struct AlignConfigBuilder {
    config: AlignConfig,
}

impl AlignConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: DetectorMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_features(mut self, max_features: usize) -> Self {
        self.config.max_features = max_features;
        self
    }

    /// Enable k=2 matching with the given Lowe ratio
    pub fn ratio_test(mut self, threshold: f32) -> Self {
        self.config.use_ratio_test = true;
        self.config.ratio_threshold = threshold;
        self
    }

    pub fn mutual_matching(mut self) -> Self {
        self.config.use_ratio_test = false;
        self
    }

    /// Enable the spatial plausibility filter with the given radius in pixels
    pub fn spatial_filter(mut self, distance: f32) -> Self {
        self.config.use_spatial_filter = true;
        self.config.spatial_distance = distance;
        self
    }

    pub fn equalize(mut self, enable: bool) -> Self {
        self.config.equalize = enable;
        self
    }

    pub fn clahe(mut self, clip_limit: f32, tile_grid: (u32, u32)) -> Self {
        self.config.clahe = ClaheConfig {
            clip_limit,
            tile_grid,
        };
        self
    }

    pub fn mi_bins(mut self, bins: usize) -> Self {
        self.config.mi_bins = bins;
        self
    }

    pub fn ransac(mut self, ransac: RansacConfig) -> Self {
        self.config.ransac = ransac;
        self
    }

    /// `None` samples RANSAC hypotheses from OS entropy
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.config.ransac.deterministic = seed.is_some();
        self.config.ransac.seed = seed.unwrap_or_default();
        self
    }

    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.config.warp.interpolation = interpolation;
        self
    }

    pub fn fill(mut self, fill: u8) -> Self {
        self.config.warp.fill = fill;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> CoregResult<AlignConfig> {
        self.config.validate()?;
        log::debug!("{}", self.config.summary());
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_surface() {
        let cfg = AlignConfig::default();
        assert_eq!(cfg.mode, DetectorMode::ScaleInvariant);
        assert_eq!(cfg.max_features, 10_000);
        assert!(!cfg.use_ratio_test);
        assert_eq!(cfg.ratio_threshold, 0.75);
        assert_eq!(cfg.spatial_distance, 200.0);
        assert_eq!(cfg.clahe.clip_limit, 18.0);
        assert_eq!(cfg.clahe.tile_grid, (8, 8));
        assert_eq!(cfg.mi_bins, 256);
        assert_eq!(cfg.warp.fill, 0);
        assert_eq!(cfg.warp.interpolation, Interpolation::Bilinear);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let cfg = AlignConfig::builder()
            .mode(DetectorMode::Binary)
            .max_features(500)
            .ratio_test(0.6)
            .spatial_filter(50.0)
            .build()
            .unwrap();
        assert_eq!(cfg.mode, DetectorMode::Binary);
        assert_eq!(cfg.max_features, 500);
        assert!(cfg.use_ratio_test);
        assert!(cfg.use_spatial_filter);
        assert_eq!(cfg.spatial_distance, 50.0);
    }

    #[test]
    fn test_invalid_parameters() {
        let result = AlignConfig::builder().ratio_test(1.5).build();
        assert!(matches!(
            result,
            Err(CoregError::InvalidParameter { name: "ratio_threshold", .. })
        ));

        let result = AlignConfig::builder().clahe(0.0, (8, 8)).build();
        assert!(matches!(
            result,
            Err(CoregError::InvalidParameter { name: "clahe.clip_limit", .. })
        ));

        let result = AlignConfig::builder().clahe(2.0, (0, 8)).build();
        assert!(matches!(
            result,
            Err(CoregError::InvalidParameter { name: "clahe.tile_grid", .. })
        ));

        let result = AlignConfig::builder().mi_bins(0).build();
        assert!(matches!(
            result,
            Err(CoregError::InvalidParameter { name: "mi_bins", .. })
        ));

        let ransac = RansacConfig {
            min_inliers: 2,
            ..RansacConfig::default()
        };
        let result = AlignConfig::builder().ransac(ransac).build();
        assert!(matches!(
            result,
            Err(CoregError::InvalidParameter { name: "ransac.min_inliers", .. })
        ));
    }

    #[test]
    fn test_summary_mentions_mode() {
        let summary = AlignConfig::default().summary();
        assert!(summary.contains("mode=SIFT"));
        assert!(summary.contains("200 px"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_toml_partial_override() {
        let cfg = AlignConfig::from_toml(
            r#"
            mode = "orb"
            use_spatial_filter = true

            [clahe]
            clip_limit = 4.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mode, DetectorMode::Binary);
        assert!(cfg.use_spatial_filter);
        assert_eq!(cfg.clahe.clip_limit, 4.0);
        assert_eq!(cfg.clahe.tile_grid, (8, 8));
        assert_eq!(cfg.max_features, 10_000);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_rejects_invalid() {
        let json = AlignConfig::default().to_json().unwrap();
        assert_eq!(AlignConfig::from_json(&json).unwrap(), AlignConfig::default());
        assert!(AlignConfig::from_json(r#"{ "mi_bins": 0 }"#).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_toml_roundtrip_keeps_entropy_seeding() {
        let cfg = AlignConfig::builder().seed(None).build().unwrap();
        assert!(!cfg.ransac.deterministic);

        let reloaded = AlignConfig::from_toml(&cfg.to_toml().unwrap()).unwrap();
        assert!(!reloaded.ransac.deterministic);
        assert_eq!(reloaded, cfg);
        let reloaded = AlignConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(reloaded, cfg);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_toml_roundtrip_non_default() {
        let cfg = AlignConfig::builder()
            .mode(DetectorMode::Binary)
            .ratio_test(0.6)
            .spatial_filter(120.0)
            .ransac(RansacConfig {
                min_inlier_ratio: 0.25,
                scale_range: (0.8, 1.25),
                ..RansacConfig::default()
            })
            .seed(Some(17))
            .interpolation(Interpolation::Nearest)
            .build()
            .unwrap();

        let reloaded = AlignConfig::from_toml(&cfg.to_toml().unwrap()).unwrap();
        assert_eq!(reloaded, cfg);
        assert_eq!(reloaded.ransac.scale_range, (0.8, 1.25));
        assert_eq!(reloaded.ransac.seed, 17);
    }

    #[test]
    fn test_seed_builder() {
        let cfg = AlignConfig::builder().seed(Some(99)).build().unwrap();
        assert!(cfg.ransac.deterministic);
        assert_eq!(cfg.ransac.seed, 99);
        let cfg = AlignConfig::builder().seed(None).build().unwrap();
        assert!(!cfg.ransac.deterministic);
    }

    #[test]
    fn test_ransac_plausibility_limits_validated() {
        for ratio in [0.0, -0.2, 1.5, f64::NAN] {
            let ransac = RansacConfig {
                min_inlier_ratio: ratio,
                ..RansacConfig::default()
            };
            assert!(matches!(
                ransac.validate(),
                Err(CoregError::InvalidParameter { name: "ransac.min_inlier_ratio", .. })
            ));
        }
        for range in [(0.0, 2.0), (1.5, 1.5), (2.0, 0.5)] {
            let ransac = RansacConfig {
                scale_range: range,
                ..RansacConfig::default()
            };
            assert!(matches!(
                ransac.validate(),
                Err(CoregError::InvalidParameter { name: "ransac.scale_range", .. })
            ));
        }
    }
}
