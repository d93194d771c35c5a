//! Batch driver: align many random crops of a label-free / stained image
//! pair and report how much each alignment improved their similarity.

use std::fmt;
use std::path::{Path, PathBuf};

use coreg_align::{AlignmentPipeline, SimilarityDelta, SimilarityReport};
use coreg_core::{AlignConfig, CoregError, Image};
use image::{imageops, ImageReader};
use rand::Rng;

pub use coreg_align;
pub use coreg_core;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid config {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Coreg(#[from] CoregError),

    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type CliResult<T> = Result<T, CliError>;

/// Build the global rayon pool used for per-sample parallelism
pub fn init_thread_pool(n_threads: usize) -> CliResult<()> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads.max(1))
        .build_global()?;
    Ok(())
}

/// Load any supported image as 8-bit luminance
pub fn load_luma(path: &Path) -> CliResult<Image> {
    let reader = ImageReader::open(path).map_err(|source| CliError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let img = reader.decode().map_err(|source| CliError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(img.to_luma8())
}

/// Read an [`AlignConfig`], JSON for `.json` files and TOML otherwise
pub fn load_config(path: &Path) -> CliResult<AlignConfig> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let loaded = if is_json {
        AlignConfig::load_json(path)
    } else {
        AlignConfig::load_toml(path)
    };
    loaded.map_err(|e| CliError::Config {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Configuration used when no config file is given: scale-invariant
/// features, mutual matching and the spatial filter at its default radius.
pub fn default_align_config() -> AlignConfig {
    AlignConfig {
        use_spatial_filter: true,
        ..AlignConfig::default()
    }
}

/// Square crop window in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub size: u32,
}

impl CropWindow {
    pub fn crop(&self, img: &Image) -> Image {
        imageops::crop_imm(img, self.x, self.y, self.size, self.size).to_image()
    }

    /// `{x}_{y}_{size}x{size}`, the stem of failure artifacts
    pub fn stem(&self) -> String {
        format!("{}_{}_{}x{}", self.x, self.y, self.size, self.size)
    }
}

impl fmt::Display for CropWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) {}x{}", self.x, self.y, self.size, self.size)
    }
}

/// Crop-size bounds for sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub min_size: u32,
    pub max_size: u32,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            min_size: 2000,
            max_size: 4000,
        }
    }
}

/// Draw a square window of side `[min_size, max_size]` whose origin lies in
/// the central 10%-90% band of both axes and which fits inside that band.
///
/// The side shrinks to the band when the image is too small for `min_size`;
/// an image without a usable band yields its largest square at the origin.
pub fn sample_window<R: Rng>(rng: &mut R, width: u32, height: u32, spec: SampleSpec) -> CropWindow {
    let (lo_x, hi_x) = (width / 10, width * 9 / 10);
    let (lo_y, hi_y) = (height / 10, height * 9 / 10);
    let band = (hi_x - lo_x).min(hi_y - lo_y);
    if band == 0 {
        return CropWindow {
            x: 0,
            y: 0,
            size: width.min(height),
        };
    }

    let min_size = spec.min_size.min(spec.max_size).max(1);
    let size = rng.random_range(min_size..=spec.max_size.max(min_size)).min(band);
    CropWindow {
        x: rng.random_range(lo_x..=hi_x - size),
        y: rng.random_range(lo_y..=hi_y - size),
        size,
    }
}

/// Scores of one successfully aligned sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleScores {
    pub before: SimilarityReport,
    pub after: SimilarityReport,
    pub delta: SimilarityDelta,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    pub index: usize,
    pub window: CropWindow,
    pub outcome: Result<SampleScores, CoregError>,
}

/// Evaluate one crop pair.
///
/// Pipeline failures are part of the result, not an error; only failing to
/// write the failure artifacts is.
pub fn run_sample(
    pipeline: &AlignmentPipeline,
    label_free: &Image,
    stained: &Image,
    index: usize,
    window: CropWindow,
    failures_dir: Option<&Path>,
) -> CliResult<SampleResult> {
    let lf = window.crop(label_free);
    let st = window.crop(stained);

    let outcome = match pipeline.evaluate(&lf, &st) {
        Ok(eval) => Ok(SampleScores {
            before: eval.before,
            after: eval.after,
            delta: eval.delta,
        }),
        Err(err) => {
            log::warn!("sample {} at {}: alignment failed: {}", index, window, err);
            if let Some(dir) = failures_dir {
                write_failure(dir, &window, &lf, &st)?;
            }
            Err(err)
        }
    };

    Ok(SampleResult {
        index,
        window,
        outcome,
    })
}

fn write_failure(dir: &Path, window: &CropWindow, lf: &Image, st: &Image) -> CliResult<()> {
    std::fs::create_dir_all(dir)?;
    for (suffix, img) in [("lf", lf), ("st", st)] {
        let path = dir.join(format!("{}_{}.tif", window.stem(), suffix));
        img.save(&path).map_err(|source| CliError::Write {
            path: path.clone(),
            source,
        })?;
        log::debug!("wrote {}", path.display());
    }
    Ok(())
}

/// Aggregate over a batch of samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSummary {
    pub successes: usize,
    pub failures: usize,
    /// Mean of the per-sample deltas, `None` without successes
    pub mean_delta: Option<SimilarityDelta>,
}

impl BatchSummary {
    pub fn from_results(results: &[SampleResult]) -> Self {
        let deltas: Vec<SimilarityDelta> = results
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok().map(|s| s.delta))
            .collect();
        let mean_delta = (!deltas.is_empty()).then(|| {
            let n = deltas.len() as f64;
            SimilarityDelta {
                mutual_information: deltas.iter().map(|d| d.mutual_information).sum::<f64>() / n,
                mean_squared_error: deltas.iter().map(|d| d.mean_squared_error).sum::<f64>() / n,
            }
        });
        Self {
            successes: deltas.len(),
            failures: results.len() - deltas.len(),
            mean_delta,
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} aligned, {} failed", self.successes, self.failures)?;
        if let Some(delta) = self.mean_delta {
            write!(f, "; mean {}", delta)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coreg_core::DetectorMode;
    use image::Luma;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::TempDir;

    fn delta(mi: f64, mse: f64) -> SimilarityDelta {
        SimilarityDelta {
            mutual_information: mi,
            mean_squared_error: mse,
        }
    }

    fn success(index: usize, d: SimilarityDelta) -> SampleResult {
        let report = SimilarityReport {
            mutual_information: 1.0,
            mean_squared_error: 10.0,
            shape: (8, 8),
        };
        SampleResult {
            index,
            window: CropWindow { x: 0, y: 0, size: 8 },
            outcome: Ok(SampleScores {
                before: report,
                after: report,
                delta: d,
            }),
        }
    }

    #[test]
    fn test_window_inside_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..200 {
            let w = sample_window(&mut rng, 10_000, 8_000, SampleSpec::default());
            assert!((2000..=4000).contains(&w.size));
            assert!(w.x >= 1000 && w.x + w.size <= 9000);
            assert!(w.y >= 800 && w.y + w.size <= 7200);
        }
    }

    #[test]
    fn test_window_shrinks_on_small_image() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let w = sample_window(&mut rng, 1000, 500, SampleSpec::default());
        assert_eq!(w.size, 400);
        assert_eq!(w.y, 50);
        assert!(w.x >= 100 && w.x + w.size <= 900);

        let tiny = sample_window(&mut rng, 1, 5, SampleSpec::default());
        assert_eq!(tiny, CropWindow { x: 0, y: 0, size: 1 });
    }

    #[test]
    fn test_crop_and_stem() {
        let img = Image::from_fn(20, 20, |x, y| Luma([(x + 20 * y) as u8]));
        let window = CropWindow { x: 5, y: 7, size: 4 };
        let crop = window.crop(&img);
        assert_eq!(crop.dimensions(), (4, 4));
        assert_eq!(crop.get_pixel(0, 0), img.get_pixel(5, 7));
        assert_eq!(window.stem(), "5_7_4x4");
    }

    #[test]
    fn test_failed_sample_writes_artifacts() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("failures");
        let flat = Image::from_pixel(64, 64, Luma([90]));
        let config = AlignConfig {
            mode: DetectorMode::Binary,
            ..default_align_config()
        };
        let pipeline = AlignmentPipeline::new(config).unwrap();
        let window = CropWindow { x: 8, y: 8, size: 48 };

        let result = run_sample(&pipeline, &flat, &flat, 3, window, Some(&dir)).unwrap();
        assert_eq!(result.index, 3);
        assert!(matches!(result.outcome, Err(CoregError::InsufficientMatches { .. })));
        assert!(dir.join("8_8_48x48_lf.tif").exists());
        assert!(dir.join("8_8_48x48_st.tif").exists());
    }

    #[test]
    fn test_summary_means_successes_only() {
        let failed = SampleResult {
            index: 2,
            window: CropWindow { x: 0, y: 0, size: 8 },
            outcome: Err(CoregError::InsufficientMatches { found: 1, required: 3 }),
        };
        let results = vec![success(0, delta(0.2, -10.0)), success(1, delta(0.4, -30.0)), failed];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);
        let mean = summary.mean_delta.unwrap();
        assert!((mean.mutual_information - 0.3).abs() < 1e-12);
        assert!((mean.mean_squared_error + 20.0).abs() < 1e-12);

        let none = BatchSummary::from_results(&[]);
        assert_eq!(none.mean_delta, None);
        assert_eq!(none.to_string(), "0 aligned, 0 failed");
    }

    #[test]
    fn test_load_config_by_extension() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();

        let toml_path = dir.join("align.toml");
        std::fs::write(&toml_path, "mode = \"orb\"\nuse_ratio_test = true\n").unwrap();
        let cfg = load_config(&toml_path).unwrap();
        assert_eq!(cfg.mode, DetectorMode::Binary);
        assert!(cfg.use_ratio_test);

        let json_path = dir.join("align.JSON");
        std::fs::write(&json_path, r#"{ "max_features": 500 }"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().max_features, 500);

        let bad = dir.join("bad.toml");
        std::fs::write(&bad, "max_features = 0\n").unwrap();
        assert!(matches!(load_config(&bad), Err(CliError::Config { .. })));
    }

    #[test]
    fn test_missing_image() {
        assert!(matches!(
            load_luma(Path::new("/nonexistent/coreg/input.tif")),
            Err(CliError::Open { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_window_fits(
            seed in any::<u64>(),
            width in 1u32..6000,
            height in 1u32..6000,
            min_size in 1u32..3000,
            extra in 0u32..3000,
        ) {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let spec = SampleSpec { min_size, max_size: min_size + extra };
            let w = sample_window(&mut rng, width, height, spec);
            prop_assert!(w.size >= 1);
            prop_assert!(w.x + w.size <= width);
            prop_assert!(w.y + w.size <= height);
        }
    }
}
