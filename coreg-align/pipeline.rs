//! Feature-based alignment of one image onto another, and before/after
//! similarity evaluation.

use coreg_core::{ensure_non_empty, ensure_same_shape, AlignConfig, CoregResult, Image, Keypoint, Match};
use coreg_features::{extractor_for, Clahe, FeatureExtractor};

use crate::estimator::TransformEstimator;
use crate::filter::MatchFilter;
use crate::matcher::match_descriptors;
use crate::metrics::{SimilarityDelta, SimilarityReport};
use crate::transform::Transform;
use crate::warp::Warper;

/// Counts gathered along the way, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchStats {
    /// Keypoints found in (reference, moving)
    pub keypoints: (usize, usize),
    pub raw_matches: usize,
    pub filtered_matches: usize,
    pub inliers: usize,
    pub iterations: usize,
}

/// A warped image together with the transform that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    /// Same shape as the reference image
    pub image: Image,
    /// Maps moving-image coordinates to reference-image coordinates
    pub transform: Transform,
    pub stats: MatchStats,
}

/// Similarity before and after alignment
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub before: SimilarityReport,
    pub after: SimilarityReport,
    /// after - before
    pub delta: SimilarityDelta,
    pub alignment: Alignment,
    /// Images the reports were computed over
    pub reference: Image,
    pub moving: Image,
    pub aligned: Image,
}

/// Detect, match, filter, estimate and warp with one fixed configuration.
///
/// Holds no mutable state, so one pipeline can serve any number of image
/// pairs, including from several threads.
pub struct AlignmentPipeline {
    config: AlignConfig,
    extractor: Box<dyn FeatureExtractor>,
    clahe: Clahe,
    filter: MatchFilter,
    estimator: TransformEstimator,
    warper: Warper,
}

impl AlignmentPipeline {
    pub fn new(config: AlignConfig) -> CoregResult<Self> {
        config.validate()?;
        Ok(Self {
            extractor: extractor_for(config.mode, config.max_features)?,
            clahe: Clahe::new(config.clahe)?,
            filter: MatchFilter::from_config(&config),
            estimator: TransformEstimator::new(config.ransac)?,
            warper: Warper::new(config.warp),
            config,
        })
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Estimate the transform taking `img2` onto `img1` and apply it to
    /// `img_to_align` (or `img2` itself). The result has `img1`'s shape.
    pub fn align(&self, img1: &Image, img2: &Image, img_to_align: Option<&Image>) -> CoregResult<Alignment> {
        ensure_non_empty(img1)?;
        ensure_non_empty(img2)?;
        let target = img_to_align.unwrap_or(img2);
        ensure_non_empty(target)?;

        let features1 = self.extractor.detect_and_describe(img1)?;
        let features2 = self.extractor.detect_and_describe(img2)?;
        log::debug!(
            "{} keypoints: {} reference, {} moving",
            self.config.mode,
            features1.len(),
            features2.len()
        );

        let raw = match_descriptors(&features1.descriptors, &features2.descriptors, self.config.use_ratio_test)?;
        let raw_matches = raw.len();
        let matches = self.filter.apply(raw, &features1.keypoints, &features2.keypoints);

        let (query_points, train_points) = correspondence_points(&matches, &features1.keypoints, &features2.keypoints);
        let estimate = self.estimator.estimate(&query_points, &train_points)?;

        let image = self
            .warper
            .apply(target, &estimate.transform, (img1.height(), img1.width()))?;

        let stats = MatchStats {
            keypoints: (features1.len(), features2.len()),
            raw_matches,
            filtered_matches: matches.len(),
            inliers: estimate.inliers.len(),
            iterations: estimate.iterations,
        };
        log::info!(
            "aligned {}x{} onto {}x{}: {} matches, {} after filtering, {} inliers; {}",
            target.width(),
            target.height(),
            img1.width(),
            img1.height(),
            stats.raw_matches,
            stats.filtered_matches,
            stats.inliers,
            estimate.transform
        );

        Ok(Alignment {
            image,
            transform: estimate.transform,
            stats,
        })
    }

    /// Convenience wrapper returning only the warped image
    pub fn align_image(&self, img1: &Image, img2: &Image, img_to_align: Option<&Image>) -> CoregResult<Image> {
        Ok(self.align(img1, img2, img_to_align)?.image)
    }

    /// Score `img2` against `img1`, align, and score again.
    ///
    /// With `equalize` set both inputs are CLAHE-equalized first; the
    /// transform is estimated on the equalized pair but applied to the raw
    /// `img2`, whose warp is then equalized for the second score.
    pub fn evaluate(&self, img1: &Image, img2: &Image) -> CoregResult<Evaluation> {
        ensure_same_shape(img1, img2)?;
        ensure_non_empty(img1)?;

        let (reference, moving) = if self.config.equalize {
            (self.clahe.apply(img1)?, self.clahe.apply(img2)?)
        } else {
            (img1.clone(), img2.clone())
        };
        let before = SimilarityReport::compute(&reference, &moving, self.config.mi_bins)?;

        let alignment = self.align(&reference, &moving, Some(img2))?;
        let aligned = if self.config.equalize {
            self.clahe.apply(&alignment.image)?
        } else {
            alignment.image.clone()
        };
        let after = SimilarityReport::compute(&reference, &aligned, self.config.mi_bins)?;
        let delta = before.delta_to(&after);
        log::info!("before: {}; after: {}; {}", before, after, delta);

        Ok(Evaluation {
            before,
            after,
            delta,
            alignment,
            reference,
            moving,
            aligned,
        })
    }
}

fn correspondence_points(
    matches: &[Match],
    query_keypoints: &[Keypoint],
    train_keypoints: &[Keypoint],
) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    matches
        .iter()
        .filter_map(|m| {
            let q = query_keypoints.get(m.query_idx)?;
            let t = train_keypoints.get(m.train_idx)?;
            Some(((q.x as f64, q.y as f64), (t.x as f64, t.y as f64)))
        })
        .unzip()
}

/// One-shot [`AlignmentPipeline::align_image`]
pub fn align(img1: &Image, img2: &Image, img_to_align: Option<&Image>, config: &AlignConfig) -> CoregResult<Image> {
    AlignmentPipeline::new(config.clone())?.align_image(img1, img2, img_to_align)
}

/// One-shot [`AlignmentPipeline::evaluate`]
pub fn evaluate(img1: &Image, img2: &Image, config: &AlignConfig) -> CoregResult<Evaluation> {
    AlignmentPipeline::new(config.clone())?.evaluate(img1, img2)
}
