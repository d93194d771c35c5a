//! Keypoint detection and description for co-registration.
//!
//! Two detector families sit behind the [`FeatureExtractor`] trait:
//! [`SiftExtractor`] for [`DetectorMode::ScaleInvariant`] and [`OrbExtractor`]
//! for [`DetectorMode::Binary`]. [`preprocessing`] holds the CLAHE used to
//! bring both modalities onto a comparable intensity distribution first.

pub mod brief;
pub mod fast;
pub mod orb;
pub mod preprocessing;
pub mod pyramid;
pub mod sift;

use coreg_core::{CoregResult, Descriptors, DetectorMode, Image, Keypoint};

pub use orb::{OrbConfig, OrbExtractor};
pub use preprocessing::{clahe, clahe_dynamic, Clahe};
pub use sift::{SiftConfig, SiftExtractor};

/// Keypoints of one image and their index-aligned descriptors
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl Features {
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Descriptors) -> Self {
        debug_assert_eq!(keypoints.len(), descriptors.len());
        Self {
            keypoints,
            descriptors,
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Keep the `n` keypoints with the highest response, strongest first.
    /// Equal responses keep their detection order.
    pub fn strongest(self, n: usize) -> Self {
        let mut order: Vec<usize> = (0..self.keypoints.len()).collect();
        order.sort_by(|&a, &b| self.keypoints[b].response.total_cmp(&self.keypoints[a].response));
        order.truncate(n);

        Self {
            keypoints: order.iter().map(|&i| self.keypoints[i]).collect(),
            descriptors: self.descriptors.select(&order),
        }
    }
}

/// Capability shared by every detector family
pub trait FeatureExtractor: Send + Sync {
    fn mode(&self) -> DetectorMode;

    /// Detect keypoints and compute one descriptor per keypoint.
    ///
    /// A textureless image yields empty features, not an error.
    fn detect_and_describe(&self, image: &Image) -> CoregResult<Features>;
}

/// Construct the extractor for `mode`, keeping at most `max_features` keypoints
pub fn extractor_for(mode: DetectorMode, max_features: usize) -> CoregResult<Box<dyn FeatureExtractor>> {
    Ok(match mode {
        DetectorMode::ScaleInvariant => Box::new(SiftExtractor::with_max_features(max_features)?),
        DetectorMode::Binary => Box::new(OrbExtractor::with_max_features(max_features)?),
    })
}

/// One-shot detection with a freshly built extractor
pub fn detect_and_describe(image: &Image, mode: DetectorMode, max_features: usize) -> CoregResult<Features> {
    let features = extractor_for(mode, max_features)?.detect_and_describe(image)?;
    log::debug!(
        "{} extracted {} features from {}x{} image",
        mode,
        features.len(),
        image.width(),
        image.height()
    );
    Ok(features)
}
