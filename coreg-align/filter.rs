use coreg_core::{AlignConfig, Correspondence, Keypoint, KnnMatch, Match};

use crate::matcher::Matches;

/// Keep the best candidate of every pair that passes Lowe's ratio test
/// (`best < threshold * second`).
pub fn ratio_filter(knn: &[KnnMatch], threshold: f32) -> Vec<Match> {
    knn.iter()
        .filter(|k| k.passes_ratio(threshold))
        .map(|k| k.best)
        .collect()
}

/// Keep correspondences whose keypoints lie strictly closer than
/// `max_distance` pixels apart, assuming the images are roughly pre-aligned.
/// Correspondences with out-of-range indices are dropped.
pub fn spatial_filter<M: Correspondence + Clone>(
    matches: &[M],
    query_keypoints: &[Keypoint],
    train_keypoints: &[Keypoint],
    max_distance: f32,
) -> Vec<M> {
    matches
        .iter()
        .filter(|m| {
            match (
                query_keypoints.get(m.query_idx()),
                train_keypoints.get(m.train_idx()),
            ) {
                (Some(q), Some(t)) => q.distance(t) < max_distance,
                _ => false,
            }
        })
        .cloned()
        .collect()
}

/// Optional ratio and spatial filters applied to raw matcher output
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MatchFilter {
    pub ratio_threshold: Option<f32>,
    pub spatial_distance: Option<f32>,
}

impl MatchFilter {
    pub fn from_config(config: &AlignConfig) -> Self {
        Self {
            ratio_threshold: config.use_ratio_test.then_some(config.ratio_threshold),
            spatial_distance: config.use_spatial_filter.then_some(config.spatial_distance),
        }
    }

    /// Reduce `matches` to plain correspondences.
    ///
    /// Knn pairs always collapse to their best candidate; the ratio test is
    /// applied only when a threshold is configured.
    pub fn apply(&self, matches: Matches, query_keypoints: &[Keypoint], train_keypoints: &[Keypoint]) -> Vec<Match> {
        let before = matches.len();
        let kept = match matches {
            Matches::Mutual(m) => self.spatial(m, query_keypoints, train_keypoints),
            Matches::Knn(knn) => {
                let knn = self.spatial(knn, query_keypoints, train_keypoints);
                match self.ratio_threshold {
                    Some(t) => ratio_filter(&knn, t),
                    None => knn.iter().map(|k| k.best).collect(),
                }
            }
        };
        log::debug!("match filter kept {} of {} matches", kept.len(), before);
        kept
    }

    fn spatial<M: Correspondence + Clone>(&self, matches: Vec<M>, query: &[Keypoint], train: &[Keypoint]) -> Vec<M> {
        match self.spatial_distance {
            Some(d) => spatial_filter(&matches, query, train, d),
            None => matches,
        }
    }
}
