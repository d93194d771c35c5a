//! Robust similarity estimation.
//!
//! RANSAC over minimal two-point samples:
//! 1. Draw two distinct correspondences and solve the exact similarity
//! 2. Count correspondences whose reprojection error is below the threshold
//! 3. On a new best consensus, re-fit on the consensus set until it stops growing
//! 4. Shrink the iteration budget to what the observed inlier ratio requires
//!
//! Hypotheses whose scale leaves `scale_range` are discarded, and the final
//! consensus must reach both `min_inliers` and `min_inlier_ratio` of the input.

use coreg_core::{CoregError, CoregResult, RansacConfig};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::transform::Transform;

/// Correspondences needed before estimation is attempted at all
pub const MIN_CORRESPONDENCES: usize = 3;

/// Points determining a similarity exactly
const SAMPLE_SIZE: usize = 2;

/// Result of a successful robust fit
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// Maps train points onto query points
    pub transform: Transform,
    /// Indices of the correspondences consistent with `transform`
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

impl Estimate {
    pub fn inlier_ratio(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.inliers.len() as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformEstimator {
    config: RansacConfig,
}

impl TransformEstimator {
    pub fn new(config: RansacConfig) -> CoregResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Fit the similarity taking `train_points[i]` onto `query_points[i]`.
    ///
    /// Fails with `InsufficientMatches` when fewer than three correspondences
    /// are given or when no plausible model gathers enough supporters.
    pub fn estimate(&self, query_points: &[(f64, f64)], train_points: &[(f64, f64)]) -> CoregResult<Estimate> {
        if query_points.len() != train_points.len() {
            return Err(CoregError::InvalidParameter {
                name: "points",
                reason: format!(
                    "{} query points vs {} train points",
                    query_points.len(),
                    train_points.len()
                ),
            });
        }
        let n = train_points.len();
        if n < MIN_CORRESPONDENCES {
            return Err(CoregError::InsufficientMatches {
                found: n,
                required: MIN_CORRESPONDENCES,
            });
        }

        let src = train_points;
        let dst = query_points;
        let threshold = self.config.inlier_threshold;

        let mut rng: ChaCha8Rng = if self.config.deterministic {
            ChaCha8Rng::seed_from_u64(self.config.seed)
        } else {
            ChaCha8Rng::from_os_rng()
        };

        let mut best: Option<(Transform, Vec<usize>)> = None;
        let mut best_count = 0usize;
        let mut max_iterations = self.config.max_iterations;
        let mut iterations = 0usize;
        let mut sample = Vec::with_capacity(SAMPLE_SIZE);

        while iterations < max_iterations {
            iterations += 1;
            random_sample_into(&mut rng, n, SAMPLE_SIZE, &mut sample);
            let sample_src = [src[sample[0]], src[sample[1]]];
            let sample_dst = [dst[sample[0]], dst[sample[1]]];

            let Some(candidate) = estimate_similarity(&sample_src, &sample_dst) else {
                continue;
            };
            if !self.is_plausible(&candidate) {
                continue;
            }
            let inliers = count_inliers(src, dst, &candidate, threshold);
            if inliers.len() <= best_count {
                continue;
            }

            let (transform, inliers) = self.local_optimization(src, dst, candidate, inliers);
            best_count = inliers.len();
            best = Some((transform, inliers));

            if best_count == n {
                break;
            }
            let ratio = best_count as f64 / n as f64;
            max_iterations = adaptive_iterations(ratio, SAMPLE_SIZE, self.config.confidence)
                .min(self.config.max_iterations);
        }

        let required = self.required_inliers(n);
        match best {
            Some((transform, inliers)) if inliers.len() >= required => {
                log::debug!(
                    "RANSAC: {}/{} inliers after {} iterations, {}",
                    inliers.len(),
                    n,
                    iterations,
                    transform
                );
                Ok(Estimate {
                    transform,
                    inliers,
                    iterations,
                })
            }
            _ => {
                log::debug!(
                    "RANSAC: best consensus {}/{} below the {} required",
                    best_count,
                    n,
                    required
                );
                Err(CoregError::InsufficientMatches {
                    found: best_count,
                    required,
                })
            }
        }
    }

    /// Consensus size accepted for `n` correspondences
    fn required_inliers(&self, n: usize) -> usize {
        let by_ratio = (self.config.min_inlier_ratio * n as f64).ceil() as usize;
        self.config.min_inliers.max(by_ratio)
    }

    fn is_plausible(&self, transform: &Transform) -> bool {
        let (min_scale, max_scale) = self.config.scale_range;
        let scale = transform.scale();
        scale >= min_scale && scale <= max_scale
    }

    /// Least-squares re-fit over the consensus set, repeated while it grows.
    fn local_optimization(
        &self,
        src: &[(f64, f64)],
        dst: &[(f64, f64)],
        mut transform: Transform,
        mut inliers: Vec<usize>,
    ) -> (Transform, Vec<usize>) {
        let threshold = self.config.inlier_threshold;
        let mut inlier_src = Vec::with_capacity(inliers.len());
        let mut inlier_dst = Vec::with_capacity(inliers.len());

        for _ in 0..self.config.refine_iterations {
            inlier_src.clear();
            inlier_dst.clear();
            inlier_src.extend(inliers.iter().map(|&i| src[i]));
            inlier_dst.extend(inliers.iter().map(|&i| dst[i]));

            let Some(refit) = estimate_similarity(&inlier_src, &inlier_dst).filter(|t| self.is_plausible(t)) else {
                break;
            };
            let refit_inliers = count_inliers(src, dst, &refit, threshold);
            if refit_inliers.len() < inliers.len() {
                break;
            }
            let grew = refit_inliers.len() > inliers.len();
            transform = refit;
            inliers = refit_inliers;
            if !grew {
                break;
            }
        }

        (transform, inliers)
    }
}

/// Closed-form least-squares similarity taking `src` onto `dst`.
///
/// `None` when the source points have no spread or the fit collapses.
pub fn estimate_similarity(src: &[(f64, f64)], dst: &[(f64, f64)]) -> Option<Transform> {
    if src.len() < SAMPLE_SIZE || src.len() != dst.len() {
        return None;
    }

    let (src_cx, src_cy) = centroid(src);
    let (dst_cx, dst_cy) = centroid(dst);

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syx = 0.0;
    let mut syy = 0.0;
    let mut src_var = 0.0;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (rx, ry) = (sx - src_cx, sy - src_cy);
        let (tx, ty) = (dx - dst_cx, dy - dst_cy);
        sxx += rx * tx;
        sxy += rx * ty;
        syx += ry * tx;
        syy += ry * ty;
        src_var += rx * rx + ry * ry;
    }
    if src_var < 1e-10 {
        return None;
    }

    let angle = (sxy - syx).atan2(sxx + syy);
    let (sin, cos) = angle.sin_cos();
    let scale = ((sxx + syy) * cos + (sxy - syx) * sin) / src_var;
    if !(scale > 0.0) {
        return None;
    }

    let tx = dst_cx - scale * (cos * src_cx - sin * src_cy);
    let ty = dst_cy - scale * (sin * src_cx + cos * src_cy);
    Some(Transform::similarity(scale, angle, tx, ty))
}

fn centroid(points: &[(f64, f64)]) -> (f64, f64) {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Indices whose reprojection error is below `threshold`
fn count_inliers(src: &[(f64, f64)], dst: &[(f64, f64)], transform: &Transform, threshold: f64) -> Vec<usize> {
    let threshold_sq = threshold * threshold;
    src.iter()
        .zip(dst)
        .enumerate()
        .filter(|&(_, (s, d))| {
            let (px, py) = transform.apply(s.0, s.1);
            let (ex, ey) = (px - d.0, py - d.1);
            ex * ex + ey * ey < threshold_sq
        })
        .map(|(i, _)| i)
        .collect()
}

/// Iterations needed to draw one all-inlier sample with probability `confidence`
pub(crate) fn adaptive_iterations(inlier_ratio: f64, sample_size: usize, confidence: f64) -> usize {
    if inlier_ratio <= 0.0 || inlier_ratio >= 1.0 {
        return 1;
    }

    // N = log(1 - confidence) / log(1 - w^n)
    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_outlier = (1.0 - w_n).ln();
    if log_outlier >= 0.0 {
        return usize::MAX;
    }

    ((1.0 - confidence).ln() / log_outlier).ceil().max(1.0) as usize
}

/// Sample `k` distinct indices from `0..n` into `buffer`
fn random_sample_into<R: Rng>(rng: &mut R, n: usize, k: usize, buffer: &mut Vec<usize>) {
    debug_assert!(k <= n, "cannot sample {} indices from {}", k, n);
    buffer.clear();

    if k <= n / 2 {
        // Floyd's algorithm
        for j in (n - k)..n {
            let t = rng.random_range(0..=j);
            if buffer.contains(&t) {
                buffer.push(j);
            } else {
                buffer.push(t);
            }
        }
    } else {
        buffer.extend(0..n);
        buffer.shuffle(rng);
        buffer.truncate(k);
    }
}
