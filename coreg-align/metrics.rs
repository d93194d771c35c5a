//! Pixelwise similarity between two same-shaped images.

use std::fmt;

use coreg_core::{ensure_non_empty, ensure_same_shape, CoregError, CoregResult, Image};

/// Mutual information in bits from the joint intensity histogram.
///
/// Intensities are binned uniformly over `[0, 256)`, so identical inputs
/// always share bin edges. The result is never negative.
pub fn mutual_information(a: &Image, b: &Image, bins: usize) -> CoregResult<f64> {
    ensure_same_shape(a, b)?;
    ensure_non_empty(a)?;
    if bins == 0 || bins > 256 {
        return Err(CoregError::InvalidParameter {
            name: "bins",
            reason: format!("{} (must be in 1..=256)", bins),
        });
    }

    let mut joint = vec![0u64; bins * bins];
    for (pa, pb) in a.as_raw().iter().zip(b.as_raw()) {
        joint[bin_of(*pa, bins) * bins + bin_of(*pb, bins)] += 1;
    }

    let mut marginal_a = vec![0u64; bins];
    let mut marginal_b = vec![0u64; bins];
    for i in 0..bins {
        for j in 0..bins {
            let c = joint[i * bins + j];
            marginal_a[i] += c;
            marginal_b[j] += c;
        }
    }

    let total = a.as_raw().len() as f64;
    let mut mi = 0.0;
    for i in 0..bins {
        for j in 0..bins {
            let c = joint[i * bins + j];
            if c == 0 {
                continue;
            }
            let p_ab = c as f64 / total;
            let ratio = c as f64 * total / (marginal_a[i] as f64 * marginal_b[j] as f64);
            mi += p_ab * ratio.log2();
        }
    }
    Ok(mi.max(0.0))
}

#[inline]
fn bin_of(value: u8, bins: usize) -> usize {
    value as usize * bins / 256
}

/// Mean of squared intensity differences
pub fn mean_squared_error(a: &Image, b: &Image) -> CoregResult<f64> {
    ensure_same_shape(a, b)?;
    ensure_non_empty(a)?;
    let sum: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| {
            let d = x.abs_diff(y) as u64;
            d * d
        })
        .sum();
    Ok(sum as f64 / a.as_raw().len() as f64)
}

/// Both similarity scores for one image pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityReport {
    pub mutual_information: f64,
    pub mean_squared_error: f64,
    /// (width, height) of the compared images
    pub shape: (u32, u32),
}

impl SimilarityReport {
    pub fn compute(a: &Image, b: &Image, bins: usize) -> CoregResult<Self> {
        Ok(Self {
            mutual_information: mutual_information(a, b, bins)?,
            mean_squared_error: mean_squared_error(a, b)?,
            shape: a.dimensions(),
        })
    }

    /// Change from `self` to `after`
    pub fn delta_to(&self, after: &SimilarityReport) -> SimilarityDelta {
        SimilarityDelta {
            mutual_information: after.mutual_information - self.mutual_information,
            mean_squared_error: after.mean_squared_error - self.mean_squared_error,
        }
    }
}

impl fmt::Display for SimilarityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MI={:.4} bits, MSE={:.2}",
            self.mutual_information, self.mean_squared_error
        )
    }
}

/// after - before for each score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityDelta {
    pub mutual_information: f64,
    pub mean_squared_error: f64,
}

impl SimilarityDelta {
    /// Higher MI and lower MSE both count as better alignment
    pub fn improved(&self) -> bool {
        self.mutual_information > 0.0 && self.mean_squared_error < 0.0
    }
}

impl fmt::Display for SimilarityDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dMI={:+.4} bits, dMSE={:+.2}",
            self.mutual_information, self.mean_squared_error
        )
    }
}
