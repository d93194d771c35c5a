use crate::types::DescriptorKind;

/// Failures raised by the registration pipeline.
///
/// Every variant is raised where the problem is detected and propagated
/// unchanged, so callers can pick a recovery strategy by kind.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoregError {
    #[error("unsupported detector mode: {0}")]
    UnsupportedMode(String),

    #[error("insufficient descriptors: {found} available, at least {required} required")]
    InsufficientDescriptors { found: usize, required: usize },

    #[error("insufficient matches: {found} correspondences, at least {required} required")]
    InsufficientMatches { found: usize, required: usize },

    /// Shapes are reported as (width, height).
    #[error("shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("invalid image dimensions: {width}x{height} (must be > 0)")]
    InvalidImage { width: u32, height: u32 },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("cannot match {query} descriptors against {train} descriptors")]
    DescriptorKindMismatch {
        query: DescriptorKind,
        train: DescriptorKind,
    },

    #[error("transform is not invertible")]
    DegenerateTransform,
}

impl CoregError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        CoregError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type CoregResult<T> = Result<T, CoregError>;

/// Check that two images can be compared pixel by pixel.
pub fn ensure_same_shape(a: &image::GrayImage, b: &image::GrayImage) -> CoregResult<()> {
    if a.dimensions() != b.dimensions() {
        return Err(CoregError::ShapeMismatch {
            left: a.dimensions(),
            right: b.dimensions(),
        });
    }
    Ok(())
}

/// Reject zero-sized images.
pub fn ensure_non_empty(image: &image::GrayImage) -> CoregResult<()> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(CoregError::InvalidImage { width, height });
    }
    Ok(())
}
