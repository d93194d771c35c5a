//! Shared vocabulary for feature-based co-registration of label-free and
//! stained microscopy images: images, keypoints, descriptors, matches, the
//! error taxonomy and the configuration surface.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AlignConfig, AlignConfigBuilder, ClaheConfig, Interpolation, RansacConfig, WarpConfig};
pub use error::{ensure_non_empty, ensure_same_shape, CoregError, CoregResult};
pub use types::{
    BinaryDescriptor, Correspondence, DescriptorKind, Descriptors, DetectorMode, FloatDescriptor, Image,
    Keypoint, KnnMatch, Match, BINARY_DESCRIPTOR_LEN, FLOAT_DESCRIPTOR_LEN,
};
