//! Registration of a moving image onto a reference image.
//!
//! [`AlignmentPipeline`] chains the stages: descriptor [`matcher`], match
//! [`filter`], robust similarity [`estimator`], [`warp`] and similarity
//! [`metrics`]. Each stage is usable on its own.

pub mod estimator;
pub mod filter;
pub mod matcher;
pub mod metrics;
pub mod pipeline;
pub mod transform;
pub mod warp;

pub use estimator::{estimate_similarity, Estimate, TransformEstimator, MIN_CORRESPONDENCES};
pub use filter::{ratio_filter, spatial_filter, MatchFilter};
pub use matcher::{match_descriptors, Matches};
pub use metrics::{mean_squared_error, mutual_information, SimilarityDelta, SimilarityReport};
pub use pipeline::{align, evaluate, Alignment, AlignmentPipeline, Evaluation, MatchStats};
pub use transform::Transform;
pub use warp::{warp, Warper};
