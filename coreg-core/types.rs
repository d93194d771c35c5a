use std::fmt;
use std::str::FromStr;

use crate::error::CoregError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Single-channel 8-bit image
pub type Image = image::GrayImage;

/// Length of a scale-invariant (SIFT) descriptor
pub const FLOAT_DESCRIPTOR_LEN: usize = 128;

/// Length in bytes of a binary (ORB) descriptor: 256 bits
pub const BINARY_DESCRIPTOR_LEN: usize = 32;

pub type FloatDescriptor = [f32; FLOAT_DESCRIPTOR_LEN];
pub type BinaryDescriptor = [u8; BINARY_DESCRIPTOR_LEN];

/// Detected salient location with detector metadata.
///
/// Coordinates are in pixels of the full-resolution input image, `angle` is in
/// radians measured from the +x axis towards +y (image rows grow downwards).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the meaningful neighbourhood
    pub size: f32,
    pub angle: f32,
    /// Detector specific strength, higher is stronger
    pub response: f32,
    /// Pyramid octave or level the keypoint was found on
    pub octave: i32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 0.0,
            angle: 0.0,
            response: 0.0,
            octave: 0,
        }
    }

    /// Euclidean pixel distance between two keypoint locations
    pub fn distance(&self, other: &Keypoint) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Float,
    Binary,
}

impl fmt::Display for DescriptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorKind::Float => write!(f, "float"),
            DescriptorKind::Binary => write!(f, "binary"),
        }
    }
}

/// Descriptors of one image, index-aligned with its keypoints.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptors {
    Float(Vec<FloatDescriptor>),
    Binary(Vec<BinaryDescriptor>),
}

impl Descriptors {
    pub fn empty(kind: DescriptorKind) -> Self {
        match kind {
            DescriptorKind::Float => Descriptors::Float(Vec::new()),
            DescriptorKind::Binary => Descriptors::Binary(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Descriptors::Float(d) => d.len(),
            Descriptors::Binary(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> DescriptorKind {
        match self {
            Descriptors::Float(_) => DescriptorKind::Float,
            Descriptors::Binary(_) => DescriptorKind::Binary,
        }
    }

    /// Keep only the descriptors at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            Descriptors::Float(d) => Descriptors::Float(indices.iter().map(|&i| d[i]).collect()),
            Descriptors::Binary(d) => Descriptors::Binary(indices.iter().map(|&i| d[i]).collect()),
        }
    }
}

/// A correspondence between keypoint `query_idx` of image 1 and keypoint
/// `train_idx` of image 2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub query_idx: usize,
    pub train_idx: usize,
    /// Descriptor-space distance, lower is more similar
    pub distance: f32,
}

impl Match {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}

/// The two nearest training descriptors of one query descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnnMatch {
    pub best: Match,
    pub second: Match,
}

impl KnnMatch {
    /// Lowe's ambiguity test
    pub fn passes_ratio(&self, threshold: f32) -> bool {
        self.best.distance < threshold * self.second.distance
    }
}

/// Anything that links a query keypoint to a train keypoint.
pub trait Correspondence {
    fn query_idx(&self) -> usize;
    fn train_idx(&self) -> usize;
}

impl Correspondence for Match {
    fn query_idx(&self) -> usize {
        self.query_idx
    }

    fn train_idx(&self) -> usize {
        self.train_idx
    }
}

impl Correspondence for KnnMatch {
    fn query_idx(&self) -> usize {
        self.best.query_idx
    }

    fn train_idx(&self) -> usize {
        self.best.train_idx
    }
}

/// Feature detector family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum DetectorMode {
    /// Difference-of-Gaussians keypoints with 128-float gradient descriptors (SIFT)
    #[default]
    #[cfg_attr(feature = "serde", serde(alias = "sift"))]
    ScaleInvariant,
    /// FAST keypoints with steered 256-bit BRIEF descriptors (ORB)
    #[cfg_attr(feature = "serde", serde(alias = "orb"))]
    Binary,
}

impl DetectorMode {
    pub fn descriptor_kind(self) -> DescriptorKind {
        match self {
            DetectorMode::ScaleInvariant => DescriptorKind::Float,
            DetectorMode::Binary => DescriptorKind::Binary,
        }
    }
}

impl fmt::Display for DetectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorMode::ScaleInvariant => write!(f, "SIFT"),
            DetectorMode::Binary => write!(f, "ORB"),
        }
    }
}

impl FromStr for DetectorMode {
    type Err = CoregError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sift" | "scale-invariant" | "scale_invariant" => Ok(DetectorMode::ScaleInvariant),
            "orb" | "binary" => Ok(DetectorMode::Binary),
            _ => Err(CoregError::UnsupportedMode(s.to_string())),
        }
    }
}

/// Legacy integer constants: 0 = SIFT, 1 = ORB
impl TryFrom<i32> for DetectorMode {
    type Error = CoregError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DetectorMode::ScaleInvariant),
            1 => Ok(DetectorMode::Binary),
            other => Err(CoregError::UnsupportedMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("sift".parse::<DetectorMode>().unwrap(), DetectorMode::ScaleInvariant);
        assert_eq!("ORB".parse::<DetectorMode>().unwrap(), DetectorMode::Binary);
        assert_eq!(
            "scale-invariant".parse::<DetectorMode>().unwrap(),
            DetectorMode::ScaleInvariant
        );
        assert!(matches!(
            "akaze".parse::<DetectorMode>(),
            Err(CoregError::UnsupportedMode(m)) if m == "akaze"
        ));
    }

    #[test]
    fn test_mode_from_legacy_constant() {
        assert_eq!(DetectorMode::try_from(0).unwrap(), DetectorMode::ScaleInvariant);
        assert_eq!(DetectorMode::try_from(1).unwrap(), DetectorMode::Binary);
        assert!(matches!(
            DetectorMode::try_from(2),
            Err(CoregError::UnsupportedMode(_))
        ));
        assert!(matches!(
            DetectorMode::try_from(-1),
            Err(CoregError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_descriptor_select_and_kind() {
        let d = Descriptors::Binary(vec![[0u8; 32], [1u8; 32], [2u8; 32]]);
        let picked = d.select(&[2, 0]);
        assert_eq!(picked, Descriptors::Binary(vec![[2u8; 32], [0u8; 32]]));
        assert_eq!(picked.kind(), DescriptorKind::Binary);
        assert!(Descriptors::empty(DescriptorKind::Float).is_empty());
    }

    #[test]
    fn test_ratio_criterion_is_strict() {
        let knn = KnnMatch {
            best: Match::new(0, 1, 75.0),
            second: Match::new(0, 2, 100.0),
        };
        assert!(!knn.passes_ratio(0.75));
        assert!(knn.passes_ratio(0.76));
        assert_eq!(knn.query_idx(), 0);
        assert_eq!(knn.train_idx(), 1);
    }

    #[test]
    fn test_keypoint_distance() {
        let a = Keypoint::new(0.0, 0.0);
        let b = Keypoint::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }
}
