use std::fmt;

use imageproc::geometric_transformations::Projection;

/// 2D similarity (or general affine) transform stored as the top two rows of
/// a homogeneous 3x3 matrix:
///
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
///
/// `apply` maps `(x, y)` to `(a*x + b*y + tx, c*x + d*y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub matrix: [[f64; 3]; 2],
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    pub fn from_matrix(matrix: [[f64; 3]; 2]) -> Self {
        Self { matrix }
    }

    /// Uniform scale and rotation (radians, counter-clockwise in a y-up frame)
    /// about the origin, followed by a translation.
    pub fn similarity(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            matrix: [[scale * cos, -scale * sin, tx], [scale * sin, scale * cos, ty]],
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::similarity(1.0, 0.0, tx, ty)
    }

    /// Rotation by `angle` about `(cx, cy)`
    pub fn rotation_about(cx: f64, cy: f64, angle: f64) -> Self {
        Transform::translation(-cx, -cy)
            .then(&Transform::similarity(1.0, angle, 0.0, 0.0))
            .then(&Transform::translation(cx, cy))
    }

    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        (a * x + b * y + tx, c * x + d * y + ty)
    }

    /// Transform that applies `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        let [[a1, b1, t1], [c1, d1, u1]] = self.matrix;
        let [[a2, b2, t2], [c2, d2, u2]] = next.matrix;
        Transform {
            matrix: [
                [a2 * a1 + b2 * c1, a2 * b1 + b2 * d1, a2 * t1 + b2 * u1 + t2],
                [c2 * a1 + d2 * c1, c2 * b1 + d2 * d1, c2 * t1 + d2 * u1 + u2],
            ],
        }
    }

    pub fn determinant(&self) -> f64 {
        let [[a, b, _], [c, d, _]] = self.matrix;
        a * d - b * c
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().flatten().all(|v| v.is_finite())
    }

    pub fn inverse(&self) -> Option<Transform> {
        let det = self.determinant();
        if !self.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        Some(Transform {
            matrix: [[ia, ib, -(ia * tx + ib * ty)], [ic, id, -(ic * tx + id * ty)]],
        })
    }

    /// Isotropic scale factor, exact for similarities
    pub fn scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    /// Rotation angle in radians, exact for similarities
    pub fn rotation(&self) -> f64 {
        let [[a, _, _], [c, _, _]] = self.matrix;
        c.atan2(a)
    }

    pub fn translation_part(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }

    /// Largest displacement between `self` and `other` over the corners of a
    /// `width` x `height` frame. For affine maps this bounds every interior point.
    pub fn max_corner_deviation(&self, other: &Transform, width: f64, height: f64) -> f64 {
        [(0.0, 0.0), (width, 0.0), (0.0, height), (width, height)]
            .iter()
            .map(|&(x, y)| {
                let (ax, ay) = self.apply(x, y);
                let (bx, by) = other.apply(x, y);
                (ax - bx).hypot(ay - by)
            })
            .fold(0.0, f64::max)
    }

    /// Forward projection for `imageproc` warping, `None` if not invertible.
    pub fn to_projection(&self) -> Option<Projection> {
        if self.inverse().is_none() {
            return None;
        }
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        Projection::from_matrix([
            a as f32, b as f32, tx as f32, //
            c as f32, d as f32, ty as f32, //
            0.0, 0.0, 1.0,
        ])
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (tx, ty) = self.translation_part();
        write!(
            f,
            "scale={:.4} rotation={:.3}deg translation=({:.2}, {:.2})",
            self.scale(),
            self.rotation().to_degrees(),
            tx,
            ty
        )
    }
}
