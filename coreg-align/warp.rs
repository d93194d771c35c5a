use coreg_core::{ensure_non_empty, CoregError, CoregResult, Image, Interpolation, WarpConfig};
use image::Luma;
use imageproc::geometric_transformations::{self as geo, warp_into};

use crate::transform::Transform;

/// Resamples an image under a transform onto a fixed output grid
#[derive(Debug, Clone, Copy, Default)]
pub struct Warper {
    config: WarpConfig,
}

impl Warper {
    pub fn new(config: WarpConfig) -> Self {
        Self { config }
    }

    /// Output pixel `p` takes the input sampled at `transform⁻¹(p)`; samples
    /// falling outside the input take the configured fill value.
    ///
    /// `output_shape` is `(height, width)`.
    pub fn apply(&self, image: &Image, transform: &Transform, output_shape: (u32, u32)) -> CoregResult<Image> {
        ensure_non_empty(image)?;
        let (height, width) = output_shape;
        if height == 0 || width == 0 {
            return Err(CoregError::InvalidImage { width, height });
        }
        let projection = transform.to_projection().ok_or(CoregError::DegenerateTransform)?;

        let mut out = Image::new(width, height);
        warp_into(
            image,
            &projection,
            to_imageproc(self.config.interpolation),
            Luma([self.config.fill]),
            &mut out,
        );
        Ok(out)
    }
}

fn to_imageproc(interpolation: Interpolation) -> geo::Interpolation {
    match interpolation {
        Interpolation::Nearest => geo::Interpolation::Nearest,
        Interpolation::Bilinear => geo::Interpolation::Bilinear,
        Interpolation::Bicubic => geo::Interpolation::Bicubic,
    }
}

/// Warp with a one-off [`Warper`]
pub fn warp(image: &Image, transform: &Transform, output_shape: (u32, u32), config: &WarpConfig) -> CoregResult<Image> {
    Warper::new(*config).apply(image, transform, output_shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> Image {
        Image::from_fn(width, height, |x, y| Luma([((x * 3 + y * 5) % 256) as u8]))
    }

    #[test]
    fn test_identity_keeps_interior() {
        let img = ramp(40, 30);
        let out = warp(&img, &Transform::IDENTITY, (30, 40), &WarpConfig::default()).unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        for y in 0..29 {
            for x in 0..39 {
                assert_eq!(out.get_pixel(x, y), img.get_pixel(x, y));
            }
        }
    }

    #[test]
    fn test_translation_moves_content_and_fills() {
        let img = ramp(40, 40);
        let config = WarpConfig {
            fill: 7,
            ..WarpConfig::default()
        };
        let out = warp(&img, &Transform::translation(5.0, 3.0), (40, 40), &config).unwrap();
        assert_eq!(out.get_pixel(15, 13), img.get_pixel(10, 10));
        assert_eq!(out.get_pixel(2, 20)[0], 7);
        assert_eq!(out.get_pixel(20, 1)[0], 7);
    }

    #[test]
    fn test_output_shape_follows_request() {
        let img = ramp(20, 10);
        for interpolation in [Interpolation::Nearest, Interpolation::Bilinear, Interpolation::Bicubic] {
            let config = WarpConfig {
                interpolation,
                fill: 0,
            };
            let out = warp(&img, &Transform::IDENTITY, (25, 15), &config).unwrap();
            assert_eq!(out.dimensions(), (15, 25));
        }
    }

    #[test]
    fn test_nearest_translation_exact() {
        let img = ramp(32, 32);
        let config = WarpConfig {
            interpolation: Interpolation::Nearest,
            fill: 0,
        };
        let out = warp(&img, &Transform::translation(-4.0, 2.0), (32, 32), &config).unwrap();
        for y in 2..32 {
            for x in 0..28 {
                assert_eq!(out.get_pixel(x, y), img.get_pixel(x + 4, y - 2));
            }
        }
    }

    #[test]
    fn test_singular_transform_rejected() {
        let img = ramp(10, 10);
        let flat = Transform::similarity(0.0, 0.0, 1.0, 1.0);
        assert!(matches!(
            warp(&img, &flat, (10, 10), &WarpConfig::default()),
            Err(CoregError::DegenerateTransform)
        ));
    }

    #[test]
    fn test_empty_shapes_rejected() {
        let img = ramp(10, 10);
        assert!(matches!(
            warp(&img, &Transform::IDENTITY, (0, 10), &WarpConfig::default()),
            Err(CoregError::InvalidImage { .. })
        ));
        assert!(matches!(
            warp(&Image::new(0, 5), &Transform::IDENTITY, (10, 10), &WarpConfig::default()),
            Err(CoregError::InvalidImage { .. })
        ));
    }
}
