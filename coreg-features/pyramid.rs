use image::imageops::{self, FilterType};
use image::GrayImage;

/// One level of a scale pyramid
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub level: usize,
    /// Factor from level coordinates back to the base image
    pub scale: f32,
    pub image: GrayImage,
}

/// Image pyramid operations for multi-scale feature detection
pub struct ImagePyramid;

impl ImagePyramid {
    /// Build up to `n_levels` levels, each `scale_factor` smaller than the
    /// previous one, stopping once a side would drop below `min_size`.
    pub fn build(img: &GrayImage, n_levels: usize, scale_factor: f32, min_size: u32) -> Vec<PyramidLevel> {
        let (width, height) = img.dimensions();
        let mut levels = Vec::with_capacity(n_levels);
        let mut scale = 1.0f32;

        for level in 0..n_levels {
            let w = (width as f32 / scale).round() as u32;
            let h = (height as f32 / scale).round() as u32;
            if w < min_size || h < min_size {
                break;
            }

            let image = if level == 0 {
                img.clone()
            } else {
                imageops::resize(img, w, h, FilterType::Triangle)
            };
            levels.push(PyramidLevel { level, scale, image });
            scale *= scale_factor;
        }

        levels
    }
}
