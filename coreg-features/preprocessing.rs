use coreg_core::{ensure_non_empty, ClaheConfig, CoregResult};
use image::{DynamicImage, GrayImage};

const HIST_SIZE: usize = 256;

/// Contrast Limited Adaptive Histogram Equalization.
///
/// The image is split into a `rows x cols` grid of tiles. Each tile gets a
/// clipped-histogram equalization lookup table and every output pixel blends
/// the tables of the four nearest tile centres bilinearly, so tile borders do
/// not show.
#[derive(Debug, Clone)]
pub struct Clahe {
    config: ClaheConfig,
}

impl Clahe {
    pub fn new(config: ClaheConfig) -> CoregResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Equalize a single-channel image; output has the same shape
    pub fn apply(&self, img: &GrayImage) -> CoregResult<GrayImage> {
        ensure_non_empty(img)?;
        let (width, height) = img.dimensions();
        let (rows, cols) = self.config.tile_grid;

        // More tiles than pixels along an axis degenerates to one pixel per tile.
        let tile_w = width.div_ceil(cols.min(width));
        let tile_h = height.div_ceil(rows.min(height));
        let tiles_x = width.div_ceil(tile_w) as usize;
        let tiles_y = height.div_ceil(tile_h) as usize;

        let luts = self.compute_tile_luts(img, tile_w, tile_h, tiles_x, tiles_y);
        log::trace!(
            "CLAHE {}x{}: {}x{} tiles of {}x{} px",
            width,
            height,
            tiles_x,
            tiles_y,
            tile_w,
            tile_h
        );

        Ok(Self::interpolate(img, &luts, tile_w, tile_h, tiles_x, tiles_y))
    }

    /// Convert to 8-bit luminance first when handed a colour image
    pub fn apply_dynamic(&self, img: &DynamicImage) -> CoregResult<GrayImage> {
        match img {
            DynamicImage::ImageLuma8(gray) => self.apply(gray),
            other => self.apply(&other.to_luma8()),
        }
    }

    fn compute_tile_luts(
        &self,
        img: &GrayImage,
        tile_w: u32,
        tile_h: u32,
        tiles_x: usize,
        tiles_y: usize,
    ) -> Vec<[u8; HIST_SIZE]> {
        let (width, height) = img.dimensions();
        let mut luts = Vec::with_capacity(tiles_x * tiles_y);

        for ty in 0..tiles_y as u32 {
            for tx in 0..tiles_x as u32 {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = (x0 + tile_w).min(width);
                let y1 = (y0 + tile_h).min(height);

                let mut histogram = [0u32; HIST_SIZE];
                for y in y0..y1 {
                    for x in x0..x1 {
                        histogram[img.get_pixel(x, y)[0] as usize] += 1;
                    }
                }

                let area = (x1 - x0) * (y1 - y0);
                self.clip_histogram(&mut histogram, area);
                luts.push(Self::equalization_lut(&histogram, area));
            }
        }

        luts
    }

    /// Clamp bins above the limit and spread the excess over all bins
    fn clip_histogram(&self, histogram: &mut [u32; HIST_SIZE], area: u32) {
        let limit = ((self.config.clip_limit * area as f32 / HIST_SIZE as f32) as u32).max(1);

        let mut excess = 0u32;
        for count in histogram.iter_mut() {
            if *count > limit {
                excess += *count - limit;
                *count = limit;
            }
        }

        let batch = excess / HIST_SIZE as u32;
        let mut residual = excess - batch * HIST_SIZE as u32;
        for count in histogram.iter_mut() {
            *count += batch;
        }

        if residual > 0 {
            let step = (HIST_SIZE / residual as usize).max(1);
            for count in histogram.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *count += 1;
                residual -= 1;
            }
        }
    }

    fn equalization_lut(histogram: &[u32; HIST_SIZE], area: u32) -> [u8; HIST_SIZE] {
        let scale = 255.0 / area.max(1) as f32;
        let mut lut = [0u8; HIST_SIZE];
        let mut cumulative = 0u32;
        for (entry, &count) in lut.iter_mut().zip(histogram.iter()) {
            cumulative += count;
            *entry = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
        }
        lut
    }

    fn interpolate(
        img: &GrayImage,
        luts: &[[u8; HIST_SIZE]],
        tile_w: u32,
        tile_h: u32,
        tiles_x: usize,
        tiles_y: usize,
    ) -> GrayImage {
        let (width, height) = img.dimensions();

        // Neighbouring tile columns and blend weight for every x, computed once.
        let columns: Vec<(usize, usize, f32)> = (0..width)
            .map(|x| Self::neighbour_tiles(x, tile_w, tiles_x))
            .collect();

        GrayImage::from_fn(width, height, |x, y| {
            let (ty1, ty2, ya) = Self::neighbour_tiles(y, tile_h, tiles_y);
            let (tx1, tx2, xa) = columns[x as usize];
            let v = img.get_pixel(x, y)[0] as usize;

            let top = luts[ty1 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty1 * tiles_x + tx2][v] as f32 * xa;
            let bottom = luts[ty2 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty2 * tiles_x + tx2][v] as f32 * xa;

            image::Luma([(top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8])
        })
    }

    /// Tiles whose centres bracket `pos`, plus the weight of the second one
    fn neighbour_tiles(pos: u32, tile_size: u32, tiles: usize) -> (usize, usize, f32) {
        let f = pos as f32 / tile_size as f32 - 0.5;
        let first = f.floor();
        let weight = f - first;
        let lo = (first.max(0.0) as usize).min(tiles - 1);
        let hi = ((first + 1.0).max(0.0) as usize).min(tiles - 1);
        (lo, hi, weight)
    }
}

/// Equalize `img` with the given clip limit and (rows, cols) tile grid
pub fn clahe(img: &GrayImage, clip_limit: f32, tile_grid: (u32, u32)) -> CoregResult<GrayImage> {
    Clahe::new(ClaheConfig {
        clip_limit,
        tile_grid,
    })?
    .apply(img)
}

/// Same as [`clahe`] for images of any colour type
pub fn clahe_dynamic(img: &DynamicImage, config: &ClaheConfig) -> CoregResult<GrayImage> {
    Clahe::new(*config)?.apply_dynamic(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coreg_core::CoregError;
    use image::{Luma, Rgb, RgbImage};
    use proptest::prelude::*;

    fn create_gradient_image(width: u32, height: u32, lo: u8, hi: u8) -> GrayImage {
        let span = (hi - lo) as f32;
        GrayImage::from_fn(width, height, |x, y| {
            let t = (x + y) as f32 / (width + height - 2).max(1) as f32;
            Luma([lo + (t * span) as u8])
        })
    }

    fn create_noise_image(width: u32, height: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ seed;
            h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
            Luma([(h >> 24) as u8 / 4 + 100])
        })
    }

    fn value_range(img: &GrayImage) -> (u8, u8) {
        let min = img.pixels().map(|p| p[0]).min().unwrap();
        let max = img.pixels().map(|p| p[0]).max().unwrap();
        (min, max)
    }

    fn std_dev(img: &GrayImage) -> f64 {
        let n = img.len() as f64;
        let mean = img.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
        (img.pixels().map(|p| (p[0] as f64 - mean).powi(2)).sum::<f64>() / n).sqrt()
    }

    #[test]
    fn test_output_shape_matches_input() {
        let img = create_gradient_image(97, 61, 40, 90);
        let out = clahe(&img, 18.0, (8, 8)).unwrap();
        assert_eq!(out.dimensions(), (97, 61));
    }

    #[test]
    fn test_deterministic() {
        let img = create_noise_image(128, 96, 7);
        let a = clahe(&img, 18.0, (8, 8)).unwrap();
        let b = clahe(&img, 18.0, (8, 8)).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn test_low_contrast_is_stretched() {
        let img = create_gradient_image(128, 128, 100, 140);
        let out = clahe(&img, 18.0, (4, 4)).unwrap();
        let (in_lo, in_hi) = value_range(&img);
        let (out_lo, out_hi) = value_range(&out);
        assert!(out_hi - out_lo > in_hi - in_lo);
    }

    #[test]
    fn test_clip_limit_bounds_amplification() {
        let img = create_noise_image(128, 128, 3);
        let gentle = clahe(&img, 1.0, (8, 8)).unwrap();
        let strong = clahe(&img, 40.0, (8, 8)).unwrap();
        assert!(std_dev(&strong) > std_dev(&gentle));
    }

    #[test]
    fn test_more_tiles_than_pixels() {
        let img = create_gradient_image(5, 3, 0, 255);
        let out = clahe(&img, 2.0, (8, 8)).unwrap();
        assert_eq!(out.dimensions(), (5, 3));
    }

    #[test]
    fn test_invalid_parameters() {
        let img = create_gradient_image(16, 16, 0, 255);
        assert!(matches!(
            clahe(&img, -1.0, (8, 8)),
            Err(CoregError::InvalidParameter { .. })
        ));
        assert!(matches!(
            clahe(&img, 2.0, (8, 0)),
            Err(CoregError::InvalidParameter { .. })
        ));
        assert!(matches!(
            clahe(&GrayImage::new(0, 10), 2.0, (8, 8)),
            Err(CoregError::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_colour_input_converted_to_luminance() {
        let rgb = RgbImage::from_fn(32, 32, |x, _| Rgb([x as u8 * 4, x as u8 * 4, x as u8 * 4]));
        let dynamic = DynamicImage::ImageRgb8(rgb);
        let out = clahe_dynamic(&dynamic, &ClaheConfig::default()).unwrap();
        let expected = clahe(&dynamic.to_luma8(), 18.0, (8, 8)).unwrap();
        assert_eq!(out, expected);
    }

    proptest! {
        #[test]
        fn prop_shape_preserved_and_repeatable(
            width in 1u32..40,
            height in 1u32..40,
            seed in any::<u32>(),
            clip in 0.5f32..30.0,
            rows in 1u32..10,
            cols in 1u32..10,
        ) {
            let img = create_noise_image(width, height, seed);
            let a = clahe(&img, clip, (rows, cols)).unwrap();
            let b = clahe(&img, clip, (rows, cols)).unwrap();
            prop_assert_eq!(a.dimensions(), (width, height));
            prop_assert_eq!(a.as_raw(), b.as_raw());
        }
    }
}
