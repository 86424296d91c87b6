use crate::frame::Mask;
use anyhow::{ensure, Result};
use image::{imageops, Luma, RgbaImage};
use ndarray::Array4;

/// Preprocessor for converting RGBA frames to model input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGBA image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Drop alpha, convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbaImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = source.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                tensor[[0, c, y, x]] = pixel[c] as f32 / 255.0;
            }
        }

        Ok(tensor)
    }

    /// Quantize a flattened [0, 1] matte into a mask at the model resolution
    pub fn matte_to_mask(matte: &[f32], width: u32, height: u32) -> Result<Mask> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            matte.len() == (width * height) as usize,
            "matte has {} values, expected {}x{}",
            matte.len(),
            width,
            height
        );

        Ok(Mask::from_fn(width, height, |x, y| {
            let idx = (y * width + x) as usize;
            Luma([(matte[idx] * 255.0).round().clamp(0.0, 255.0) as u8])
        }))
    }
}
