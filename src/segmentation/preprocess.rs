use anyhow::Result;
use image::{imageops, RgbaImage};
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

    /// Preprocess an RGBA frame into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Drop alpha, convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbaImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        Ok(tensor)
    }

    /// Postprocess model output matte back to frame dimensions
    ///
    /// # Arguments
    /// * `matte` - Flattened matte at model resolution
    /// * `matte_width` - Width of the matte
    /// * `matte_height` - Height of the matte
    /// * `target_width` - Desired output width
    /// * `target_height` - Desired output height
    ///
    /// Returns: Resized coverage flattened in row-major order
    pub fn postprocess_matte(
        matte: &[f32],
        matte_width: u32,
        matte_height: u32,
        target_width: u32,
        target_height: u32,
    ) -> Result<Vec<f32>> {
        let _span = tracing::debug_span!("postprocess").entered();

        let expected = matte_width as usize * matte_height as usize;
        anyhow::ensure!(
            matte.len() == expected,
            "matte holds {} samples, expected {}x{}",
            matte.len(),
            matte_width,
            matte_height
        );

        if matte_width == target_width && matte_height == target_height {
            return Ok(matte.iter().map(|v| v.clamp(0.0, 1.0)).collect());
        }

        // Resize at 8-bit precision through a grayscale image
        let gray_image = image::GrayImage::from_fn(matte_width, matte_height, |x, y| {
            let idx = (y * matte_width + x) as usize;
            let value = (matte[idx] * 255.0).clamp(0.0, 255.0) as u8;
            image::Luma([value])
        });

        let resized = imageops::resize(
            &gray_image,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        );

        Ok(resized.pixels().map(|p| p[0] as f32 / 255.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn preprocess_produces_normalized_nchw() {
        let frame = RgbaImage::from_pixel(8, 4, Rgba([255, 0, 51, 7]));
        let tensor = Preprocessor::new(8, 4).preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 4, 8]);
        assert_eq!(tensor[[0, 0, 3, 7]], 1.0);
        assert_eq!(tensor[[0, 1, 0, 0]], 0.0);
        assert!((tensor[[0, 2, 2, 5]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn preprocess_resizes_to_model_input() {
        let frame = RgbaImage::new(64, 32);
        let tensor = Preprocessor::new(32, 16).preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 16, 32]);
    }

    #[test]
    fn postprocess_upscales_matte() {
        let matte = vec![1.0, 0.0, 1.0, 0.0];
        let out = Preprocessor::postprocess_matte(&matte, 2, 2, 8, 8).unwrap();
        assert_eq!(out.len(), 64);
        assert!(out.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(out[0] > 0.9);
        assert!(out[7] < 0.1);
    }

    #[test]
    fn postprocess_rejects_short_matte() {
        assert!(Preprocessor::postprocess_matte(&[0.5; 3], 2, 2, 2, 2).is_err());
    }
}
