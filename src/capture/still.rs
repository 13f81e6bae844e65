use super::CaptureSource;
use anyhow::{Context, Result};
use image::{imageops, RgbaImage};
use std::path::Path;

/// Serves the same image as every frame.
///
/// Stands in for a camera when none is available.
pub struct StillCapture {
    frame: RgbaImage,
}

impl StillCapture {
    pub fn new(frame: RgbaImage) -> Self {
        Self { frame }
    }

    /// Decode `path` and scale it to `width`x`height`
    pub fn open<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Using still image {} as camera input", path.display());

        let image = image::open(path)
            .with_context(|| format!("Failed to open input image {}", path.display()))?
            .to_rgba8();

        let frame = if image.dimensions() == (width, height) {
            image
        } else {
            imageops::resize(&image, width, height, imageops::FilterType::Triangle)
        };

        Ok(Self { frame })
    }
}

impl CaptureSource for StillCapture {
    fn capture_frame(&mut self) -> Result<RgbaImage> {
        Ok(self.frame.clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn repeats_the_same_frame() {
        let mut capture = StillCapture::new(RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])));
        assert_eq!(capture.resolution(), (3, 2));
        let first = capture.capture_frame().unwrap();
        let second = capture.capture_frame().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(StillCapture::open("/nonexistent/frame.png", 4, 4).is_err());
    }
}
