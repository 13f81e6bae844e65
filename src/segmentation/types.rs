use super::draw;
use crate::config::SegmentConfig;
use crate::error::CompositeError;
use anyhow::Result;
use image::{imageops, GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};

/// Coverage at or above which a mask sample counts as person
pub const FOREGROUND_CUTOFF: f32 = 0.5;

/// Per-pixel person coverage aligned 1:1 with a frame.
///
/// 0.0 = background, 1.0 = foreground. Providers threshold their raw matte
/// so shipped masks are binary, but soft values are valid input to every
/// draw routine.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    coverage: ImageBuffer<Luma<f32>, Vec<f32>>,
}

impl Mask {
    /// Wrap a row-major coverage buffer
    pub fn from_coverage(width: u32, height: u32, coverage: Vec<f32>) -> Result<Self, CompositeError> {
        let expected = width as usize * height as usize;
        let actual = coverage.len();
        let length_error = CompositeError::MaskLength {
            width,
            height,
            expected,
            actual,
        };
        if actual != expected {
            return Err(length_error);
        }
        let coverage = ImageBuffer::from_raw(width, height, coverage).ok_or(length_error)?;
        Ok(Self { coverage })
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> f32,
    {
        Self {
            coverage: ImageBuffer::from_fn(width, height, |x, y| Luma([f(x, y).clamp(0.0, 1.0)])),
        }
    }

    pub fn width(&self) -> u32 {
        self.coverage.width()
    }

    pub fn height(&self) -> u32 {
        self.coverage.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.coverage.dimensions()
    }

    pub fn coverage(&self, x: u32, y: u32) -> f32 {
        self.coverage.get_pixel(x, y)[0]
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.coverage(x, y) >= FOREGROUND_CUTOFF
    }

    /// Row-major coverage samples
    pub fn samples(&self) -> &[f32] {
        self.coverage.as_raw()
    }

    /// Binarize: coverage at or above `threshold` becomes 1.0, the rest 0.0
    pub fn thresholded(mut self, threshold: f32) -> Self {
        for sample in self.coverage.iter_mut() {
            *sample = if *sample >= threshold { 1.0 } else { 0.0 };
        }
        self
    }

    /// Mirror left to right
    pub fn mirrored(&self) -> Self {
        Self {
            coverage: imageops::flip_horizontal(&self.coverage),
        }
    }

    /// Soften the person/background edge with a gaussian of `radius` sigma
    pub fn feathered(&self, radius: u32) -> Self {
        if radius == 0 {
            return self.clone();
        }
        // Blur at 8-bit precision, the same way the matte is resized
        let gray = GrayImage::from_fn(self.width(), self.height(), |x, y| {
            Luma([(self.coverage(x, y) * 255.0).round().clamp(0.0, 255.0) as u8])
        });
        let blurred = imageops::blur(&gray, radius as f32);
        Self {
            coverage: ImageBuffer::from_fn(self.width(), self.height(), |x, y| {
                Luma([blurred.get_pixel(x, y)[0] as f32 / 255.0])
            }),
        }
    }

    pub(crate) fn ensure_matches(&self, frame: &RgbaImage) -> Result<(), CompositeError> {
        if self.dimensions() == frame.dimensions() {
            Ok(())
        } else {
            Err(CompositeError::DimensionMismatch {
                frame_width: frame.width(),
                frame_height: frame.height(),
                mask_width: self.width(),
                mask_height: self.height(),
            })
        }
    }
}

/// Trait for segmentation providers.
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
///
/// Besides `segment`, providers expose the draw routines that pair with their
/// masks. The defaults are software implementations in [`draw`]; a provider
/// with an accelerated path can override them.
pub trait SegmentationProvider: Send {
    /// Classify every pixel of `frame`.
    ///
    /// # Returns
    /// * Mask with the frame's dimensions, mirrored when
    ///   `config.flip_horizontal` is set
    fn segment(&mut self, frame: &RgbaImage, config: &SegmentConfig) -> Result<Mask>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Called whenever the scheduler (re)starts a run.
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Blur the background of `frame`, keeping masked person pixels sharp
    fn draw_blur_composite(
        &self,
        frame: &RgbaImage,
        mask: &Mask,
        background_blur: u32,
        edge_blur: u32,
        mirror: bool,
    ) -> Result<RgbaImage> {
        Ok(draw::blur_composite(frame, mask, background_blur, edge_blur, mirror)?)
    }

    /// Render a mask as a two-color RGBA overlay
    fn mask_to_overlay(&self, mask: &Mask, foreground: Rgba<u8>, background: Rgba<u8>) -> RgbaImage {
        draw::mask_to_overlay(mask, foreground, background)
    }

    /// Alpha-blend `overlay` onto `frame`
    fn draw_mask_composite(
        &self,
        frame: &RgbaImage,
        overlay: &RgbaImage,
        opacity: f32,
        edge_blur: u32,
        mirror: bool,
    ) -> Result<RgbaImage> {
        Ok(draw::mask_composite(frame, overlay, opacity, edge_blur, mirror)?)
    }
}
