mod still;
mod v4l_capture;

pub use still::StillCapture;
pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbaImage;

/// Trait for camera capture sources
pub trait CaptureSource: Send {
    /// Capture a single frame
    fn capture_frame(&mut self) -> Result<RgbaImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
