mod loopback;

pub use loopback::V4L2Output;

use anyhow::Result;
use image::{Rgba, RgbaImage};

/// Trait for output destinations (the canvas frames are drawn on)
pub trait OutputSink: Send {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()>;

    /// Blank the output
    fn clear(&mut self) -> Result<()> {
        let (width, height) = self.resolution();
        self.write_frame(&RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])))
    }

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);
}
