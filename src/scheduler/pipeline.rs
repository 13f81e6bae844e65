use crate::capture::CaptureSource;
use crate::compositor::{Compositor, Effect};
use crate::config::{EffectKind, SegmentConfig};
use crate::error::CompositeError;
use crate::output::OutputSink;
use crate::segmentation::SegmentationProvider;
use anyhow::{Context, Result};
use image::{imageops, RgbaImage};
use std::time::{Duration, Instant};

/// Frames between timing reports
const STATS_INTERVAL: u64 = 30;

/// Everything one frame passes through: capture, provider, compositor, output
pub struct Pipeline {
    capture: Box<dyn CaptureSource>,
    provider: Option<Box<dyn SegmentationProvider>>,
    compositor: Compositor,
    output: Box<dyn OutputSink>,
    segment_config: SegmentConfig,
    stats: FrameStats,
}

impl Pipeline {
    /// Assemble a pipeline. The mask is mirrored exactly when the compositor
    /// mirrors the frame, whatever `segment_config.flip_horizontal` says.
    pub fn new(
        capture: Box<dyn CaptureSource>,
        provider: Option<Box<dyn SegmentationProvider>>,
        compositor: Compositor,
        output: Box<dyn OutputSink>,
        segment_config: SegmentConfig,
    ) -> Self {
        let segment_config = SegmentConfig {
            flip_horizontal: compositor.options().mirror,
            ..segment_config
        };
        Self {
            capture,
            provider,
            compositor,
            output,
            segment_config,
            stats: FrameStats::default(),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn compositor_mut(&mut self) -> &mut Compositor {
        &mut self.compositor
    }

    /// Forget temporal state before a new run
    pub fn reset(&mut self) {
        if let Some(provider) = self.provider.as_deref_mut() {
            provider.reset_state();
        }
        self.stats = FrameStats::default();
    }

    /// Capture a frame and apply `kind` to it
    pub fn render(&mut self, kind: EffectKind) -> Result<RgbaImage> {
        let effect = self.compositor.effect(kind);

        let capture_start = Instant::now();
        let frame = self
            .capture
            .capture_frame()
            .context("Failed to capture frame")?;
        self.stats.capture += capture_start.elapsed();

        if let Effect::Off { mirror } = effect {
            let composite_start = Instant::now();
            let output = self.compositor.passthrough(&frame, mirror);
            self.stats.composite += composite_start.elapsed();
            return Ok(output);
        }

        let provider = self
            .provider
            .as_deref_mut()
            .ok_or(CompositeError::MissingProvider(kind))?;

        // Masks are produced at canvas size
        let (width, height) = self.compositor.canvas_size();
        let frame = if frame.dimensions() == (width, height) {
            frame
        } else {
            imageops::resize(&frame, width, height, imageops::FilterType::Triangle)
        };

        let segment_start = Instant::now();
        let mask = provider
            .segment(&frame, &self.segment_config)
            .context("Failed to segment frame")?;
        self.stats.segment += segment_start.elapsed();

        let composite_start = Instant::now();
        let output = self
            .compositor
            .composite(&effect, &frame, &mask, &*provider)
            .with_context(|| format!("Failed to composite {} effect", kind))?;
        self.stats.composite += composite_start.elapsed();

        Ok(output)
    }

    /// Draw a finished frame on the output
    pub fn present(&mut self, frame: &RgbaImage) -> Result<()> {
        let output_start = Instant::now();
        self.output
            .write_frame(frame)
            .context("Failed to write frame")?;
        self.stats.output += output_start.elapsed();

        self.stats.frames += 1;
        if self.stats.frames % STATS_INTERVAL == 0 {
            self.stats.log(self.provider.is_some());
        }
        Ok(())
    }

    /// Blank the output
    pub fn clear(&mut self) -> Result<()> {
        self.output.clear()
    }
}

/// Accumulated per-stage timings for the current run
#[derive(Debug, Default)]
struct FrameStats {
    frames: u64,
    capture: Duration,
    segment: Duration,
    composite: Duration,
    output: Duration,
}

impl FrameStats {
    fn average_ms(&self, total: Duration) -> f64 {
        total.as_secs_f64() * 1000.0 / self.frames.max(1) as f64
    }

    fn log(&self, segmenting: bool) {
        let capture_ms = self.average_ms(self.capture);
        let segment_ms = self.average_ms(self.segment);
        let composite_ms = self.average_ms(self.composite);
        let output_ms = self.average_ms(self.output);
        let total_ms = capture_ms + segment_ms + composite_ms + output_ms;
        let fps = if total_ms > 0.0 { 1000.0 / total_ms } else { 0.0 };

        if segmenting {
            tracing::info!(
                "Frame {}: capture={:.1}ms, segment={:.1}ms, composite={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}",
                self.frames,
                capture_ms,
                segment_ms,
                composite_ms,
                output_ms,
                total_ms,
                fps
            );
        } else {
            tracing::info!(
                "Frame {}: capture={:.1}ms, composite={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}",
                self.frames,
                capture_ms,
                composite_ms,
                output_ms,
                total_ms,
                fps
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StillCapture;
    use crate::config::{DrawOptions, FitMode};
    use crate::segmentation::Mask;
    use image::Rgba;

    const WIDTH: u32 = 8;
    const HEIGHT: u32 = 4;
    const PERSON: Rgba<u8> = Rgba([200, 40, 40, 255]);
    const WALL: Rgba<u8> = Rgba([90, 90, 90, 255]);
    const BACKGROUND: Rgba<u8> = Rgba([0, 255, 0, 255]);

    /// Sees a person in the left half of the camera image
    struct LeftHalf;

    impl SegmentationProvider for LeftHalf {
        fn segment(&mut self, frame: &RgbaImage, config: &SegmentConfig) -> Result<Mask> {
            let half = frame.width() / 2;
            let mask = Mask::from_fn(frame.width(), frame.height(), |x, _| {
                if x < half {
                    1.0
                } else {
                    0.0
                }
            });
            Ok(if config.flip_horizontal {
                mask.mirrored()
            } else {
                mask
            })
        }
    }

    struct Discard;

    impl OutputSink for Discard {
        fn write_frame(&mut self, _frame: &RgbaImage) -> Result<()> {
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (WIDTH, HEIGHT)
        }
    }

    fn pipeline(mirror: bool, flip_horizontal: bool) -> Pipeline {
        let camera = RgbaImage::from_fn(WIDTH, HEIGHT, |x, _| {
            if x < WIDTH / 2 {
                PERSON
            } else {
                WALL
            }
        });
        let options = DrawOptions {
            mirror,
            fit: FitMode::Stretch,
            ..DrawOptions::default()
        };
        let mut compositor = Compositor::new(options, WIDTH, HEIGHT);
        compositor.set_background(RgbaImage::from_pixel(WIDTH, HEIGHT, BACKGROUND));
        Pipeline::new(
            Box::new(StillCapture::new(camera)),
            Some(Box::new(LeftHalf)),
            compositor,
            Box::new(Discard),
            SegmentConfig {
                flip_horizontal,
                ..SegmentConfig::default()
            },
        )
    }

    #[test]
    fn mirrored_mask_lines_up_with_mirrored_frame() {
        // The segment config disagrees with the draw options on purpose
        for mirror in [false, true] {
            let mut pipeline = pipeline(mirror, !mirror);
            let out = pipeline.render(EffectKind::Image).unwrap();

            let (person_x, background_x) = if mirror { (WIDTH - 1, 0) } else { (0, WIDTH - 1) };
            assert_eq!(*out.get_pixel(person_x, 1), PERSON, "mirror={mirror}");
            assert_eq!(*out.get_pixel(background_x, 1), BACKGROUND, "mirror={mirror}");
            assert!(out.pixels().all(|p| *p != WALL), "mirror={mirror}");
        }
    }

    #[test]
    fn off_effect_skips_segmentation() {
        let mut pipeline = pipeline(true, true);
        let out = pipeline.render(EffectKind::Off).unwrap();
        assert_eq!(*out.get_pixel(WIDTH - 1, 0), PERSON);
        assert_eq!(*out.get_pixel(0, 0), WALL);
    }
}
