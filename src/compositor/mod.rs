//! Turns a frame and its mask into the frame shown on the canvas.

pub mod background;
pub mod geometry;

pub use background::BackgroundAsset;

use crate::config::{DrawOptions, EffectKind};
use crate::error::CompositeError;
use crate::segmentation::draw::oriented;
use crate::segmentation::{Mask, SegmentationProvider};
use anyhow::Result;
use image::{imageops, Rgba, RgbaImage};

/// One background effect together with the draw options it reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    Off {
        mirror: bool,
    },
    Blur {
        background_blur: u32,
        edge_blur: u32,
        mirror: bool,
    },
    ColorMask {
        foreground: Rgba<u8>,
        background: Rgba<u8>,
        opacity: f32,
        edge_blur: u32,
        mirror: bool,
    },
    ImageReplace {
        mirror: bool,
    },
}

impl Effect {
    pub fn new(kind: EffectKind, options: &DrawOptions) -> Self {
        let mirror = options.mirror;
        match kind {
            EffectKind::Off => Effect::Off { mirror },
            EffectKind::Blur => Effect::Blur {
                background_blur: options.background_blur,
                edge_blur: options.edge_blur,
                mirror,
            },
            EffectKind::Color => Effect::ColorMask {
                foreground: options.foreground,
                background: options.background,
                opacity: options.opacity,
                edge_blur: options.edge_blur,
                mirror,
            },
            EffectKind::Image => Effect::ImageReplace { mirror },
        }
    }

    pub fn kind(&self) -> EffectKind {
        match self {
            Effect::Off { .. } => EffectKind::Off,
            Effect::Blur { .. } => EffectKind::Blur,
            Effect::ColorMask { .. } => EffectKind::Color,
            Effect::ImageReplace { .. } => EffectKind::Image,
        }
    }
}

/// Owns the draw options, canvas geometry and background asset
pub struct Compositor {
    options: DrawOptions,
    background: BackgroundAsset,
    canvas: (u32, u32),
}

impl Compositor {
    pub fn new(options: DrawOptions, canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            options,
            background: BackgroundAsset::new(options.fit),
            canvas: (canvas_width, canvas_height),
        }
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        self.canvas
    }

    pub fn options(&self) -> &DrawOptions {
        &self.options
    }

    pub fn effect(&self, kind: EffectKind) -> Effect {
        Effect::new(kind, &self.options)
    }

    /// Swap the background image; the next image-replace frame re-renders it
    pub fn set_background(&mut self, image: RgbaImage) {
        self.background.replace(image);
    }

    /// The frame as-is, centered on an opaque black canvas when the sizes differ
    pub fn passthrough(&self, frame: &RgbaImage, mirror: bool) -> RgbaImage {
        let source = oriented(frame, mirror);
        let (width, height) = self.canvas;
        if source.dimensions() == (width, height) {
            return source.into_owned();
        }

        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
        let x = geometry::centered(width as u64, source.width() as u64);
        let y = geometry::centered(height as u64, source.height() as u64);
        imageops::replace(&mut canvas, &*source, x, y);
        canvas
    }

    /// Apply `effect` to a canvas-sized frame.
    ///
    /// Blur and color effects delegate to the provider's draw routines; image
    /// replacement is done here.
    pub fn composite(
        &mut self,
        effect: &Effect,
        frame: &RgbaImage,
        mask: &Mask,
        provider: &dyn SegmentationProvider,
    ) -> Result<RgbaImage> {
        let _span = tracing::debug_span!("composite", effect = %effect.kind()).entered();

        match *effect {
            Effect::Off { mirror } => Ok(self.passthrough(frame, mirror)),
            Effect::Blur {
                background_blur,
                edge_blur,
                mirror,
            } => provider.draw_blur_composite(frame, mask, background_blur, edge_blur, mirror),
            Effect::ColorMask {
                foreground,
                background,
                opacity,
                edge_blur,
                mirror,
            } => {
                let overlay = provider.mask_to_overlay(mask, foreground, background);
                provider.draw_mask_composite(frame, &overlay, opacity, edge_blur, mirror)
            }
            Effect::ImageReplace { mirror } => {
                let (width, height) = frame.dimensions();
                let background = self
                    .background
                    .rendered(width, height)
                    .ok_or(CompositeError::MissingBackground)?;
                Ok(replace_background(frame, mask, background, mirror)?)
            }
        }
    }
}

/// Replace every background pixel of `frame` with the pixel of `background`
/// at the same coordinate. Person pixels keep the camera value.
pub fn replace_background(
    frame: &RgbaImage,
    mask: &Mask,
    background: &RgbaImage,
    mirror: bool,
) -> Result<RgbaImage, CompositeError> {
    mask.ensure_matches(frame)?;
    if background.dimensions() != frame.dimensions() {
        return Err(CompositeError::DimensionMismatch {
            frame_width: frame.width(),
            frame_height: frame.height(),
            mask_width: background.width(),
            mask_height: background.height(),
        });
    }

    let mut output = oriented(frame, mirror).into_owned();
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        if !mask.is_foreground(x, y) {
            *pixel = *background.get_pixel(x, y);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FitMode, SegmentConfig};

    /// Provider that only offers the default draw routines
    struct DrawOnly;

    impl SegmentationProvider for DrawOnly {
        fn segment(&mut self, frame: &RgbaImage, _config: &SegmentConfig) -> Result<Mask> {
            Ok(Mask::from_fn(frame.width(), frame.height(), |_, _| 0.0))
        }
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8 * 7, y as u8 * 11, 90, 255]))
    }

    fn diagonal_mask(width: u32, height: u32) -> Mask {
        Mask::from_fn(width, height, |x, y| if x > y { 1.0 } else { 0.0 })
    }

    fn options() -> DrawOptions {
        DrawOptions {
            mirror: false,
            fit: FitMode::Stretch,
            ..DrawOptions::default()
        }
    }

    #[test]
    fn image_replace_follows_the_mask_pixel_for_pixel() {
        let frame = gradient(12, 9);
        let mask = diagonal_mask(12, 9);
        let background = RgbaImage::from_fn(12, 9, |x, y| Rgba([200, x as u8, y as u8, 255]));

        let mut compositor = Compositor::new(options(), 12, 9);
        compositor.set_background(background.clone());
        let out = compositor
            .composite(&compositor.effect(EffectKind::Image), &frame, &mask, &DrawOnly)
            .unwrap();

        for (x, y, pixel) in out.enumerate_pixels() {
            if mask.is_foreground(x, y) {
                assert_eq!(pixel, frame.get_pixel(x, y), "person pixel ({x}, {y})");
            } else {
                assert_eq!(pixel, background.get_pixel(x, y), "background pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn image_replace_without_background_fails() {
        let frame = gradient(4, 4);
        let mask = diagonal_mask(4, 4);
        let mut compositor = Compositor::new(options(), 4, 4);
        let err = compositor
            .composite(&compositor.effect(EffectKind::Image), &frame, &mask, &DrawOnly)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompositeError>(),
            Some(&CompositeError::MissingBackground)
        );
    }

    #[test]
    fn changed_background_is_used_on_the_next_composite() {
        let frame = gradient(6, 6);
        let all_background = Mask::from_fn(6, 6, |_, _| 0.0);
        let mut compositor = Compositor::new(options(), 6, 6);
        let effect = compositor.effect(EffectKind::Image);

        compositor.set_background(RgbaImage::from_pixel(6, 6, Rgba([255, 0, 0, 255])));
        let first = compositor
            .composite(&effect, &frame, &all_background, &DrawOnly)
            .unwrap();
        assert_eq!(*first.get_pixel(3, 3), Rgba([255, 0, 0, 255]));

        compositor.set_background(RgbaImage::from_pixel(6, 6, Rgba([0, 0, 255, 255])));
        let second = compositor
            .composite(&effect, &frame, &all_background, &DrawOnly)
            .unwrap();
        assert!(second.pixels().all(|p| *p == Rgba([0, 0, 255, 255])));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let frame = gradient(6, 6);
        let mask = diagonal_mask(6, 5);
        let background = RgbaImage::new(6, 6);
        assert!(matches!(
            replace_background(&frame, &mask, &background, false),
            Err(CompositeError::DimensionMismatch { mask_height: 5, .. })
        ));
    }

    #[test]
    fn passthrough_centers_smaller_frames() {
        let compositor = Compositor::new(options(), 8, 6);
        let frame = RgbaImage::from_pixel(4, 2, Rgba([50, 60, 70, 255]));
        let out = compositor.passthrough(&frame, false);
        assert_eq!(out.dimensions(), (8, 6));
        assert_eq!(*out.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*out.get_pixel(2, 2), Rgba([50, 60, 70, 255]));
        assert_eq!(*out.get_pixel(5, 3), Rgba([50, 60, 70, 255]));
        assert_eq!(*out.get_pixel(6, 3), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn passthrough_is_identity_at_canvas_size() {
        let compositor = Compositor::new(options(), 5, 5);
        let frame = gradient(5, 5);
        assert_eq!(compositor.passthrough(&frame, false), frame);
    }

    #[test]
    fn effects_carry_their_draw_options() {
        let options = DrawOptions {
            background_blur: 9,
            edge_blur: 3,
            opacity: 0.5,
            ..DrawOptions::default()
        };
        assert_eq!(
            Effect::new(EffectKind::Blur, &options),
            Effect::Blur {
                background_blur: 9,
                edge_blur: 3,
                mirror: true
            }
        );
        let color = Effect::new(EffectKind::Color, &options);
        assert!(matches!(color, Effect::ColorMask { opacity, .. } if opacity == 0.5));
        assert_eq!(color.kind(), EffectKind::Color);
    }

    #[test]
    fn color_effect_goes_through_provider_overlay() {
        let frame = RgbaImage::from_pixel(6, 6, Rgba([100, 150, 200, 255]));
        let mask = Mask::from_fn(6, 6, |x, _| if x < 3 { 1.0 } else { 0.0 });
        let mut compositor = Compositor::new(
            DrawOptions {
                edge_blur: 0,
                ..options()
            },
            6,
            6,
        );
        let out = compositor
            .composite(&compositor.effect(EffectKind::Color), &frame, &mask, &DrawOnly)
            .unwrap();
        assert_eq!(*out.get_pixel(0, 0), Rgba([100, 150, 200, 255]));
        assert_eq!(*out.get_pixel(5, 5), Rgba([14, 21, 27, 255]));
    }
}
