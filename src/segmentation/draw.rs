//! Software draw routines that pair with a segmentation mask.
//!
//! These back the default methods of [`SegmentationProvider`](super::SegmentationProvider).
//! All of them expect the mask or overlay to be aligned with the frame as it
//! will be shown, i.e. already mirrored when `mirror` is set.

use super::types::Mask;
use crate::error::CompositeError;
use image::{imageops, Rgba, RgbaImage};
use std::borrow::Cow;

/// The frame as it will appear on the canvas
pub(crate) fn oriented(frame: &RgbaImage, mirror: bool) -> Cow<'_, RgbaImage> {
    if mirror {
        Cow::Owned(imageops::flip_horizontal(frame))
    } else {
        Cow::Borrowed(frame)
    }
}

/// Linear mix of two pixels: `weight` of `a`, the rest of `b`. Output is opaque.
#[inline]
fn mix(a: &Rgba<u8>, b: &Rgba<u8>, weight: f32) -> Rgba<u8> {
    let channel = |i: usize| {
        (a[i] as f32 * weight + b[i] as f32 * (1.0 - weight))
            .round()
            .clamp(0.0, 255.0) as u8
    };
    Rgba([channel(0), channel(1), channel(2), 255])
}

/// Bokeh: person pixels stay sharp, background pixels come from a blurred copy.
///
/// `background_blur` is the gaussian sigma applied to the frame, `edge_blur`
/// the sigma used to feather the mask so the cut-out has no hard seam.
pub fn blur_composite(
    frame: &RgbaImage,
    mask: &Mask,
    background_blur: u32,
    edge_blur: u32,
    mirror: bool,
) -> Result<RgbaImage, CompositeError> {
    let _span = tracing::debug_span!("blur_composite", background_blur, edge_blur).entered();
    mask.ensure_matches(frame)?;

    let source = oriented(frame, mirror);
    let blurred = if background_blur == 0 {
        source.clone().into_owned()
    } else {
        imageops::blur(&*source, background_blur as f32)
    };
    let coverage = mask.feathered(edge_blur);

    let (width, height) = frame.dimensions();
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        mix(
            source.get_pixel(x, y),
            blurred.get_pixel(x, y),
            coverage.coverage(x, y),
        )
    }))
}

/// Paint person pixels with `foreground` and the rest with `background`
pub fn mask_to_overlay(mask: &Mask, foreground: Rgba<u8>, background: Rgba<u8>) -> RgbaImage {
    let (width, height) = mask.dimensions();
    RgbaImage::from_fn(width, height, |x, y| {
        if mask.is_foreground(x, y) {
            foreground
        } else {
            background
        }
    })
}

/// Gaussian blur with premultiplied alpha, so transparent overlay pixels
/// soften the edge without pulling their neighbours toward black
fn feather_overlay(overlay: &RgbaImage, radius: u32) -> RgbaImage {
    let premultiplied = RgbaImage::from_fn(overlay.width(), overlay.height(), |x, y| {
        let p = overlay.get_pixel(x, y);
        let alpha = p[3] as u32;
        let scale = |c: u8| ((c as u32 * alpha + 127) / 255) as u8;
        Rgba([scale(p[0]), scale(p[1]), scale(p[2]), p[3]])
    });

    let mut feathered = imageops::blur(&premultiplied, radius as f32);
    for pixel in feathered.pixels_mut() {
        let alpha = pixel[3] as u32;
        if alpha == 0 {
            *pixel = Rgba([0, 0, 0, 0]);
            continue;
        }
        for c in 0..3 {
            pixel[c] = ((pixel[c] as u32 * 255 + alpha / 2) / alpha).min(255) as u8;
        }
    }
    feathered
}

/// Alpha-blend an overlay onto the frame.
///
/// Each pixel moves `overlay_alpha / 255 * opacity` of the way toward the
/// overlay color. `edge_blur` feathers the overlay before blending.
pub fn mask_composite(
    frame: &RgbaImage,
    overlay: &RgbaImage,
    opacity: f32,
    edge_blur: u32,
    mirror: bool,
) -> Result<RgbaImage, CompositeError> {
    let _span = tracing::debug_span!("mask_composite", opacity, edge_blur).entered();
    if overlay.dimensions() != frame.dimensions() {
        return Err(CompositeError::DimensionMismatch {
            frame_width: frame.width(),
            frame_height: frame.height(),
            mask_width: overlay.width(),
            mask_height: overlay.height(),
        });
    }

    let source = oriented(frame, mirror);
    let overlay = if edge_blur == 0 {
        Cow::Borrowed(overlay)
    } else {
        Cow::Owned(feather_overlay(overlay, edge_blur))
    };
    let opacity = opacity.clamp(0.0, 1.0);

    let (width, height) = frame.dimensions();
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        let paint = overlay.get_pixel(x, y);
        let weight = paint[3] as f32 / 255.0 * opacity;
        mix(paint, source.get_pixel(x, y), weight)
    }))
}
