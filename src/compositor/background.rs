use super::geometry::{self, Placement};
use crate::config::FitMode;
use image::{imageops, RgbaImage};

/// Still image used by the image-replace effect.
///
/// The image is rendered once per canvas size and cached; replacing the
/// image or changing the canvas size drops the cache and the next frame
/// renders from scratch.
#[derive(Debug, Default)]
pub struct BackgroundAsset {
    source: Option<RgbaImage>,
    fit: FitMode,
    rendered: Option<RgbaImage>,
}

impl BackgroundAsset {
    pub fn new(fit: FitMode) -> Self {
        Self {
            source: None,
            fit,
            rendered: None,
        }
    }

    /// Swap in a new image, invalidating any rendered buffer
    pub fn replace(&mut self, image: RgbaImage) {
        tracing::info!("Background image set ({}x{})", image.width(), image.height());
        self.source = Some(image);
        self.rendered = None;
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered.is_some()
    }

    /// The background laid out on a `width`x`height` canvas, or `None` when
    /// no image has been set
    pub fn rendered(&mut self, width: u32, height: u32) -> Option<&RgbaImage> {
        let source = self.source.as_ref()?;

        let stale = self
            .rendered
            .as_ref()
            .map_or(true, |buffer| buffer.dimensions() != (width, height));
        if stale {
            let placement = geometry::fit(self.fit, source.dimensions(), (width, height));
            self.rendered = Some(render(source, placement, width, height));
        }

        self.rendered.as_ref()
    }
}

/// Scale `source` to `placement` and crop it to the canvas. Uncovered
/// canvas pixels stay transparent black.
fn render(source: &RgbaImage, placement: Placement, width: u32, height: u32) -> RgbaImage {
    let _span = tracing::debug_span!("render_background", width, height).entered();

    let mut canvas = RgbaImage::new(width, height);
    let Some(window) = visible_window(source.dimensions(), placement, (width, height)) else {
        return canvas;
    };

    // Only the part that lands on the canvas is scaled
    let (sx, sy, sw, sh) = window.source;
    let cropped = imageops::crop_imm(source, sx, sy, sw, sh).to_image();
    let dest = window.dest;
    let scaled = if cropped.dimensions() == (dest.width, dest.height) {
        cropped
    } else {
        imageops::resize(&cropped, dest.width, dest.height, imageops::FilterType::Triangle)
    };

    imageops::replace(&mut canvas, &scaled, dest.x, dest.y);
    canvas
}

/// The visible part of a placement: a source rectangle `(x, y, width, height)`
/// and the canvas rectangle it is scaled into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    source: (u32, u32, u32, u32),
    dest: Placement,
}

fn visible_window(source: (u32, u32), placement: Placement, canvas: (u32, u32)) -> Option<Window> {
    let (sx, sw, dx, dw) = visible_span(placement.x, placement.width, canvas.0, source.0)?;
    let (sy, sh, dy, dh) = visible_span(placement.y, placement.height, canvas.1, source.1)?;
    Some(Window {
        source: (sx, sy, sw, sh),
        dest: Placement {
            x: dx,
            y: dy,
            width: dw,
            height: dh,
        },
    })
}

/// One axis of [`visible_window`]: `(source start, source length, canvas
/// offset, canvas length)`, or `None` when nothing is visible
fn visible_span(offset: i64, scaled: u32, canvas: u32, source: u32) -> Option<(u32, u32, i64, u32)> {
    let start = (-offset).max(0);
    let end = (canvas as i64 - offset).min(scaled as i64);
    if end <= start || source == 0 {
        return None;
    }

    let (start, end) = (start as u64, end as u64);
    let (scaled, source) = (scaled as u64, source as u64);
    let source_start = (start * source / scaled).min(source - 1);
    let source_end = ((end * source).div_ceil(scaled)).clamp(source_start + 1, source);

    Some((
        source_start as u32,
        (source_end - source_start) as u32,
        offset.max(0),
        (end - start) as u32,
    ))
}
