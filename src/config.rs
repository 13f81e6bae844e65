//! Session configuration: effect selection, draw options, inference and
//! capture settings.
//!
//! Everything here is fixed for the lifetime of a run. The scheduler reads it,
//! it never writes it.

use crate::error::ConfigError;
use clap::ValueEnum;
use image::Rgba;
use std::fmt;
use std::str::FromStr;

/// Which background effect the scheduler renders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum EffectKind {
    /// Raw camera frames
    Off,
    /// Blurred background (bokeh)
    Blur,
    /// Background covered by a solid color
    Color,
    /// Background replaced by a still image
    Image,
}

impl EffectKind {
    /// Whether the effect needs a segmentation mask every frame
    pub fn needs_segmentation(self) -> bool {
        !matches!(self, EffectKind::Off)
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectKind::Off => "off",
            EffectKind::Blur => "blur",
            EffectKind::Color => "color",
            EffectKind::Image => "image",
        };
        f.write_str(name)
    }
}

impl FromStr for EffectKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(EffectKind::Off),
            "blur" | "bokeh" => Ok(EffectKind::Blur),
            "color" | "colour" | "mask" => Ok(EffectKind::Color),
            "image" | "replace" => Ok(EffectKind::Image),
            _ => Err(ConfigError::UnknownEffect(s.to_string())),
        }
    }
}

/// How a background image is laid out on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FitMode {
    /// Fill the canvas, cropping the overflowing axis
    #[default]
    Cover,
    /// Fit inside the canvas, letterboxing the short axis
    Contain,
    /// Scale both axes to the canvas, ignoring aspect ratio
    Stretch,
}

/// Model input size relative to the captured frame.
/// Larger tiers are more accurate but slower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InternalResolution {
    Low,
    #[default]
    Medium,
    High,
    Full,
}

impl InternalResolution {
    pub fn scale(self) -> f32 {
        match self {
            InternalResolution::Low => 0.25,
            InternalResolution::Medium => 0.5,
            InternalResolution::High => 0.75,
            InternalResolution::Full => 1.0,
        }
    }

    /// Model input dimensions for a frame of `width`x`height`.
    ///
    /// Sides are rounded to a multiple of 8 (the matting network downsamples
    /// by powers of two) and never drop below 32.
    pub fn input_size(self, width: u32, height: u32) -> (u32, u32) {
        let side = |v: u32| {
            let scaled = (v as f32 * self.scale()).round() as u32;
            ((scaled + 4) / 8 * 8).max(32)
        };
        (side(width), side(height))
    }
}

/// Quality tier of the loaded model, trading latency for accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModelQuality {
    LowEnd,
    Low,
    #[default]
    Default,
    Middle,
    High,
    HighEnd,
}

/// Load-time settings for the matting model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    /// Resolution ratio of the recurrent decoder relative to the input
    pub downsample_ratio: f32,
    /// ONNX Runtime intra-op thread count
    pub intra_threads: usize,
}

impl From<ModelQuality> for ModelConfig {
    fn from(quality: ModelQuality) -> Self {
        let (downsample_ratio, intra_threads) = match quality {
            ModelQuality::LowEnd => (0.125, 1),
            ModelQuality::Low => (0.2, 2),
            ModelQuality::Default => (0.25, 4),
            ModelQuality::Middle => (0.3, 4),
            ModelQuality::High => (0.4, 4),
            ModelQuality::HighEnd => (0.5, 8),
        };
        Self {
            downsample_ratio,
            intra_threads,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelQuality::default().into()
    }
}

/// Per-frame inference settings, passed to the provider unmodified
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentConfig {
    pub internal_resolution: InternalResolution,
    /// Coverage at or above which a pixel counts as person (0..=1)
    pub segmentation_threshold: f32,
    /// Maximum number of people a multi-person provider reports
    pub max_detections: u32,
    /// Minimum detection score a multi-person provider keeps
    pub score_threshold: f32,
    /// Non-maximum suppression radius in pixels
    pub nms_radius: u32,
    /// Return the mask mirrored left to right
    pub flip_horizontal: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            internal_resolution: InternalResolution::Medium,
            segmentation_threshold: 0.7,
            max_detections: 4,
            score_threshold: 0.5,
            nms_radius: 20,
            flip_horizontal: true,
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("segmentation threshold", self.segmentation_threshold as f64, 0.0, 1.0)?;
        check_range("score threshold", self.score_threshold as f64, 0.0, 1.0)?;
        check_range("max detections", self.max_detections as f64, 1.0, 20.0)?;
        Ok(())
    }
}

/// Draw options shared by the effects. Each effect picks the subset it uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawOptions {
    /// Color mask opacity (0..=1)
    pub opacity: f32,
    /// Overlay color for person pixels in the color effect
    pub foreground: Rgba<u8>,
    /// Overlay color for background pixels in the color effect
    pub background: Rgba<u8>,
    /// Pixels of feathering between person and background (0..=20)
    pub edge_blur: u32,
    /// Background blur strength (1..=20)
    pub background_blur: u32,
    /// Mirror the output left to right
    pub mirror: bool,
    pub fit: FitMode,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            foreground: Rgba([0, 0, 0, 0]),
            background: Rgba([0, 0, 0, 220]),
            edge_blur: 5,
            background_blur: 15,
            mirror: true,
            fit: FitMode::Cover,
        }
    }
}

impl DrawOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("opacity", self.opacity as f64, 0.0, 1.0)?;
        check_range("edge blur", self.edge_blur as f64, 0.0, 20.0)?;
        check_range("background blur", self.background_blur as f64, 1.0, 20.0)?;
        Ok(())
    }
}

/// Requested camera stream geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

impl CaptureConstraints {
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

/// Parse `#rrggbb`, `#rrggbbaa` or `r,g,b[,a]` into a color.
/// Missing alpha means fully opaque.
pub fn parse_rgba(input: &str) -> Result<Rgba<u8>, ConfigError> {
    let invalid = || ConfigError::InvalidColor(input.to_string());
    let s = input.trim();

    if let Some(hex) = s.strip_prefix('#') {
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return Err(invalid());
        }
        let mut channels = [255u8; 4];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).map_err(|_| invalid())?;
            channels[i] = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        return Ok(Rgba(channels));
    }

    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if !(parts.len() == 3 || parts.len() == 4) {
        return Err(invalid());
    }
    let mut channels = [255u8; 4];
    for (i, part) in parts.iter().enumerate() {
        channels[i] = part.parse().map_err(|_| invalid())?;
    }
    Ok(Rgba(channels))
}
