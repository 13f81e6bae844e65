use crate::config::EffectKind;
use thiserror::Error;

/// Failures raised while turning a frame and mask into an output frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositeError {
    #[error("frame is {frame_width}x{frame_height} but mask is {mask_width}x{mask_height}")]
    DimensionMismatch {
        frame_width: u32,
        frame_height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    #[error("mask for {width}x{height} needs {expected} samples, got {actual}")]
    MaskLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("image effect selected but no background image has been set")]
    MissingBackground,

    #[error("effect `{0}` needs a segmentation model (pass --model)")]
    MissingProvider(EffectKind),
}

/// Invalid user-facing configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid color `{0}`: expected #rrggbb, #rrggbbaa or r,g,b[,a]")]
    InvalidColor(String),

    #[error("unknown effect `{0}` (expected off, blur, color or image)")]
    UnknownEffect(String),
}

/// Malformed control command
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command `{0}`")]
    Unknown(String),

    #[error("`{0}` expects an argument")]
    MissingArgument(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
