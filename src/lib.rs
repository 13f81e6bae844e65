//! Real-time webcam background effects: blur, solid color mask or image
//! replacement, driven by a person-segmentation model.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod control;
pub mod error;
pub mod output;
pub mod scheduler;
pub mod segmentation;
