pub mod draw;
mod preprocess;
mod rvm;
pub mod types;

pub use preprocess::Preprocessor;
pub use rvm::RobustVideoMatting;
pub use types::{Mask, SegmentationProvider};

use crate::config::ModelConfig;
use anyhow::Result;
use std::path::Path;

/// Load the default segmentation provider (RVM)
pub fn load<P: AsRef<Path>>(model_path: P, model: ModelConfig) -> Result<Box<dyn SegmentationProvider>> {
    let provider = RobustVideoMatting::new(model_path, model)?;
    Ok(Box::new(provider))
}
