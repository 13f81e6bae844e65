use super::preprocess::Preprocessor;
use super::types::{Mask, SegmentationProvider};
use crate::config::{ModelConfig, SegmentConfig};
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use ndarray::{Array1, Array4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
/// The multi-person settings of [`SegmentConfig`] do not apply: the model
/// produces a single matte covering everyone in view.
pub struct RobustVideoMatting {
    session: Session,
    model: ModelConfig,

    // Recurrent hidden states, valid for `recurrent_input` dimensions only
    recurrent: Option<[Array4<f32>; 4]>,
    recurrent_input: (u32, u32),
}

impl RobustVideoMatting {
    /// Load an RVM model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `model` - Downsample ratio and thread count for the quality tier
    pub fn new<P: AsRef<Path>>(model_path: P, model: ModelConfig) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!(
            "Loading RVM model from {} (downsample ratio {}, {} threads)",
            path.display(),
            model.downsample_ratio,
            model.intra_threads
        );

        let session = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {e}"))?
            .with_intra_threads(model.intra_threads)
            .map_err(|e| anyhow!("Failed to set threads: {e}"))?
            .commit_from_file(path)
            .map_err(|e| anyhow!("Failed to load model from {}: {e}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        Ok(Self {
            session,
            model,
            recurrent: None,
            recurrent_input: (0, 0),
        })
    }

    /// Zero states; the model sizes them on the first frame
    fn initial_states() -> [Array4<f32>; 4] {
        std::array::from_fn(|_| Array4::zeros((1, 1, 1, 1)))
    }
}

/// Copy an output tensor into an owned 4-D array
fn extract_state(value: &ort::value::DynValue) -> Result<Array4<f32>> {
    let (shape, data) = value.try_extract_tensor::<f32>()?;
    anyhow::ensure!(shape.len() == 4, "expected a 4-D recurrent state, got {:?}", shape);
    let dims = (
        shape[0] as usize,
        shape[1] as usize,
        shape[2] as usize,
        shape[3] as usize,
    );
    Ok(Array4::from_shape_vec(dims, data.to_vec())?)
}

impl SegmentationProvider for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbaImage, config: &SegmentConfig) -> Result<Mask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let (frame_width, frame_height) = frame.dimensions();
        let input_size = config
            .internal_resolution
            .input_size(frame_width, frame_height);

        // Hidden states only make sense at the resolution that produced them
        if self.recurrent_input != input_size {
            tracing::debug!("Input size changed to {}x{}, resetting hidden states", input_size.0, input_size.1);
            self.recurrent = None;
            self.recurrent_input = input_size;
        }

        let input_tensor = Preprocessor::new(input_size.0, input_size.1).preprocess(frame)?;
        let [r1, r2, r3, r4] = self.recurrent.take().unwrap_or_else(Self::initial_states);
        let ratio = Array1::from_vec(vec![self.model.downsample_ratio]);

        // RVM expects: src, r1i, r2i, r3i, r4i, downsample_ratio
        let infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![
                Tensor::from_array(input_tensor)?,
                Tensor::from_array(r1)?,
                Tensor::from_array(r2)?,
                Tensor::from_array(r3)?,
                Tensor::from_array(r4)?,
                Tensor::from_array(ratio)?
            ])
            .context("Failed to run inference")?;
        drop(infer_span);

        // Outputs: fgr, pha, r1o, r2o, r3o, r4o
        let (pha_shape, pha) = outputs[1].try_extract_tensor::<f32>()?;
        anyhow::ensure!(pha_shape.len() == 4, "unexpected matte shape {:?}", pha_shape);
        let matte_height = pha_shape[2] as u32;
        let matte_width = pha_shape[3] as u32;
        let matte = pha.to_vec();

        self.recurrent = Some([
            extract_state(&outputs[2])?,
            extract_state(&outputs[3])?,
            extract_state(&outputs[4])?,
            extract_state(&outputs[5])?,
        ]);

        let coverage = Preprocessor::postprocess_matte(
            &matte,
            matte_width,
            matte_height,
            frame_width,
            frame_height,
        )?;

        let mask = Mask::from_coverage(frame_width, frame_height, coverage)?
            .thresholded(config.segmentation_threshold);

        Ok(if config.flip_horizontal {
            mask.mirrored()
        } else {
            mask
        })
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.recurrent = None;
    }
}
