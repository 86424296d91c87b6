use super::preprocess::Preprocessor;
use super::types::SegmentationModel;
use crate::frame::Mask;
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use ndarray::{arr1, Array1, Array4, Ix4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,

    // Recurrent hidden states
    // These are updated after each inference and fed back in the next frame
    r1: Array4<f32>,
    r2: Array4<f32>,
    r3: Array4<f32>,
    r4: Array4<f32>,

    // Downsample ratio for hidden states
    downsample_ratio: Array1<f32>,
}

fn ort_error<E: std::fmt::Display>(err: E) -> anyhow::Error {
    anyhow!("ONNX Runtime: {}", err)
}

/// Zero state accepted by RVM for the first frame of a sequence
fn initial_state() -> Array4<f32> {
    Array4::zeros((1, 1, 1, 1))
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    ///
    /// # Default Configuration
    /// - Input size: 512x512 (can be adjusted for performance/quality tradeoff)
    /// - Downsample ratio: 0.25
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()
            .map_err(ort_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort_error)?
            .with_intra_threads(4)
            .map_err(ort_error)?
            .commit_from_file(path)
            .map_err(ort_error)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        // Default to 512x512 input (good balance of quality and performance)
        let width = 512;
        let height = 512;

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
            r1: initial_state(),
            r2: initial_state(),
            r3: initial_state(),
            r4: initial_state(),
            downsample_ratio: arr1(&[0.25]),
        })
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbaImage) -> Result<Mask> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        // Preprocess frame to NCHW tensor
        let input_tensor = self.preprocessor.preprocess(frame)?;

        // RVM expects: src (frame), r1, r2, r3, r4, downsample_ratio
        let infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![
                TensorRef::from_array_view(&input_tensor).map_err(ort_error)?,
                TensorRef::from_array_view(&self.r1).map_err(ort_error)?,
                TensorRef::from_array_view(&self.r2).map_err(ort_error)?,
                TensorRef::from_array_view(&self.r3).map_err(ort_error)?,
                TensorRef::from_array_view(&self.r4).map_err(ort_error)?,
                TensorRef::from_array_view(&self.downsample_ratio).map_err(ort_error)?
            ])
            .map_err(ort_error)
            .context("Failed to run inference")?;
        drop(infer_span);

        // Extract outputs: fgr (foreground), pha (alpha), r1, r2, r3, r4
        // We only need pha (the matte) and the updated hidden states
        let extract = |index: usize| -> Result<Array4<f32>> {
            let view = outputs[index]
                .try_extract_array::<f32>()
                .map_err(ort_error)?;
            Ok(view.to_owned().into_dimensionality::<Ix4>()?)
        };

        let pha = extract(1)?;
        let r1 = extract(2)?;
        let r2 = extract(3)?;
        let r3 = extract(4)?;
        let r4 = extract(5)?;
        drop(outputs);

        // Update hidden states for next frame
        self.r1 = r1;
        self.r2 = r2;
        self.r3 = r3;
        self.r4 = r4;

        // Matte shape: [1, 1, H, W]
        let matte_height = pha.shape()[2] as u32;
        let matte_width = pha.shape()[3] as u32;
        let matte_flat: Vec<f32> = pha.iter().copied().collect();

        Preprocessor::matte_to_mask(&matte_flat, matte_width, matte_height)
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.r1 = initial_state();
        self.r2 = initial_state();
        self.r3 = initial_state();
        self.r4 = initial_state();
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
