use crate::frame::Mask;
use anyhow::Result;
use image::RgbaImage;
use std::sync::Arc;

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
pub trait SegmentationModel {
    /// Process a frame and return a foreground mask
    ///
    /// # Arguments
    /// * `frame` - Input RGBA frame
    ///
    /// # Returns
    /// * Mask at the model's native resolution, 0 = background, 255 = foreground
    fn segment(&mut self, frame: &RgbaImage) -> Result<Mask>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Called when the source's frame size changes, which usually means a new
    /// camera or a restarted stream.
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// Builds a model; runs on the segmentation worker thread
///
/// Called again when a failed adapter is re-initialized.
pub type ModelLoader = Arc<dyn Fn() -> Result<Box<dyn SegmentationModel>> + Send + Sync>;

/// Lifecycle of the segmentation adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Uninitialized,
    Loading,
    Ready,
    /// Load or inference failed; the pipeline runs in passthrough
    Failed,
}
