mod adapter;
mod preprocess;
mod rvm;
pub mod types;

pub use adapter::{MaskPoll, PendingMask, SegmentationAdapter};
pub use preprocess::Preprocessor;
pub use rvm::RobustVideoMatting;
pub use types::{ModelLoader, ModelStatus, SegmentationModel};

use std::path::PathBuf;
use std::sync::Arc;

/// Loader for the default segmentation model (RVM)
pub fn default_model_loader(model_path: impl Into<PathBuf>) -> ModelLoader {
    let path = model_path.into();
    Arc::new(move || -> anyhow::Result<Box<dyn SegmentationModel>> {
        Ok(Box::new(RobustVideoMatting::new(&path)?))
    })
}
