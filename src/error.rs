use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for compositing pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the compositing pipeline
///
/// Only `SourceUnavailable` is meant to reach the caller as a hard failure.
/// Everything else degrades output quality (passthrough, coarser compositing)
/// or is reported and ignored.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Video source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Segmentation model failed to load: {0}")]
    ModelLoad(String),

    #[error("Segmentation failed: {0}")]
    Segmentation(String),

    #[error("Segmentation model is not ready")]
    ModelNotReady,

    #[error("A mask request is already outstanding")]
    RequestOutstanding,

    #[error("Invalid color '{0}': expected #rrggbb")]
    InvalidColor(String),

    #[error("Unknown gradient preset '{0}'")]
    UnknownGradient(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to load background image {path}: {source}")]
    BackgroundImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Display sink error: {0}")]
    Output(String),

    #[error("Worker thread error: {0}")]
    Worker(#[from] std::io::Error),
}

impl Error {
    /// Rejections of a mask request that leave the adapter usable
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::ModelNotReady | Error::RequestOutstanding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = Error::InvalidColor("red".to_string());
        assert_eq!(err.to_string(), "Invalid color 'red': expected #rrggbb");

        let err = Error::UnknownGradient("ocean".to_string());
        assert!(err.to_string().contains("ocean"));
    }

    #[test]
    fn rejections_are_not_failures() {
        assert!(Error::ModelNotReady.is_rejection());
        assert!(Error::RequestOutstanding.is_rejection());
        assert!(!Error::Segmentation("boom".into()).is_rejection());
    }
}
