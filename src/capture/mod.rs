mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use crate::frame::Frame;
use anyhow::Result;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// The most recent frame, stamped with a fresh id
    ///
    /// Errors are fatal for the pipeline: the source is gone.
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
