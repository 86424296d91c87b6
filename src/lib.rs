//! Real-time background replacement for webcam video
//!
//! Frames from a [`CaptureSource`] are segmented on a worker thread and
//! composited onto a blurred, solid, gradient or image background before
//! being written to an [`OutputSink`]. A [`FramePacer`] keeps the achieved
//! rate near a target by lowering the working resolution under load.

pub mod background;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod controls;
pub mod error;
pub mod filters;
pub mod frame;
pub mod output;
pub mod pacer;
pub mod pipeline;
pub mod segmentation;

pub use background::{BackgroundImage, BackgroundRenderer};
pub use capture::CaptureSource;
pub use compositor::{Compositor, CycleOutcome};
pub use config::{CompositingConfig, ConfigStore, ModeKind};
pub use error::{Error, Result};
pub use frame::{Frame, FrameCounter, FrameId, Mask};
pub use output::OutputSink;
pub use pacer::{FramePacer, PerformanceState};
pub use pipeline::{Pipeline, PipelineOptions, StopHandle, TelemetrySink};
pub use segmentation::{ModelStatus, SegmentationAdapter, SegmentationModel};
