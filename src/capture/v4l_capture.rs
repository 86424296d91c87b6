use super::CaptureSource;
use crate::frame::{Frame, FrameCounter};
use anyhow::{Context, Result};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    counter: FrameCounter,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    /// Open `device_index`, asking for the best format up to `width`x`height`
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at up to {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::HighestResolution(
            Resolution::new(width, height),
        ));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let resolution = camera.resolution();
        tracing::info!(
            "Webcam streaming at {}x{}",
            resolution.width(),
            resolution.height()
        );

        Ok(Self {
            camera,
            counter: FrameCounter::new(),
            width: resolution.width(),
            height: resolution.height(),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<Frame> {
        let buffer = self.camera.frame().context("Failed to capture frame")?;

        let decoded = buffer
            .decode_image::<RgbAFormat>()
            .context("Failed to decode frame")?;

        Ok(self.counter.stamp(decoded))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", err);
        }
    }
}
