use super::OutputSink;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// Writes YUYV frames to a v4l2loopback device
pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
    yuyv: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the format so readers of the loopback device see YUYV
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let actual = Output::set_format(&device, &requested)
            .context("Failed to set v4l2loopback output format")?;
        if actual.width != width || actual.height != height || actual.fourcc != requested.fourcc {
            anyhow::bail!(
                "v4l2loopback device negotiated {}x{} {} instead of {}x{} YUYV",
                actual.width,
                actual.height,
                actual.fourcc,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
            yuyv: Vec::with_capacity((width * height * 2) as usize),
        })
    }
}

/// Pack an RGBA frame as YUV 4:2:2 (YUYV); alpha is ignored
fn rgba_to_yuyv(image: &RgbaImage, out: &mut Vec<u8>) {
    let (width, height) = image.dimensions();
    out.clear();
    out.reserve((width.div_ceil(2) * 4 * height) as usize);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let pixel1 = image.get_pixel(x, y);
            let pixel2 = if x + 1 < width {
                image.get_pixel(x + 1, y)
            } else {
                pixel1
            };

            let (y1, u1, v1) = rgb_to_yuv(pixel1);
            let (y2, u2, v2) = rgb_to_yuv(pixel2);

            // Chroma is shared by the pair
            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            out.extend_from_slice(&[y1, u, y2, v]);
        }
    }
}

fn rgb_to_yuv(pixel: &Rgba<u8>) -> (u8, u8, u8) {
    let r = pixel[0] as f32;
    let g = pixel[1] as f32;
    let b = pixel[2] as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        // Throttled or mismatched frames are scaled to the device size
        if frame.dimensions() != (self.width, self.height) {
            let resized = imageops::resize(frame, self.width, self.height, FilterType::Triangle);
            rgba_to_yuyv(&resized, &mut self.yuyv);
        } else {
            rgba_to_yuyv(frame, &mut self.yuyv);
        }

        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
