use crate::config::{ActiveMode, GradientPreset};
use crate::error::{Error, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, Rgba, RgbaImage};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fill used by image mode while no image is uploaded
pub const NEUTRAL_FILL: Rgb<u8> = Rgb([128, 128, 128]);

/// Uploaded backgrounds are resampled bilinearly
pub const IMAGE_FILTER: FilterType = FilterType::Triangle;

static NEXT_IMAGE_ID: AtomicU64 = AtomicU64::new(0);

/// A decoded background image with a stable identity for caching
#[derive(Debug)]
pub struct BackgroundImage {
    id: u64,
    pixels: RgbaImage,
}

impl BackgroundImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            id: NEXT_IMAGE_ID.fetch_add(1, Ordering::Relaxed),
            pixels,
        }
    }

    /// Decode any format the `image` crate supports
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading background image from {}", path.display());

        let decoded = image::open(path).map_err(|source| Error::BackgroundImage {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::new(decoded.to_rgba8()))
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CacheKey {
    Solid(Rgb<u8>),
    Gradient(GradientPreset),
    Image(u64),
}

/// Produces background buffers, re-rendering only when the mode, its
/// parameters or the target size change
#[derive(Debug)]
pub struct BackgroundRenderer {
    buffer: RgbaImage,
    key: Option<CacheKey>,
}

impl Default for BackgroundRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundRenderer {
    pub fn new() -> Self {
        Self {
            buffer: RgbaImage::new(0, 0),
            key: None,
        }
    }

    /// Background for `mode` at the given size
    ///
    /// Returns `None` for `original` and `blur`, which reuse the live frame.
    pub fn render(&mut self, mode: &ActiveMode<'_>, width: u32, height: u32) -> Option<&RgbaImage> {
        let key = match *mode {
            ActiveMode::Original | ActiveMode::Blur { .. } => return None,
            ActiveMode::Solid(color) => CacheKey::Solid(color),
            ActiveMode::Gradient(preset) => CacheKey::Gradient(preset),
            ActiveMode::Image(Some(image)) => CacheKey::Image(image.id),
            ActiveMode::Image(None) => CacheKey::Solid(NEUTRAL_FILL),
        };

        if self.key == Some(key) && self.buffer.dimensions() == (width, height) {
            return Some(&self.buffer);
        }

        let _span = tracing::debug_span!("render_background").entered();
        tracing::debug!("Rendering {:?} background at {}x{}", key, width, height);

        if self.buffer.dimensions() != (width, height) {
            self.buffer = RgbaImage::new(width, height);
        }

        match *mode {
            ActiveMode::Image(Some(image)) => fill_image(&mut self.buffer, image.pixels()),
            ActiveMode::Gradient(preset) => fill_gradient(&mut self.buffer, preset),
            ActiveMode::Solid(color) => fill_solid(&mut self.buffer, color),
            ActiveMode::Image(None) => fill_solid(&mut self.buffer, NEUTRAL_FILL),
            ActiveMode::Original | ActiveMode::Blur { .. } => return None,
        }

        self.key = Some(key);
        Some(&self.buffer)
    }
}

/// Stateless form of `BackgroundRenderer::render`
pub fn render_background(mode: &ActiveMode<'_>, width: u32, height: u32) -> Option<RgbaImage> {
    BackgroundRenderer::new().render(mode, width, height).cloned()
}

fn fill_solid(buffer: &mut RgbaImage, color: Rgb<u8>) {
    let pixel = color.to_rgba_opaque();
    for p in buffer.pixels_mut() {
        *p = pixel;
    }
}

/// Linear blend along the top-left to bottom-right diagonal
fn fill_gradient(buffer: &mut RgbaImage, preset: GradientPreset) {
    let (start, end) = preset.stops();
    let dx = buffer.width().saturating_sub(1) as f32;
    let dy = buffer.height().saturating_sub(1) as f32;
    let length_sq = dx * dx + dy * dy;

    for (x, y, pixel) in buffer.enumerate_pixels_mut() {
        let t = if length_sq > 0.0 {
            ((x as f32 * dx + y as f32 * dy) / length_sq).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let lerp = |c: usize| {
            (start[c] as f32 + (end[c] as f32 - start[c] as f32) * t).round() as u8
        };
        *pixel = Rgba([lerp(0), lerp(1), lerp(2), 255]);
    }
}

fn fill_image(buffer: &mut RgbaImage, image: &RgbaImage) {
    let (width, height) = buffer.dimensions();
    if image.dimensions() == (width, height) {
        buffer.copy_from_slice(image.as_raw());
    } else if image.width() == 0 || image.height() == 0 {
        fill_solid(buffer, NEUTRAL_FILL);
        return;
    } else {
        *buffer = imageops::resize(image, width, height, IMAGE_FILTER);
    }

    // Uploaded images may carry transparency; backgrounds are always opaque
    for p in buffer.pixels_mut() {
        p[3] = 255;
    }
}

trait OpaqueExt {
    fn to_rgba_opaque(self) -> Rgba<u8>;
}

impl OpaqueExt for Rgb<u8> {
    fn to_rgba_opaque(self) -> Rgba<u8> {
        Rgba([self[0], self[1], self[2], 255])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [u8; 4], b: [u8; 4]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| x.abs_diff(*y) <= 1)
    }

    #[test]
    fn solid_fills_every_pixel_opaque() {
        let bg = render_background(&ActiveMode::Solid(Rgb([10, 20, 30])), 3, 2).unwrap();
        assert!(bg.pixels().all(|p| p.0 == [10, 20, 30, 255]));
    }

    #[test]
    fn video_modes_have_no_background() {
        assert!(render_background(&ActiveMode::Original, 4, 4).is_none());
        assert!(render_background(&ActiveMode::Blur { radius: 5 }, 4, 4).is_none());
    }

    #[test]
    fn sunset_gradient_runs_corner_to_corner() {
        let bg = render_background(&ActiveMode::Gradient(GradientPreset::Sunset), 2, 1).unwrap();
        assert!(close(bg.get_pixel(0, 0).0, [0xf9, 0x73, 0x16, 255]));
        assert!(close(bg.get_pixel(1, 0).0, [0xec, 0x48, 0x99, 255]));
    }

    #[test]
    fn gradient_midpoint_is_halfway() {
        let bg = render_background(&ActiveMode::Gradient(GradientPreset::Forest), 3, 3).unwrap();
        let (start, end) = GradientPreset::Forest.stops();
        let mid = bg.get_pixel(1, 1);
        for c in 0..3 {
            let expected = (start[c] as f32 + end[c] as f32) / 2.0;
            assert!((mid[c] as f32 - expected).abs() <= 1.0);
        }
        // Anti-diagonal corners project onto the same point
        assert_eq!(bg.get_pixel(2, 0), bg.get_pixel(0, 2));
    }

    #[test]
    fn single_pixel_gradient_uses_start_color() {
        let bg = render_background(&ActiveMode::Gradient(GradientPreset::PurpleBlue), 1, 1).unwrap();
        assert_eq!(bg.get_pixel(0, 0).0, [0x63, 0x66, 0xf1, 255]);
    }

    #[test]
    fn missing_image_falls_back_to_neutral() {
        let bg = render_background(&ActiveMode::Image(None), 2, 2).unwrap();
        assert!(bg.pixels().all(|p| p.0 == [128, 128, 128, 255]));
    }

    #[test]
    fn image_is_resampled_to_target() {
        let image = BackgroundImage::new(RgbaImage::from_pixel(8, 4, Rgba([1, 2, 3, 0])));
        let bg = render_background(&ActiveMode::Image(Some(&image)), 4, 2).unwrap();
        assert_eq!(bg.dimensions(), (4, 2));
        assert!(bg.pixels().all(|p| p.0 == [1, 2, 3, 255]));
    }

    #[test]
    fn renderer_reuses_cached_buffer_until_inputs_change() {
        let mut renderer = BackgroundRenderer::new();
        let red = ActiveMode::Solid(Rgb([255, 0, 0]));
        let first = renderer.render(&red, 4, 4).unwrap().as_ptr();
        let second = renderer.render(&red, 4, 4).unwrap().as_ptr();
        assert_eq!(first, second);

        let blue = ActiveMode::Solid(Rgb([0, 0, 255]));
        let bg = renderer.render(&blue, 4, 4).unwrap();
        assert_eq!(bg.get_pixel(0, 0).0, [0, 0, 255, 255]);

        let bg = renderer.render(&blue, 2, 3).unwrap();
        assert_eq!(bg.dimensions(), (2, 3));
    }

    #[test]
    fn new_upload_invalidates_cache() {
        let mut renderer = BackgroundRenderer::new();
        let a = BackgroundImage::new(RgbaImage::from_pixel(2, 2, Rgba([5, 5, 5, 255])));
        let b = BackgroundImage::new(RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255])));

        renderer.render(&ActiveMode::Image(Some(&a)), 2, 2);
        let bg = renderer.render(&ActiveMode::Image(Some(&b)), 2, 2).unwrap();
        assert_eq!(bg.get_pixel(1, 1).0, [9, 9, 9, 255]);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = BackgroundImage::load("/nonexistent/backdrop.png").unwrap_err();
        assert!(matches!(err, Error::BackgroundImage { .. }));
    }
}
