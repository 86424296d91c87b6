use image::{GrayImage, ImageBuffer, Luma, Pixel, Rgba, RgbaImage};

/// Smoothing kernel used by `smooth_edges`
pub const SMOOTH_RADIUS: u32 = 2;
pub const SMOOTH_SIGMA: f32 = 1.5;

/// 8-bit pixel layouts the filters understand
///
/// The first `FILTERED_CHANNELS` channels are filtered, the rest (alpha) are
/// copied through unchanged.
pub trait FilterPixel: Pixel<Subpixel = u8> {
    const FILTERED_CHANNELS: usize;
}

impl FilterPixel for Luma<u8> {
    const FILTERED_CHANNELS: usize = 1;
}

impl FilterPixel for Rgba<u8> {
    const FILTERED_CHANNELS: usize = 3;
}

/// Reusable temporaries for the separable passes
#[derive(Debug, Default)]
pub struct FilterScratch {
    kernel: Vec<f32>,
    temp: Vec<u8>,
}

impl FilterScratch {
    pub fn new() -> Self {
        Self::default()
    }

    fn temp_for(&mut self, len: usize) -> &mut [u8] {
        self.temp.resize(len, 0);
        &mut self.temp[..len]
    }
}

/// Sigma used when none is given
pub fn default_sigma(radius: u32) -> f32 {
    radius as f32 / 2.5
}

/// Fill `kernel` with `2 * radius + 1` normalized Gaussian weights
pub fn gaussian_kernel(radius: u32, sigma: f32, kernel: &mut Vec<f32>) {
    kernel.clear();
    if radius == 0 || sigma <= 0.0 {
        kernel.push(1.0);
        return;
    }

    let two_sigma_sq = 2.0 * sigma * sigma;
    let r = radius as i32;
    kernel.extend((-r..=r).map(|x| (-((x * x) as f32) / two_sigma_sq).exp()));

    let sum: f32 = kernel.iter().sum();
    for weight in kernel.iter_mut() {
        *weight /= sum;
    }
}

/// Separable Gaussian blur with clamped borders
pub fn gaussian_blur<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    radius: u32,
    sigma: f32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: FilterPixel,
{
    let mut dst = ImageBuffer::new(src.width(), src.height());
    gaussian_blur_into(src, &mut dst, radius, sigma, &mut FilterScratch::new());
    dst
}

/// `gaussian_blur` writing into a caller-owned buffer
///
/// `dst` is reallocated only if its dimensions differ from `src`.
pub fn gaussian_blur_into<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    dst: &mut ImageBuffer<P, Vec<u8>>,
    radius: u32,
    sigma: f32,
    scratch: &mut FilterScratch,
) where
    P: FilterPixel,
{
    let _span = tracing::debug_span!("gaussian_blur", radius).entered();

    let (width, height) = src.dimensions();
    if dst.dimensions() != (width, height) {
        *dst = ImageBuffer::new(width, height);
    }

    let layout = Layout::of::<P>(width, height);
    let mut kernel = std::mem::take(&mut scratch.kernel);
    gaussian_kernel(radius, sigma, &mut kernel);

    let temp = scratch.temp_for(src.as_raw().len());
    convolve_pass(src.as_raw(), temp, layout, &kernel, Axis::Horizontal);
    convolve_pass(temp, dst, layout, &kernel, Axis::Vertical);

    scratch.kernel = kernel;
}

/// Grow the foreground: max over a `(2r+1)²` square, repeated `iterations` times
pub fn dilate(mask: &GrayImage, radius: u32, iterations: u32) -> GrayImage {
    let mut dst = GrayImage::new(mask.width(), mask.height());
    morph_into(mask, &mut dst, radius, iterations, Morph::Dilate, &mut FilterScratch::new());
    dst
}

/// Shrink the foreground: min over a `(2r+1)²` square, repeated `iterations` times
pub fn erode(mask: &GrayImage, radius: u32, iterations: u32) -> GrayImage {
    let mut dst = GrayImage::new(mask.width(), mask.height());
    morph_into(mask, &mut dst, radius, iterations, Morph::Erode, &mut FilterScratch::new());
    dst
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Morph {
    Dilate,
    Erode,
}

impl Morph {
    fn pick(self, a: u8, b: u8) -> u8 {
        match self {
            Morph::Dilate => a.max(b),
            Morph::Erode => a.min(b),
        }
    }
}

/// Morphological filter writing into a caller-owned buffer
pub fn morph_into(
    src: &GrayImage,
    dst: &mut GrayImage,
    radius: u32,
    iterations: u32,
    op: Morph,
    scratch: &mut FilterScratch,
) {
    let (width, height) = src.dimensions();
    if dst.dimensions() != (width, height) {
        *dst = GrayImage::new(width, height);
    }
    dst.copy_from_slice(src.as_raw());

    if radius == 0 {
        return;
    }

    // A square window is separable for max and min
    let layout = Layout::of::<Luma<u8>>(width, height);
    let temp = scratch.temp_for(src.as_raw().len());
    for _ in 0..iterations {
        extremum_pass(dst, temp, layout, radius, op, Axis::Horizontal);
        extremum_pass(temp, dst, layout, radius, op, Axis::Vertical);
    }
}

/// Small blur that turns a hard mask boundary into an alpha ramp
pub fn smooth_edges(mask: &GrayImage) -> GrayImage {
    gaussian_blur(mask, SMOOTH_RADIUS, SMOOTH_SIGMA)
}

/// Per pixel `fg * a + bg * (1 - a)` with `a = mask / 255`
///
/// The result keeps the foreground's own alpha.
pub fn blend_alpha(fg: &RgbaImage, bg: &RgbaImage, mask: &GrayImage) -> RgbaImage {
    let mut out = RgbaImage::new(fg.width(), fg.height());
    blend_alpha_into(fg, bg, mask, &mut out);
    out
}

pub fn blend_alpha_into(fg: &RgbaImage, bg: &RgbaImage, mask: &GrayImage, out: &mut RgbaImage) {
    let _span = tracing::debug_span!("blend_alpha").entered();

    if out.dimensions() != fg.dimensions() {
        *out = RgbaImage::new(fg.width(), fg.height());
    }

    let pixels = out
        .pixels_mut()
        .zip(fg.pixels())
        .zip(bg.pixels())
        .zip(mask.pixels());

    for (((out, fg), bg), m) in pixels {
        let a = m[0] as f32 / 255.0;
        for c in 0..3 {
            let value = fg[c] as f32 * a + bg[c] as f32 * (1.0 - a);
            out[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        out[3] = fg[3];
    }
}

/// Greyscale, opaque rendering of a mask for the matte preview
pub fn mask_to_rgba(mask: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y)[0];
        Rgba([v, v, v, 255])
    })
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    width: usize,
    height: usize,
    channels: usize,
    filtered: usize,
}

impl Layout {
    fn of<P: FilterPixel>(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
            channels: P::CHANNEL_COUNT as usize,
            filtered: P::FILTERED_CHANNELS,
        }
    }

    /// Index of the pixel displaced by `offset` along `axis`, clamped to the image
    fn neighbor(&self, x: usize, y: usize, offset: isize, axis: Axis) -> usize {
        let (x, y) = match axis {
            Axis::Horizontal => (clamp_coord(x, offset, self.width), y),
            Axis::Vertical => (x, clamp_coord(y, offset, self.height)),
        };
        (y * self.width + x) * self.channels
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

fn clamp_coord(coord: usize, offset: isize, len: usize) -> usize {
    (coord as isize + offset).clamp(0, len as isize - 1) as usize
}

fn convolve_pass(input: &[u8], output: &mut [u8], layout: Layout, kernel: &[f32], axis: Axis) {
    let radius = (kernel.len() / 2) as isize;

    for y in 0..layout.height {
        for x in 0..layout.width {
            let base = (y * layout.width + x) * layout.channels;

            for c in 0..layout.filtered {
                let mut sum = 0.0f32;
                for (k, weight) in kernel.iter().enumerate() {
                    let idx = layout.neighbor(x, y, k as isize - radius, axis);
                    sum += input[idx + c] as f32 * weight;
                }
                output[base + c] = sum.round().clamp(0.0, 255.0) as u8;
            }

            for c in layout.filtered..layout.channels {
                output[base + c] = input[base + c];
            }
        }
    }
}

fn extremum_pass(
    input: &[u8],
    output: &mut [u8],
    layout: Layout,
    radius: u32,
    op: Morph,
    axis: Axis,
) {
    let r = radius as isize;

    for y in 0..layout.height {
        for x in 0..layout.width {
            let base = y * layout.width + x;
            output[base] = (-r..=r)
                .map(|offset| input[layout.neighbor(x, y, offset, axis)])
                .fold(input[base], |acc, v| op.pick(acc, v));
        }
    }
}
