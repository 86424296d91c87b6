use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{GrayImage, Luma, Rgba, RgbaImage};
use live_backdrop::filters::{self, FilterScratch, Morph};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn frame() -> RgbaImage {
    RgbaImage::from_fn(WIDTH, HEIGHT, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

fn mask() -> GrayImage {
    GrayImage::from_fn(WIDTH, HEIGHT, |x, y| {
        let dx = x as f32 - WIDTH as f32 / 2.0;
        let dy = y as f32 - HEIGHT as f32 / 2.0;
        if dx * dx + dy * dy < 150.0 * 150.0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

fn bench_filters(c: &mut Criterion) {
    let frame = frame();
    let mask = mask();
    let background = RgbaImage::from_pixel(WIDTH, HEIGHT, Rgba([31, 41, 55, 255]));
    let mut scratch = FilterScratch::new();

    let mut blurred = RgbaImage::new(WIDTH, HEIGHT);
    c.bench_function("gaussian_blur_rgba_r10", |b| {
        b.iter(|| {
            filters::gaussian_blur_into(
                black_box(&frame),
                &mut blurred,
                10,
                filters::default_sigma(10),
                &mut scratch,
            )
        })
    });

    let mut smoothed = GrayImage::new(WIDTH, HEIGHT);
    c.bench_function("smooth_edges_mask", |b| {
        b.iter(|| {
            filters::gaussian_blur_into(
                black_box(&mask),
                &mut smoothed,
                filters::SMOOTH_RADIUS,
                filters::SMOOTH_SIGMA,
                &mut scratch,
            )
        })
    });

    let mut dilated = GrayImage::new(WIDTH, HEIGHT);
    c.bench_function("dilate_mask_x3", |b| {
        b.iter(|| filters::morph_into(black_box(&mask), &mut dilated, 1, 3, Morph::Dilate, &mut scratch))
    });

    let mut out = RgbaImage::new(WIDTH, HEIGHT);
    c.bench_function("blend_alpha", |b| {
        b.iter(|| filters::blend_alpha_into(black_box(&frame), &background, &mask, &mut out))
    });
}

criterion_group!(benches, bench_filters);
criterion_main!(benches);
