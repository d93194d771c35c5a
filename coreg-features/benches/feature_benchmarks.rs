use coreg_core::ClaheConfig;
use coreg_features::{Clahe, FeatureExtractor, OrbExtractor, SiftExtractor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{GrayImage, Luma};

/// Benchmark image with cell structure and a smooth illumination gradient
fn create_benchmark_image(size: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| {
        let (i, j) = (x / 20, y / 20);
        let mut h = i.wrapping_mul(2_654_435_761) ^ j.wrapping_mul(40_503);
        h ^= h >> 16;
        let cell = (h % 160) as f32;
        let gradient = x as f32 / size as f32 * 60.0;
        Luma([(cell + gradient).min(255.0) as u8])
    })
}

fn bench_clahe(c: &mut Criterion) {
    let mut group = c.benchmark_group("clahe");
    let clahe = Clahe::new(ClaheConfig::default()).unwrap();
    for size in [256u32, 512, 1024] {
        let img = create_benchmark_image(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &img, |b, img| {
            b.iter(|| clahe.apply(black_box(img)).unwrap())
        });
    }
    group.finish();
}

fn bench_extractors(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect_and_describe");
    group.sample_size(10);
    let sift = SiftExtractor::with_max_features(2000).unwrap();
    let orb = OrbExtractor::with_max_features(2000).unwrap();

    for size in [256u32, 512] {
        let img = create_benchmark_image(size);
        group.bench_with_input(BenchmarkId::new("sift", size), &img, |b, img| {
            b.iter(|| sift.detect_and_describe(black_box(img)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("orb", size), &img, |b, img| {
            b.iter(|| orb.detect_and_describe(black_box(img)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_clahe, bench_extractors);
criterion_main!(benches);
