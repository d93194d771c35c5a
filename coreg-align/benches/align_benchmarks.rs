use coreg_align::{
    match_descriptors, mean_squared_error, mutual_information, warp, AlignmentPipeline, Transform, TransformEstimator,
};
use coreg_core::{AlignConfig, Descriptors, DetectorMode, RansacConfig, WarpConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{GrayImage, Luma};

fn create_benchmark_image(size: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| {
        let (i, j) = (x / 16, y / 16);
        let mut h = i.wrapping_mul(2_654_435_761) ^ j.wrapping_mul(40_503);
        h ^= h >> 16;
        Luma([(h % 256) as u8])
    })
}

fn pseudo_binary(n: usize, salt: u8) -> Descriptors {
    Descriptors::Binary(
        (0..n)
            .map(|i| {
                let mut d = [0u8; 32];
                for (k, b) in d.iter_mut().enumerate() {
                    *b = ((i * 31 + k * 17) as u8).wrapping_mul(salt) ^ (k as u8);
                }
                d
            })
            .collect(),
    )
}

fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_descriptors");
    for n in [500usize, 2000] {
        let query = pseudo_binary(n, 7);
        let train = pseudo_binary(n, 13);
        group.bench_with_input(BenchmarkId::new("mutual", n), &n, |b, _| {
            b.iter(|| match_descriptors(black_box(&query), black_box(&train), false).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("knn2", n), &n, |b, _| {
            b.iter(|| match_descriptors(black_box(&query), black_box(&train), true).unwrap())
        });
    }
    group.finish();
}

fn bench_estimation(c: &mut Criterion) {
    let truth = Transform::similarity(1.02, 0.1, 12.0, -5.0);
    let train: Vec<(f64, f64)> = (0..500)
        .map(|i| ((i % 25) as f64 * 20.0, (i / 25) as f64 * 20.0))
        .collect();
    let query: Vec<(f64, f64)> = train
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| if i % 3 == 0 { (y, x) } else { truth.apply(x, y) })
        .collect();
    let estimator = TransformEstimator::new(RansacConfig::default()).unwrap();
    c.bench_function("ransac_similarity_500", |b| {
        b.iter(|| estimator.estimate(black_box(&query), black_box(&train)).unwrap())
    });
}

fn bench_warp_and_metrics(c: &mut Criterion) {
    let img = create_benchmark_image(1024);
    let t = Transform::rotation_about(512.0, 512.0, 0.1);
    c.bench_function("warp_bilinear_1024", |b| {
        b.iter(|| warp(black_box(&img), &t, (1024, 1024), &WarpConfig::default()).unwrap())
    });
    let moved = warp(&img, &t, (1024, 1024), &WarpConfig::default()).unwrap();
    c.bench_function("mutual_information_1024", |b| {
        b.iter(|| mutual_information(black_box(&img), black_box(&moved), 256).unwrap())
    });
    c.bench_function("mean_squared_error_1024", |b| {
        b.iter(|| mean_squared_error(black_box(&img), black_box(&moved)).unwrap())
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("align");
    group.sample_size(10);
    let img = create_benchmark_image(512);
    let moved = warp(&img, &Transform::translation(9.0, -4.0), (512, 512), &WarpConfig::default()).unwrap();
    for mode in [DetectorMode::ScaleInvariant, DetectorMode::Binary] {
        let config = AlignConfig::builder().mode(mode).max_features(2000).build().unwrap();
        let pipeline = AlignmentPipeline::new(config).unwrap();
        group.bench_function(BenchmarkId::from_parameter(mode), |b| {
            b.iter(|| pipeline.align(black_box(&img), black_box(&moved), None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_matching, bench_estimation, bench_warp_and_metrics, bench_pipeline);
criterion_main!(benches);
