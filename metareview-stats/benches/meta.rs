use criterion::{black_box, criterion_group, criterion_main, Criterion};
use metareview_stats::bias::{trim_and_fill, TrimFillEstimator};
use metareview_stats::pooling::{meta_analysis, Model};
use metareview_stats::sensitivity::leave_one_out;
use metareview_stats::study::{EffectMeasure, Study};

fn random_f64(n: usize, seed: u64) -> Vec<f64> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 11) as f64 / (1u64 << 53) as f64
        })
        .collect()
}

fn random_studies(k: usize, seed: u64) -> Vec<Study> {
    let effects = random_f64(k, seed);
    let errors = random_f64(k, seed + 1);
    effects
        .iter()
        .zip(&errors)
        .enumerate()
        .map(|(i, (y, s))| Study::generic(i.to_string(), format!("S{}", i), y - 0.5, 0.05 + s))
        .collect()
}

fn bench_pooling(c: &mut Criterion) {
    let mut group = c.benchmark_group("pooling");

    let studies = random_studies(1_000, 42);
    group.bench_function("1k_random_effects", |b| {
        b.iter(|| meta_analysis(black_box(&studies), EffectMeasure::MeanDifference, Model::Random))
    });

    group.finish();
}

fn bench_leave_one_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("leave_one_out");

    let studies = random_studies(200, 42);
    let result = meta_analysis(&studies, EffectMeasure::MeanDifference, Model::Random).unwrap();
    group.bench_function("200_studies", |b| b.iter(|| leave_one_out(black_box(&result))));

    group.finish();
}

fn bench_trim_and_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("trim_and_fill");

    let studies = random_studies(1_000, 7);
    let result = meta_analysis(&studies, EffectMeasure::MeanDifference, Model::Random).unwrap();
    group.bench_function("1k_r0", |b| {
        b.iter(|| trim_and_fill(black_box(&result), TrimFillEstimator::R0))
    });

    group.finish();
}

criterion_group!(benches, bench_pooling, bench_leave_one_out, bench_trim_and_fill);
criterion_main!(benches);
