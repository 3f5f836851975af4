use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tanal::audio::click::synthesize_clicks;
use tanal::audio::{AudioBuffer, TempoEstimator, TempoParameters};

fn click_track(bpm: f64, seconds: f64) -> AudioBuffer {
    let times: Vec<f64> = (0..)
        .map(|i| i as f64 * 60.0 / bpm)
        .take_while(|&t| t < seconds)
        .collect();
    let len = (seconds * 22050.0) as usize;
    AudioBuffer::new(synthesize_clicks(&times, 22050, len, 1000.0, 0.1), 22050)
}

fn bench_tempo(c: &mut Criterion) {
    let buffer = click_track(128.0, 30.0);
    let params = TempoParameters::default();

    c.bench_function("onset envelopes 30s", |b| {
        b.iter(|| TempoEstimator::new(black_box(&buffer), &params).unwrap())
    });

    let estimator = TempoEstimator::new(&buffer, &params).unwrap();

    c.bench_function("static tempo 30s", |b| {
        b.iter(|| estimator.beat_track(black_box(120.0)))
    });

    c.bench_function("dynamic tempo 30s", |b| {
        b.iter(|| estimator.dynamic_tempo(black_box(128.0)))
    });

    let curve = estimator.dynamic_tempo(128.0);
    c.bench_function("beat alignment 30s", |b| {
        b.iter(|| estimator.align(black_box(&curve)))
    });
}

criterion_group!(benches, bench_tempo);
criterion_main!(benches);
