//! Benchmark suite for the fused cross-entropy kernels
//!
//! Forward alone and forward+backward over a 32000-class vocabulary, with
//! and without the logit transforms.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hlx_cross_entropy::{
    cross_entropy_forward, fast_cross_entropy_loss, CrossEntropyKernelArgs, LogitTransform,
    LossConfig, ScoreMatrix,
};

const VOCAB: usize = 32000;

fn make_batch(rows: usize) -> (Vec<f32>, Vec<i64>) {
    let scores = (0..rows * VOCAB)
        .map(|i| ((i * 31) as f32).sin() * 4.0)
        .collect();
    let labels = (0..rows).map(|r| ((r * 7919) % VOCAB) as i64).collect();
    (scores, labels)
}

fn benchmark_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward");

    for rows in [8usize, 64].iter() {
        let (scores, labels) = make_batch(*rows);
        group.throughput(Throughput::Elements((rows * VOCAB) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            let view = ScoreMatrix::contiguous(&scores, VOCAB).unwrap();
            let args = CrossEntropyKernelArgs::new(VOCAB, VOCAB, LogitTransform::identity()).unwrap();
            b.iter(|| {
                let out = cross_entropy_forward(black_box(&view), black_box(&labels), &args).unwrap();
                black_box(out)
            });
        });
    }

    group.finish();
}

fn benchmark_forward_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_backward");
    let rows = 64;
    let (scores, labels) = make_batch(rows);

    let configs = [
        ("plain", LossConfig::default()),
        ("softcap", LossConfig::default().with_softcap(30.0)),
        ("scale_softcap", LossConfig::default().with_scale(2.0).with_softcap(30.0)),
    ];

    group.throughput(Throughput::Elements((rows * VOCAB) as u64));
    for (name, config) in configs.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), config, |b, config| {
            b.iter_batched(
                || scores.clone(),
                |mut work| {
                    let out =
                        fast_cross_entropy_loss(&mut work, &labels, [1, rows, VOCAB], config, None)
                            .unwrap();
                    let loss = out.loss;
                    out.backward(1.0).unwrap();
                    black_box(loss)
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_forward, benchmark_forward_backward);
criterion_main!(benches);
