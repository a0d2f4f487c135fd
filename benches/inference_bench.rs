//! Benchmarks for the universal DiT
//!
//! Run with: cargo bench

use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use universal_dit::models::dit::{l2_normalize, RotaryEmbedding};
use universal_dit::{
    eva_denoising_config, ModelSize, SphericalFlowSampler, TaskMode, UniversalDiT, UniversalDiTConfig,
};

/// Small config so a bench iteration stays well under a second on CPU
fn bench_config(task_mode: TaskMode) -> UniversalDiTConfig {
    UniversalDiTConfig {
        hidden_size: 128,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        intermediate_size: 512,
        task_mode,
        ..Default::default()
    }
}

/// Benchmark L2 normalization of EVA-sized embeddings
fn bench_l2_normalize(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut group = c.benchmark_group("l2_normalize");

    for tokens in [64, 256] {
        let x = Tensor::randn(0.0f32, 1.0, (2, tokens, 4096), &device).unwrap();
        group.bench_with_input(BenchmarkId::new("eva", tokens), &x, |b, x| {
            b.iter(|| l2_normalize(black_box(x)).unwrap())
        });
    }
    group.finish();
}

/// Benchmark rotary table construction
fn bench_rotary_tables(c: &mut Criterion) {
    let device = Device::Cpu;
    let rope = RotaryEmbedding::new(64, 10000.0, &device).unwrap();
    c.bench_function("rotary_tables_257", |b| b.iter(|| rope.forward(black_box(257)).unwrap()));
}

/// Benchmark model construction with random weights
fn bench_model_init(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut group = c.benchmark_group("model_init");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("small_bench_config", |b| {
        b.iter(|| UniversalDiT::from_config(bench_config(TaskMode::EvaDenoising), DType::F32, &device).unwrap())
    });
    group.finish();
}

/// Benchmark DiT forward pass (with random weights)
fn bench_dit_forward(c: &mut Criterion) {
    let device = Device::Cpu;

    let mut group = c.benchmark_group("dit_forward");
    group.measurement_time(Duration::from_secs(20));
    group.sample_size(10);

    for task in [TaskMode::EvaDenoising, TaskMode::ClipDenoising] {
        let config = bench_config(task);
        let dit = UniversalDiT::from_config(config.clone(), DType::F32, &device).unwrap();

        for tokens in [64, 256] {
            let x = Tensor::randn(0.0f32, 1.0, (1, tokens, config.input_embedding_size()), &device).unwrap();
            let cond = Tensor::randn(0.0f32, 1.0, (1, tokens, config.conditioning_embedding_size()), &device).unwrap();
            let t = Tensor::new(&[0.5f32], &device).unwrap();

            group.bench_with_input(
                BenchmarkId::new(task.as_str(), tokens),
                &(x, t, cond),
                |b, (x, t, cond)| b.iter(|| dit.forward(black_box(x), black_box(t), black_box(cond)).unwrap()),
            );
        }
    }
    group.finish();
}

/// Benchmark spherical flow sampling
fn bench_sampling(c: &mut Criterion) {
    let device = Device::Cpu;
    let config = bench_config(TaskMode::EvaDenoising);
    let dit = UniversalDiT::from_config(config.clone(), DType::F32, &device).unwrap();

    let mut group = c.benchmark_group("spherical_flow");
    group.measurement_time(Duration::from_secs(30));
    group.sample_size(10);

    let tokens = 64;
    let noisy = Tensor::randn(0.0f32, 1.0, (1, tokens, 4096), &device).unwrap();
    let cond = Tensor::randn(0.0f32, 1.0, (1, tokens, 4096), &device).unwrap();

    for steps in [10, 50] {
        let sampler = SphericalFlowSampler::new(steps);
        group.bench_with_input(BenchmarkId::new("sample", steps), &sampler, |b, sampler| {
            b.iter(|| sampler.sample(black_box(&dit), black_box(&noisy), black_box(&cond)).unwrap())
        });
    }
    group.finish();
}

/// Benchmark preset creation
fn bench_preset_config(c: &mut Criterion) {
    c.bench_function("eva_denoising_config_base", |b| {
        b.iter(|| eva_denoising_config(black_box(ModelSize::Base)))
    });
}

criterion_group!(benches, bench_l2_normalize, bench_rotary_tables, bench_preset_config);

criterion_group!(
    name = slow_benches;
    config = Criterion::default().sample_size(10);
    targets = bench_model_init, bench_dit_forward, bench_sampling
);

criterion_main!(benches, slow_benches);
