//! Integration tests for universal-dit
//!
//! End-to-end scenarios: construction from presets and JSON, forward passes
//! for both tasks, denoising on the unit sphere, and checkpoint round-trips.

use candle_core::{DType, Device, Tensor};

use universal_dit::models::dit::row_norms;
use universal_dit::{
    create_universal_config, eva_denoising_config, DiTError, ModelSize, PredictionType, SamplerConfig, SphericalFlowSampler,
    TaskMode, TensorRole, TrainingMode, UniversalDiT, UniversalDiTConfig,
};

/// Tiny preset with narrower transformer so the full 4096/1024 widths stay cheap
fn tiny_config(task_mode: TaskMode, prediction_type: PredictionType) -> UniversalDiTConfig {
    UniversalDiTConfig {
        hidden_size: 64,
        num_hidden_layers: 2,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        intermediate_size: 128,
        ..create_universal_config(ModelSize::Tiny, task_mode, prediction_type, TrainingMode::PatchOnly)
    }
}

fn random(shape: (usize, usize, usize)) -> Tensor {
    Tensor::randn(0.0f32, 1.0, shape, &Device::Cpu).unwrap()
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b).unwrap().abs().unwrap().max_all().unwrap().to_scalar().unwrap()
}

fn assert_unit_rows(x: &Tensor) {
    let norms: Vec<f32> = row_norms(x).unwrap().flatten_all().unwrap().to_vec1().unwrap();
    for n in norms {
        assert!((n - 1.0).abs() < 1e-4, "row norm {} is not 1", n);
    }
}

fn assert_finite(x: &Tensor) {
    let values: Vec<f32> = x.flatten_all().unwrap().to_vec1().unwrap();
    assert!(values.iter().all(|v| v.is_finite()), "non-finite values in output");
}

/// Test an EVA denoising forward pass at full embedding width
#[test]
fn test_eva_forward() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let x = random((2, 8, 4096));
    let c = random((2, 8, 4096));
    let t = Tensor::new(&[0.5f32, 0.5], &Device::Cpu).unwrap();

    let out = model.forward(&x, &t, &c).unwrap();
    assert_eq!(out.prediction.dims(), &[2, 8, 4096]);
    assert_finite(&out.prediction);
}

/// Test the stock tiny EVA preset end to end: forward, then a 5-step denoise
#[test]
fn test_tiny_preset_end_to_end() {
    let config = eva_denoising_config(ModelSize::Tiny);
    assert_eq!(
        (config.hidden_size, config.num_hidden_layers, config.num_attention_heads, config.num_key_value_heads),
        (384, 6, 6, 2)
    );
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let x = random((2, 8, 4096));
    let c = random((2, 8, 4096));
    let t = Tensor::new(&[0.1f32, 0.7], &Device::Cpu).unwrap();
    let out = model.forward(&x, &t, &c).unwrap();
    assert_eq!(out.prediction.dims(), &[2, 8, 4096]);
    assert_finite(&out.prediction);

    let (clean, intermediates) = model.denoise_with_intermediates(&x, &c, 5).unwrap();
    assert_eq!(clean.dims(), &[2, 8, 4096]);
    assert_unit_rows(&clean);
    assert_eq!(intermediates.len(), 5);
}

/// Test the CLIP task reads CLIP inputs and EVA conditioning
#[test]
fn test_clip_task_dimensions() {
    let config = tiny_config(TaskMode::ClipDenoising, PredictionType::Velocity);
    assert_eq!(config.input_embedding_size(), 1024);
    assert_eq!(config.conditioning_embedding_size(), 4096);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let x = random((1, 16, 1024));
    let c = random((1, 16, 4096));
    let t = Tensor::new(&[0.9f32], &Device::Cpu).unwrap();
    let out = model.forward(&x, &t, &c).unwrap();
    assert_eq!(out.prediction.dims(), &[1, 16, 1024]);
    assert_eq!(out.task_mode, TaskMode::ClipDenoising);

    // Conditioning at CLIP width is rejected
    let err = model.forward(&x, &t, &random((1, 16, 1024))).err().unwrap();
    assert!(matches!(
        err,
        DiTError::ShapeMismatch { tensor: TensorRole::EncoderHiddenStates, .. }
    ));
}

/// Test unknown task tags fail at configuration time
#[test]
fn test_unknown_task_rejected() {
    let err = "audio_denoising".parse::<TaskMode>().unwrap_err();
    assert!(err.is_config());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"task_mode": "audio_denoising"}"#).unwrap();
    assert!(UniversalDiTConfig::from_json_file(&path).is_err());
}

/// Test denoising keeps every row on the unit sphere and records each step
#[test]
fn test_denoise_with_intermediates() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let noisy = random((2, 8, 4096));
    let cond = random((2, 8, 4096));
    let (clean, intermediates) = model.denoise_with_intermediates(&noisy, &cond, 5).unwrap();

    assert_eq!(clean.dims(), &[2, 8, 4096]);
    assert_unit_rows(&clean);
    assert_eq!(intermediates.len(), 5);
    for state in &intermediates {
        assert_unit_rows(state);
    }
    assert_eq!(max_abs_diff(&intermediates[4], &clean), 0.0);
}

/// Test denoise with the plain API matches the intermediate-collecting variant
#[test]
fn test_denoise_matches_intermediate_variant() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let noisy = random((1, 4, 4096));
    let cond = random((1, 4, 4096));
    let a = model.denoise(&noisy, &cond, 3).unwrap();
    let (b, _) = model.denoise_with_intermediates(&noisy, &cond, 3).unwrap();
    assert!(max_abs_diff(&a, &b) < 1e-6);
}

/// Test a single step calls the callback exactly once at t = 1
#[test]
fn test_single_step_callback() {
    let config = tiny_config(TaskMode::ClipDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let noisy = random((1, 4, 1024));
    let cond = random((1, 4, 4096));
    let mut calls = Vec::new();
    SphericalFlowSampler::new(1)
        .sample_with_callback(&model, &noisy, &cond, |info, _| calls.push(info.t))
        .unwrap();
    assert_eq!(calls, vec![1.0]);
}

/// Test zero inference steps are rejected
#[test]
fn test_zero_steps() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();
    let x = random((1, 4, 4096));
    let err = model.denoise(&x, &x, 0).err().unwrap();
    assert!(matches!(err, DiTError::Validation { .. }));
}

/// Test zero-vector inputs produce finite outputs
#[test]
fn test_zero_input_finite() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let zeros = Tensor::zeros((1, 4, 4096), DType::F32, &Device::Cpu).unwrap();
    let t = Tensor::new(&[0.0f32], &Device::Cpu).unwrap();
    let out = model.forward(&zeros, &t, &zeros).unwrap();
    assert_finite(&out.prediction);
}

/// Test target prediction returns unit-norm rows from both forward and denoise
#[test]
fn test_target_prediction_unit_norm() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Target);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let x = random((2, 4, 4096));
    let c = random((2, 4, 4096));
    let t = Tensor::new(&[0.2f32, 0.8], &Device::Cpu).unwrap();
    assert_unit_rows(&model.forward(&x, &t, &c).unwrap().prediction);
    assert_unit_rows(&model.denoise(&x, &c, 2).unwrap());
}

/// Test repeated calls on the same inputs give identical results
#[test]
fn test_deterministic_inference() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let noisy = random((1, 4, 4096));
    let cond = random((1, 4, 4096));
    let a = model.denoise(&noisy, &cond, 3).unwrap();
    let b = model.denoise(&noisy, &cond, 3).unwrap();
    assert_eq!(max_abs_diff(&a, &b), 0.0);
}

/// Test shape validation at the top of forward
#[test]
fn test_input_validation() {
    let config = tiny_config(TaskMode::EvaDenoising, PredictionType::Velocity);
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();
    let t = Tensor::new(&[0.5f32], &Device::Cpu).unwrap();

    let err = model.forward(&random((1, 4, 1024)), &t, &random((1, 4, 4096))).err().unwrap();
    assert!(matches!(err, DiTError::ShapeMismatch { tensor: TensorRole::HiddenStates, .. }));

    let err = model.forward(&random((1, 257, 4096)), &t, &random((1, 257, 4096))).err().unwrap();
    assert!(matches!(
        err,
        DiTError::SequenceTooLong { seq_len: 257, max_positions: 256 }
    ));
}

/// Test the CLS + patch layout accepts 257 tokens
#[test]
fn test_cls_patch_layout() {
    let config = UniversalDiTConfig {
        hidden_size: 64,
        num_hidden_layers: 1,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        intermediate_size: 128,
        ..create_universal_config(
            ModelSize::Tiny,
            TaskMode::ClipDenoising,
            PredictionType::Velocity,
            TrainingMode::ClsPatch,
        )
    };
    let model = UniversalDiT::from_config(config, DType::F32, &Device::Cpu).unwrap();

    let t = Tensor::new(&[0.5f32], &Device::Cpu).unwrap();
    let out = model.forward(&random((1, 257, 1024)), &t, &random((1, 257, 4096))).unwrap();
    assert_eq!(out.prediction.dims(), &[1, 257, 1024]);
}

/// Test checkpoint and config round-trip through disk
#[test]
fn test_checkpoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("model.safetensors");
    let config_path = dir.path().join("config.json");
    let device = Device::Cpu;

    let config = tiny_config(TaskMode::ClipDenoising, PredictionType::Target);
    let model = UniversalDiT::from_config(config.clone(), DType::F32, &device).unwrap();
    model.save_weights(&weights).unwrap();
    config.to_json_file(&config_path).unwrap();

    let loaded_config = UniversalDiTConfig::from_json_file(&config_path).unwrap();
    assert_eq!(loaded_config, config);
    let restored = UniversalDiT::load(loaded_config, &weights, DType::F32, &device).unwrap();
    assert_eq!(restored.num_parameters(), model.num_parameters());

    let noisy = random((1, 4, 1024));
    let cond = random((1, 4, 4096));
    let a = model.denoise(&noisy, &cond, 2).unwrap();
    let b = restored.denoise(&noisy, &cond, 2).unwrap();
    assert_eq!(max_abs_diff(&a, &b), 0.0);
}

/// Test sampler configuration defaults
#[test]
fn test_sampler_defaults() {
    let sampler = SphericalFlowSampler::with_config(SamplerConfig::default());
    assert_eq!(sampler.config().num_steps, universal_dit::DEFAULT_NUM_STEPS);
    assert_eq!(sampler.timesteps().len(), 50);
}
