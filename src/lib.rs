//! # universal-dit
//!
//! A diffusion transformer that denoises vision-encoder patch embeddings by
//! spherical flow matching.
//!
//! ## Features
//!
//! - **Two tasks**: EVA-CLIP denoising, and CLIP-ViT denoising conditioned on EVA-CLIP
//! - **Spherical flow**: inputs, states and (for `target`) outputs live on the unit hypersphere
//! - **Grouped-query attention** with rotary position embedding
//! - **AdaLN** timestep conditioning on every sub-layer
//! - **GPU Acceleration**: CUDA and Metal support via Candle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use candle_core::{DType, Device, Tensor};
//! use universal_dit::{eva_denoising_config, ModelSize, UniversalDiT};
//!
//! let device = Device::Cpu;
//! let model = UniversalDiT::from_config(eva_denoising_config(ModelSize::Tiny), DType::F32, &device)?;
//!
//! let noisy = Tensor::randn(0f32, 1.0, (2, 256, 4096), &device)?;
//! let conditioning = Tensor::randn(0f32, 1.0, (2, 256, 4096), &device)?;
//! let clean = model.denoise(&noisy, &conditioning, 50)?;
//! ```
//!
//! ## Presets
//!
//! | Size | Hidden | Layers | Heads | KV heads |
//! |------|--------|--------|-------|----------|
//! | tiny | 384 | 6 | 6 | 2 |
//! | small | 512 | 8 | 8 | 4 |
//! | base | 768 | 12 | 12 | 4 |
//! | large | 1024 | 16 | 16 | 8 |

pub mod config;
pub mod core;
pub mod models;

pub use config::{
    clip_denoising_config, create_universal_config, eva_denoising_config, ModelSize,
    PredictionType, TaskInfo, TaskMode, TrainingMode, UniversalDiTConfig,
};
pub use crate::core::error::{DiTError, Result, TensorRole};
pub use models::dit::{
    DiTOutput, ForwardOptions, SampleOutput, SamplerConfig, SphericalFlowSampler, StepInfo,
    UniversalDiT, DEFAULT_NUM_STEPS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
