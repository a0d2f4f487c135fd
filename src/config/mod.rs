//! Configuration types and size presets

mod model_config;
mod presets;

pub use model_config::{PredictionType, TaskInfo, TaskMode, TrainingMode, UniversalDiTConfig};
pub use presets::{
    clip_denoising_config, create_universal_config, eva_denoising_config, ModelSize, SizeDims,
};
