//! Named model-size presets and the task-specific config builders

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::model_config::{PredictionType, TaskMode, TrainingMode, UniversalDiTConfig};
use crate::core::error::{DiTError, Result};

/// Model size tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    Tiny,
    Small,
    #[default]
    Base,
    Large,
}

/// Width/depth/heads selected by a size tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeDims {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
}

impl ModelSize {
    pub const ALL: [ModelSize; 4] = [ModelSize::Tiny, ModelSize::Small, ModelSize::Base, ModelSize::Large];

    pub fn dims(&self) -> SizeDims {
        let (hidden_size, num_hidden_layers, num_attention_heads, num_key_value_heads) = match self {
            ModelSize::Tiny => (384, 6, 6, 2),
            ModelSize::Small => (512, 8, 8, 4),
            ModelSize::Base => (768, 12, 12, 4),
            ModelSize::Large => (1024, 16, 16, 8),
        };
        SizeDims {
            hidden_size,
            num_hidden_layers,
            num_attention_heads,
            num_key_value_heads,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Small => "small",
            ModelSize::Base => "base",
            ModelSize::Large => "large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelSize {
    type Err = DiTError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tiny" => Ok(ModelSize::Tiny),
            "small" => Ok(ModelSize::Small),
            "base" => Ok(ModelSize::Base),
            "large" => Ok(ModelSize::Large),
            other => Err(DiTError::config("model_size", format!("Unknown model_size: {}", other))),
        }
    }
}

impl UniversalDiTConfig {
    /// Preset for a size tag, task and prediction type
    pub fn preset(size: ModelSize, task_mode: TaskMode, prediction_type: PredictionType) -> Self {
        create_universal_config(size, task_mode, prediction_type, TrainingMode::PatchOnly)
    }
}

/// Build a full config from a size tag
///
/// The MLP is 4x the hidden width and EVA/CLIP widths are 4096/1024. The
/// positional table is sized to the training layout's token count.
pub fn create_universal_config(
    size: ModelSize,
    task_mode: TaskMode,
    prediction_type: PredictionType,
    training_mode: TrainingMode,
) -> UniversalDiTConfig {
    let dims = size.dims();
    UniversalDiTConfig {
        hidden_size: dims.hidden_size,
        num_hidden_layers: dims.num_hidden_layers,
        num_attention_heads: dims.num_attention_heads,
        num_key_value_heads: dims.num_key_value_heads,
        intermediate_size: dims.hidden_size * 4,
        task_mode,
        eva_embedding_size: 4096,
        clip_embedding_size: 1024,
        num_tokens: training_mode.num_tokens(),
        max_position_embeddings: training_mode.num_tokens(),
        training_mode,
        prediction_type,
        ..Default::default()
    }
}

/// EVA denoising (EVA in, EVA conditioning)
pub fn eva_denoising_config(size: ModelSize) -> UniversalDiTConfig {
    UniversalDiTConfig::preset(size, TaskMode::EvaDenoising, PredictionType::Velocity)
}

/// CLIP denoising (CLIP in, EVA conditioning)
pub fn clip_denoising_config(size: ModelSize) -> UniversalDiTConfig {
    UniversalDiTConfig::preset(size, TaskMode::ClipDenoising, PredictionType::Velocity)
}
