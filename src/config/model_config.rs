//! Model configuration for the universal EVA/CLIP denoising DiT
//!
//! The task mode fixes which embedding space is denoised and which one
//! conditions it. Only two combinations exist:
//!
//! | task             | input / output | conditioning |
//! |------------------|----------------|--------------|
//! | `eva_denoising`  | EVA (4096)     | EVA (4096)   |
//! | `clip_denoising` | CLIP (1024)    | EVA (4096)   |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::core::error::{DiTError, Result};

/// Which embedding space is denoised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Noisy EVA in, clean EVA out, clean EVA conditioning
    #[default]
    EvaDenoising,
    /// Noisy CLIP in, clean CLIP out, clean EVA conditioning
    ClipDenoising,
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::EvaDenoising => "eva_denoising",
            TaskMode::ClipDenoising => "clip_denoising",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskMode {
    type Err = DiTError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eva_denoising" => Ok(TaskMode::EvaDenoising),
            "clip_denoising" => Ok(TaskMode::ClipDenoising),
            other => Err(DiTError::config(
                "task_mode",
                format!("Unknown task_mode: {}", other),
            )),
        }
    }
}

/// What the output projection predicts
///
/// `Custom` keeps unrecognized tags from older configs. The sampler treats
/// them like `Velocity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PredictionType {
    /// Tangent direction integrated by the sampler
    #[default]
    Velocity,
    /// Destination point on the unit sphere
    Target,
    /// Unrecognized tag, integrated with velocity semantics
    Custom(String),
}

impl PredictionType {
    pub fn as_str(&self) -> &str {
        match self {
            PredictionType::Velocity => "velocity",
            PredictionType::Target => "target",
            PredictionType::Custom(name) => name,
        }
    }

    /// Whether the output head renormalizes onto the unit sphere
    pub fn normalizes_output(&self) -> bool {
        matches!(self, PredictionType::Target)
    }
}

impl From<String> for PredictionType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "velocity" => PredictionType::Velocity,
            "target" => PredictionType::Target,
            _ => PredictionType::Custom(value),
        }
    }
}

impl From<&str> for PredictionType {
    fn from(value: &str) -> Self {
        PredictionType::from(value.to_string())
    }
}

impl From<PredictionType> for String {
    fn from(value: PredictionType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PredictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token layout the model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingMode {
    /// 256 patch tokens
    #[default]
    PatchOnly,
    /// CLS token + 256 patch tokens
    ClsPatch,
}

impl TrainingMode {
    /// Number of tokens per sequence in this layout
    pub fn num_tokens(&self) -> usize {
        match self {
            TrainingMode::PatchOnly => 256,
            TrainingMode::ClsPatch => 257,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMode::PatchOnly => "patch_only",
            TrainingMode::ClsPatch => "cls_patch",
        }
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingMode {
    type Err = DiTError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "patch_only" => Ok(TrainingMode::PatchOnly),
            "cls_patch" => Ok(TrainingMode::ClsPatch),
            other => Err(DiTError::config(
                "training_mode",
                format!("Unknown training_mode: {}", other),
            )),
        }
    }
}

/// Universal DiT configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniversalDiTConfig {
    /// Hidden dimension
    pub hidden_size: usize,
    /// Number of transformer blocks
    pub num_hidden_layers: usize,
    /// Number of query heads
    pub num_attention_heads: usize,
    /// Number of key/value heads (GQA)
    pub num_key_value_heads: usize,
    /// Gated MLP width
    pub intermediate_size: usize,
    /// Task variant
    pub task_mode: TaskMode,
    /// EVA-CLIP embedding width
    pub eva_embedding_size: usize,
    /// CLIP-ViT embedding width
    pub clip_embedding_size: usize,
    /// Tokens per sequence
    pub num_tokens: usize,
    /// Rows of the learned positional table
    pub max_position_embeddings: usize,
    /// RMSNorm epsilon
    pub rms_norm_eps: f64,
    /// MLP dropout
    pub dropout_prob: f32,
    /// Attention-weight dropout
    pub attention_dropout: f32,
    /// Std of the positional table init
    pub initializer_range: f64,
    /// RoPE base
    pub rope_theta: f64,
    /// Output semantics
    pub prediction_type: PredictionType,
    /// Width of the sinusoidal timestep features
    pub frequency_embedding_size: usize,
    /// Token layout
    pub training_mode: TrainingMode,
    /// Recompute block activations during training. Read from checkpoint
    /// configs; inference ignores it.
    pub use_gradient_checkpointing: bool,
}

impl Default for UniversalDiTConfig {
    fn default() -> Self {
        Self {
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            num_key_value_heads: 4,
            intermediate_size: 3072,
            task_mode: TaskMode::EvaDenoising,
            eva_embedding_size: 4096,
            clip_embedding_size: 1024,
            num_tokens: 256,
            max_position_embeddings: 256,
            rms_norm_eps: 1e-6,
            dropout_prob: 0.0,
            attention_dropout: 0.0,
            initializer_range: 0.02,
            rope_theta: 10000.0,
            prediction_type: PredictionType::Velocity,
            frequency_embedding_size: 256,
            training_mode: TrainingMode::PatchOnly,
            use_gradient_checkpointing: false,
        }
    }
}

impl UniversalDiTConfig {
    /// Load from a config.json file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty-printed JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Width of the noisy input embeddings
    pub fn input_embedding_size(&self) -> usize {
        match self.task_mode {
            TaskMode::EvaDenoising => self.eva_embedding_size,
            TaskMode::ClipDenoising => self.clip_embedding_size,
        }
    }

    /// Width of the predicted embeddings
    pub fn output_embedding_size(&self) -> usize {
        self.input_embedding_size()
    }

    /// Width of the conditioning embeddings (EVA for both tasks)
    pub fn conditioning_embedding_size(&self) -> usize {
        self.eva_embedding_size
    }

    /// Per-head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Query heads sharing one key/value head
    pub fn num_key_value_groups(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads
    }

    /// Check if uses GQA (Grouped Query Attention)
    pub fn uses_gqa(&self) -> bool {
        self.num_key_value_heads < self.num_attention_heads
    }

    /// Check structural invariants; called before any weight is created
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("hidden_size", self.hidden_size),
            ("num_hidden_layers", self.num_hidden_layers),
            ("num_attention_heads", self.num_attention_heads),
            ("num_key_value_heads", self.num_key_value_heads),
            ("intermediate_size", self.intermediate_size),
            ("eva_embedding_size", self.eva_embedding_size),
            ("clip_embedding_size", self.clip_embedding_size),
            ("max_position_embeddings", self.max_position_embeddings),
            ("frequency_embedding_size", self.frequency_embedding_size),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(DiTError::config(field, format!("{} must be > 0", field)));
            }
        }

        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(DiTError::config(
                "num_attention_heads",
                format!(
                    "hidden_size {} is not divisible by num_attention_heads {}",
                    self.hidden_size, self.num_attention_heads
                ),
            ));
        }

        if self.num_attention_heads % self.num_key_value_heads != 0 {
            return Err(DiTError::config(
                "num_key_value_heads",
                format!(
                    "num_attention_heads {} is not divisible by num_key_value_heads {}",
                    self.num_attention_heads, self.num_key_value_heads
                ),
            ));
        }

        if self.head_dim() % 2 != 0 {
            return Err(DiTError::config(
                "num_attention_heads",
                format!("head_dim {} must be even for rotary embedding", self.head_dim()),
            ));
        }

        if !(self.rms_norm_eps > 0.0) {
            return Err(DiTError::config("rms_norm_eps", "rms_norm_eps must be > 0"));
        }

        for (field, p) in [
            ("dropout_prob", self.dropout_prob),
            ("attention_dropout", self.attention_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(DiTError::config(field, format!("{} must be in [0, 1), got {}", field, p)));
            }
        }

        Ok(())
    }

    /// Human-readable description of the task's tensors
    pub fn task_info(&self) -> TaskInfo {
        let eva = self.eva_embedding_size;
        let clip = self.clip_embedding_size;
        match self.task_mode {
            TaskMode::EvaDenoising => TaskInfo {
                task: "EVA-CLIP Denoising".to_string(),
                input: format!("Noisy EVA [B, N, {}]", eva),
                conditioning: format!("Clean EVA [B, N, {}]", eva),
                output: format!("Clean EVA [B, N, {}]", eva),
            },
            TaskMode::ClipDenoising => TaskInfo {
                task: "CLIP-ViT Denoising with EVA Conditioning".to_string(),
                input: format!("Noisy CLIP [B, N, {}]", clip),
                conditioning: format!("Clean EVA [B, N, {}]", eva),
                output: format!("Clean CLIP [B, N, {}]", clip),
            },
        }
    }
}

/// Task description used in logs and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub task: String,
    pub input: String,
    pub conditioning: String,
    pub output: String,
}

impl fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Task: {}", self.task)?;
        writeln!(f, "  Input: {}", self.input)?;
        writeln!(f, "  Conditioning: {}", self.conditioning)?;
        write!(f, "  Output: {}", self.output)
    }
}
