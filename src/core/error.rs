//! Structured error handling for the universal DiT
//!
//! All failures inside the model are caller errors surfaced synchronously:
//! invalid configuration at construction, shape mismatches at call time,
//! and tensor backend failures. Nothing is retried.

use std::fmt;
use thiserror::Error;

/// Result type alias with DiTError
pub type Result<T> = std::result::Result<T, DiTError>;

/// Main error type for the universal DiT
#[derive(Error, Debug)]
pub enum DiTError {
    /// Configuration errors (raised at construction)
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        field: Option<String>,
    },

    /// Input tensor does not match the configured dimensionality
    #[error("Shape mismatch for {tensor}: expected {expected}, got {actual}")]
    ShapeMismatch {
        tensor: TensorRole,
        expected: String,
        actual: String,
    },

    /// Sequence longer than the learned positional table
    #[error("Sequence length {seq_len} exceeds max_position_embeddings {max_positions}")]
    SequenceTooLong {
        seq_len: usize,
        max_positions: usize,
    },

    /// Invalid call arguments that are not shape related
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Tensor backend errors
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiTError {
    /// Configuration error tied to a config field
    pub fn config(field: &str, message: impl Into<String>) -> Self {
        DiTError::Config {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Shape mismatch helper
    pub fn shape(tensor: TensorRole, expected: impl fmt::Debug, actual: impl fmt::Debug) -> Self {
        DiTError::ShapeMismatch {
            tensor,
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    /// Whether the error was raised while validating configuration
    pub fn is_config(&self) -> bool {
        matches!(self, DiTError::Config { .. })
    }
}

/// Which model input a shape error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorRole {
    HiddenStates,
    EncoderHiddenStates,
    Timestep,
    AttentionMask,
}

impl fmt::Display for TensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorRole::HiddenStates => write!(f, "hidden states"),
            TensorRole::EncoderHiddenStates => write!(f, "encoder hidden states"),
            TensorRole::Timestep => write!(f, "timestep"),
            TensorRole::AttentionMask => write!(f, "attention mask"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiTError::config("task_mode", "Unknown task_mode: audio_denoising");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("audio_denoising"));
        assert!(err.is_config());
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = DiTError::shape(TensorRole::EncoderHiddenStates, 4096usize, 1024usize);
        let msg = err.to_string();
        assert!(msg.contains("encoder hidden states"));
        assert!(msg.contains("4096"));
        assert!(msg.contains("1024"));
        assert!(!err.is_config());
    }

    #[test]
    fn test_sequence_too_long_display() {
        let err = DiTError::SequenceTooLong {
            seq_len: 300,
            max_positions: 256,
        };
        assert_eq!(
            err.to_string(),
            "Sequence length 300 exceeds max_position_embeddings 256"
        );
    }

    #[test]
    fn test_from_candle_error() {
        let err: DiTError = candle_core::Error::Msg("boom".to_string()).into();
        assert!(matches!(err, DiTError::Tensor(_)));
    }
}
