//! Weight persistence (safetensors through the model's `VarMap`) and
//! parameter counting

use std::path::Path;

use candle_nn::VarMap;

use super::model::UniversalDiT;
use crate::config::UniversalDiTConfig;
use crate::core::error::{DiTError, Result};

/// Number of learned scalars implied by a config
pub fn parameter_count(config: &UniversalDiTConfig) -> usize {
    let h = config.hidden_size;
    let head_dim = config.head_dim();
    let q_width = config.num_attention_heads * head_dim;
    let kv_width = config.num_key_value_heads * head_dim;
    let input = config.input_embedding_size();
    let output = config.output_embedding_size();
    let conditioning = config.conditioning_embedding_size();

    // RMSNorm + modulation Linear(h, 2h) with bias
    let adaln = h + 2 * h * h + 2 * h;
    let attention = h * q_width + 2 * h * kv_width + q_width * h;
    let block = 3 * h
        + 3 * adaln
        + 2 * attention
        + 3 * h * config.intermediate_size
        + conditioning * h
        + h;

    let input_proj = input * h + h;
    let timestep = config.frequency_embedding_size * h + h + 2 * (h * h + h);
    let pos_embed = config.max_position_embeddings * h;
    let head = h + adaln + h * output + output;

    input_proj + timestep + pos_embed + config.num_hidden_layers * block + head
}

/// Number of scalars held by a var map
pub fn count_parameters(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|var| var.elem_count()).sum()
}

impl UniversalDiT {
    /// Total learned scalars
    pub fn num_parameters(&self) -> usize {
        match self.varmap() {
            Some(varmap) => count_parameters(varmap),
            None => parameter_count(self.config()),
        }
    }

    /// Write every weight to a safetensors file
    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let varmap = self.varmap().ok_or_else(not_owned)?;
        varmap.save(path)?;
        tracing::info!(path = %path.display(), parameters = count_parameters(varmap), "Saved weights");
        Ok(())
    }

    /// Overwrite every weight in place from a safetensors file
    ///
    /// Every tensor the model holds must be present with a matching shape
    /// and dtype.
    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let varmap = self.varmap_mut().ok_or_else(not_owned)?;
        varmap.load(path)?;
        tracing::info!(path = %path.display(), "Loaded weights");
        Ok(())
    }
}

fn not_owned() -> DiTError {
    DiTError::Validation {
        message: "model was built from an external VarBuilder and does not own its weights".to_string(),
    }
}
