//! Adaptive layer normalization conditioned on the timestep embedding

use candle_core::{Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};

use super::layers::{silu, zero_linear, RmsNorm};
use crate::core::error::{DiTError, Result};

/// Epsilon of the normalization inside every AdaLN
pub const ADALN_NORM_EPS: f64 = 1e-6;

/// AdaLN: `norm(x) * (1 + scale) + shift` with `[shift, scale] = Linear(SiLU(c))`
///
/// The modulation starts at zero, so a fresh AdaLN is a plain RMSNorm.
#[derive(Debug)]
pub struct AdaLayerNorm {
    norm: RmsNorm,
    modulation: Linear,
}

impl AdaLayerNorm {
    pub fn new(hidden_size: usize, conditioning_size: usize, vb: VarBuilder) -> Result<Self> {
        let norm = RmsNorm::load(vb.pp("norm"), hidden_size, ADALN_NORM_EPS)?;
        let modulation = zero_linear(conditioning_size, 2 * hidden_size, vb.pp("adaLN_modulation.1"))?;
        Ok(Self { norm, modulation })
    }

    /// `x` is (b, L, h); `conditioning` is (b, h) or (b, 1, h) and is
    /// broadcast over tokens
    pub fn forward(&self, x: &Tensor, conditioning: &Tensor) -> Result<Tensor> {
        let conditioning = if conditioning.rank() == 2 {
            conditioning.unsqueeze(1)?
        } else {
            conditioning.clone()
        };

        let params = self.modulation.forward(&silu(&conditioning)?)?;
        let chunks = params.chunk(2, D::Minus1)?;
        let shift = chunks
            .first()
            .ok_or_else(|| DiTError::Validation {
                message: "AdaLN modulation produced no shift".to_string(),
            })?;
        let scale = chunks
            .get(1)
            .ok_or_else(|| DiTError::Validation {
                message: "AdaLN modulation produced no scale".to_string(),
            })?;

        let normalized = self.norm.forward(x)?;
        normalized
            .broadcast_mul(&(scale + 1.0)?)?
            .broadcast_add(shift)
            .map_err(Into::into)
    }
}
