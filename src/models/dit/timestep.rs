//! Timestep embedding: sinusoidal features followed by a three-layer MLP

use candle_core::{DType, Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};

use super::layers::{default_linear, silu, xavier_linear};
use crate::core::error::Result;

/// Period of the slowest sinusoid
pub const MAX_PERIOD: f64 = 10000.0;

/// Sinusoidal features of shape (batch, dim) in f32
///
/// `freqs[i] = exp(-ln(max_period) * i / half)` for `i < dim/2`; the
/// embedding is `[cos(t * freqs), sin(t * freqs)]`, with one trailing zero
/// column when `dim` is odd.
pub fn timestep_embedding(t: &Tensor, dim: usize, max_period: f64) -> Result<Tensor> {
    let device = t.device();
    let half = dim / 2;
    let freqs: Vec<f32> = (0..half)
        .map(|i| (-max_period.ln() * i as f64 / half as f64).exp() as f32)
        .collect();
    let freqs = Tensor::from_vec(freqs, (1, half), device)?;

    let args = t.to_dtype(DType::F32)?.unsqueeze(1)?.broadcast_mul(&freqs)?;
    let embedding = Tensor::cat(&[args.cos()?, args.sin()?], D::Minus1)?;

    if dim % 2 == 1 {
        let pad = Tensor::zeros((embedding.dim(0)?, 1), DType::F32, device)?;
        return Tensor::cat(&[&embedding, &pad], D::Minus1).map_err(Into::into);
    }
    Ok(embedding)
}

/// Timestep embedder
///
/// Linear(F, h) -> SiLU -> Linear(h, h) -> SiLU -> Linear(h, h)
#[derive(Debug)]
pub struct TimestepEmbedder {
    linear_1: Linear,
    linear_2: Linear,
    linear_3: Linear,
    frequency_embedding_size: usize,
    dtype: DType,
}

impl TimestepEmbedder {
    pub fn new(hidden_size: usize, frequency_embedding_size: usize, vb: VarBuilder) -> Result<Self> {
        let dtype = vb.dtype();
        let vb = vb.pp("mlp");
        let linear_1 = default_linear(frequency_embedding_size, hidden_size, vb.pp("0"))?;
        let linear_2 = xavier_linear(hidden_size, hidden_size, 0.5, true, vb.pp("2"))?;
        let linear_3 = xavier_linear(hidden_size, hidden_size, 0.5, true, vb.pp("4"))?;
        Ok(Self {
            linear_1,
            linear_2,
            linear_3,
            frequency_embedding_size,
            dtype,
        })
    }

    /// (batch,) timesteps to (batch, hidden) in the model dtype
    pub fn forward(&self, t: &Tensor) -> Result<Tensor> {
        let features = timestep_embedding(t, self.frequency_embedding_size, MAX_PERIOD)?.to_dtype(self.dtype)?;
        let x = silu(&self.linear_1.forward(&features)?)?;
        let x = silu(&self.linear_2.forward(&x)?)?;
        self.linear_3.forward(&x).map_err(Into::into)
    }
}
