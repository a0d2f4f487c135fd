//! Rotary position embedding (RoPE)
//!
//! Dimension pairs `(i, i + d/2)` of every head are rotated by an angle
//! proportional to the token position.

use candle_core::{DType, Device, Tensor, D};

use crate::core::error::Result;

/// Rotary embedding cache
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    /// Inverse frequencies, shape (1, dim/2), f32
    inv_freq: Tensor,
    dim: usize,
}

impl RotaryEmbedding {
    /// `inv_freq[i] = 1 / base^(2i / dim)`
    pub fn new(dim: usize, base: f64, device: &Device) -> Result<Self> {
        let inv_freq: Vec<f32> = (0..dim)
            .step_by(2)
            .map(|i| (1.0 / base.powf(i as f64 / dim as f64)) as f32)
            .collect();
        let half = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq, (1, half), device)?;
        Ok(Self { inv_freq, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// cos/sin tables for positions `0..seq_len`, each (1, seq_len, dim) in f32
    ///
    /// Any length is accepted; the positional table bounds sequence length
    /// elsewhere.
    pub fn forward(&self, seq_len: usize) -> Result<(Tensor, Tensor)> {
        let device = self.inv_freq.device();
        let positions = Tensor::arange(0u32, seq_len as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((seq_len, 1))?;
        let freqs = positions.matmul(&self.inv_freq)?;
        let emb = Tensor::cat(&[&freqs, &freqs], D::Minus1)?;
        Ok((emb.cos()?.unsqueeze(0)?, emb.sin()?.unsqueeze(0)?))
    }
}

/// `[x1, x2] -> [-x2, x1]` over the last axis
pub fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let last = x.dim(D::Minus1)?;
    let half = last / 2;
    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, last - half)?;
    Tensor::cat(&[&x2.neg()?, &x1], D::Minus1).map_err(Into::into)
}

/// Rotate `x` of shape (batch, heads, seq, head_dim)
///
/// Tables may be longer than `seq`; the leading rows are used. The rotation
/// runs in f32 and the result is cast back to the input dtype.
pub fn apply_rotary_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    let seq_len = x.dim(2)?;
    let in_dtype = x.dtype();
    let cos = cos.narrow(1, 0, seq_len)?.unsqueeze(1)?;
    let sin = sin.narrow(1, 0, seq_len)?.unsqueeze(1)?;

    let x_f32 = x.to_dtype(DType::F32)?;
    let rotated = rotate_half(&x_f32)?;
    let out = (x_f32.broadcast_mul(&cos)? + rotated.broadcast_mul(&sin)?)?;
    out.to_dtype(in_dtype).map_err(Into::into)
}
