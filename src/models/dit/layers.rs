//! Shared numeric building blocks: RMSNorm, L2 normalization, SiLU and the
//! linear-layer initializers used across the DiT.

use candle_core::{DType, Tensor, D};
use candle_nn::init::Init;
use candle_nn::{Linear, VarBuilder};

use crate::core::error::Result;

/// Floor for the L2 norm so zero rows map to zero instead of NaN
pub const L2_NORM_EPS: f64 = 1e-12;

/// RMSNorm
///
/// output = x * rsqrt(mean(x * x, dim=-1, keepdim=True) + eps) * weight
///
/// The reduction always runs in f32; the normalized value is cast back to the
/// input dtype before the scale is applied.
#[derive(Debug, Clone)]
pub struct RmsNorm {
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    pub fn new(weight: Tensor, eps: f64) -> Self {
        Self { weight, eps }
    }

    /// Scale initialized to ones
    pub fn load(vb: VarBuilder, dim: usize, eps: f64) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
        Ok(Self::new(weight, eps))
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let in_dtype = x.dtype();
        let x_f32 = x.to_dtype(DType::F32)?;
        let denom = (x_f32.sqr()?.mean_keepdim(D::Minus1)? + self.eps)?.sqrt()?;
        let normalized = x_f32.broadcast_div(&denom)?.to_dtype(in_dtype)?;
        normalized.broadcast_mul(&self.weight).map_err(Into::into)
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

/// Project every last-axis vector onto the unit sphere
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let in_dtype = x.dtype();
    let x = x.to_dtype(DType::F32)?;
    let norm = x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.maximum(L2_NORM_EPS)?;
    x.broadcast_div(&norm)?.to_dtype(in_dtype).map_err(Into::into)
}

/// L2 norm of every last-axis vector, computed in f32
pub fn row_norms(x: &Tensor) -> Result<Tensor> {
    x.to_dtype(DType::F32)?
        .sqr()?
        .sum(D::Minus1)?
        .sqrt()
        .map_err(Into::into)
}

/// SiLU (Swish) activation
pub fn silu(x: &Tensor) -> Result<Tensor> {
    let sigmoid = candle_nn::ops::sigmoid(x)?;
    x.mul(&sigmoid).map_err(Into::into)
}

/// Xavier/Glorot uniform: U(-a, a) with a = gain * sqrt(6 / (fan_in + fan_out))
pub fn xavier_uniform(fan_in: usize, fan_out: usize, gain: f64) -> Init {
    let bound = gain * (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Linear layer with Xavier-uniform weight and zero bias
pub fn xavier_linear(
    in_dim: usize,
    out_dim: usize,
    gain: f64,
    bias: bool,
    vb: VarBuilder,
) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        xavier_uniform(in_dim, out_dim, gain),
    )?;
    let bias = if bias {
        Some(vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?)
    } else {
        None
    };
    Ok(Linear::new(weight, bias))
}

/// Linear layer with the stock initialization: weight and bias ~ U(±1/sqrt(fan_in))
pub fn default_linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let bound = 1.0 / (in_dim as f64).sqrt();
    let init = Init::Uniform {
        lo: -bound,
        up: bound,
    };
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let bias = vb.get_with_hints(out_dim, "bias", init)?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Linear layer whose weight and bias start at zero
pub fn zero_linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", Init::Const(0.0))?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}
