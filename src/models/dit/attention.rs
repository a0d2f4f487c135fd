//! Multi-head attention with grouped key/value heads and rotary embedding
//!
//! One module serves both self-attention (keys from the hidden states) and
//! cross-attention (keys from the conditioning stream).

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder};

use super::layers::xavier_linear;
use super::rotary::{apply_rotary_emb, RotaryEmbedding};
use crate::config::UniversalDiTConfig;
use crate::core::error::{DiTError, Result};

/// Extra factor folded into the softmax temperature
pub const ATTENTION_SCALE_FACTOR: f64 = 0.8;

/// Repeat each key/value head `n_rep` times along the head axis
///
/// (b, kv_heads, s, d) -> (b, kv_heads * n_rep, s, d). Query head `j` reads
/// key/value head `j / n_rep`.
pub fn repeat_kv(x: Tensor, n_rep: usize) -> Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (b, num_kv_heads, seq_len, head_dim) = x.dims4()?;
    Tensor::cat(&vec![&x; n_rep], 2)?
        .reshape((b, num_kv_heads * n_rep, seq_len, head_dim))
        .map_err(Into::into)
}

/// Grouped-query attention
#[derive(Debug)]
pub struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    rotary_emb: RotaryEmbedding,
    dropout: Dropout,
    num_heads: usize,
    num_kv_heads: usize,
    num_kv_groups: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    pub fn new(config: &UniversalDiTConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let num_heads = config.num_attention_heads;
        let num_kv_heads = config.num_key_value_heads;

        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(DiTError::config(
                "num_attention_heads",
                format!("hidden_size {} is not divisible by num_attention_heads {}", hidden_size, num_heads),
            ));
        }
        if num_kv_heads == 0 || num_heads % num_kv_heads != 0 {
            return Err(DiTError::config(
                "num_key_value_heads",
                format!("num_attention_heads {} is not divisible by num_key_value_heads {}", num_heads, num_kv_heads),
            ));
        }
        let head_dim = hidden_size / num_heads;

        let q_proj = xavier_linear(hidden_size, num_heads * head_dim, 0.8, false, vb.pp("q_proj"))?;
        let k_proj = xavier_linear(hidden_size, num_kv_heads * head_dim, 0.8, false, vb.pp("k_proj"))?;
        let v_proj = xavier_linear(hidden_size, num_kv_heads * head_dim, 0.8, false, vb.pp("v_proj"))?;
        let o_proj = xavier_linear(num_heads * head_dim, hidden_size, 0.5, false, vb.pp("o_proj"))?;

        let rotary_emb = RotaryEmbedding::new(head_dim, config.rope_theta, vb.device())?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            rotary_emb,
            dropout: Dropout::new(config.attention_dropout),
            num_heads,
            num_kv_heads,
            num_kv_groups: num_heads / num_kv_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5) * ATTENTION_SCALE_FACTOR,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_kv_heads(&self) -> usize {
        self.num_kv_heads
    }

    pub fn device(&self) -> &Device {
        self.q_proj.weight().device()
    }

    /// Attend from `hidden_states` (b, q_len, h) to `key_value_states`
    /// (b, kv_len, h), or to itself when `None`
    ///
    /// `attention_mask` is added to the raw scores and must broadcast to
    /// (b, heads, q_len, kv_len). Dropout on the weights only fires with
    /// `train`.
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        key_value_states: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (batch, q_len, _) = hidden_states.dims3()?;
        let source = key_value_states.unwrap_or(hidden_states);
        let kv_len = source.dim(1)?;

        let q = self
            .q_proj
            .forward(hidden_states)?
            .reshape((batch, q_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(source)?
            .reshape((batch, kv_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(source)?
            .reshape((batch, kv_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (cos, sin) = self.rotary_emb.forward(q_len.max(kv_len))?;
        let q = apply_rotary_emb(&q, &cos, &sin)?;
        let k = apply_rotary_emb(&k, &cos, &sin)?;

        let k = repeat_kv(k, self.num_kv_groups)?.contiguous()?;
        let v = repeat_kv(v, self.num_kv_groups)?.contiguous()?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? * self.scale)?;
        let scores = match attention_mask {
            Some(mask) => scores.broadcast_add(&mask.to_dtype(scores.dtype())?)?,
            None => scores,
        };

        let weights = candle_nn::ops::softmax_last_dim(&scores.to_dtype(DType::F32)?)?.to_dtype(q.dtype())?;
        let weights = self.dropout.forward(&weights, train)?;

        let out = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, q_len, self.num_heads * self.head_dim))?;
        self.o_proj.forward(&out).map_err(Into::into)
    }
}
