//! Gated MLP: dropout(down(SiLU(gate(x)) * up(x)))

use candle_core::{Module, Tensor};
use candle_nn::{Dropout, Linear, VarBuilder};

use super::layers::{silu, xavier_linear};
use crate::core::error::Result;

#[derive(Debug)]
pub struct FeedForward {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    dropout: Dropout,
}

impl FeedForward {
    pub fn new(hidden_size: usize, intermediate_size: usize, dropout_prob: f32, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate_proj: xavier_linear(hidden_size, intermediate_size, 0.8, false, vb.pp("gate_proj"))?,
            up_proj: xavier_linear(hidden_size, intermediate_size, 0.8, false, vb.pp("up_proj"))?,
            down_proj: xavier_linear(intermediate_size, hidden_size, 0.5, false, vb.pp("down_proj"))?,
            dropout: Dropout::new(dropout_prob),
        })
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let gate = silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        let out = self.down_proj.forward(&(gate * up)?)?;
        self.dropout.forward(&out, train).map_err(Into::into)
    }
}
