//! Transformer block: self-attention, cross-attention and gated MLP, each
//! behind an RMSNorm + AdaLN pre-norm and a residual connection

use candle_core::{Module, Tensor};
use candle_nn::{Linear, VarBuilder};

use super::adaln::AdaLayerNorm;
use super::attention::Attention;
use super::feed_forward::FeedForward;
use super::layers::{xavier_linear, RmsNorm};
use super::model::ForwardOptions;
use crate::config::UniversalDiTConfig;
use crate::core::error::Result;

/// One DiT block
#[derive(Debug)]
pub struct DiTBlock {
    norm1: RmsNorm,
    norm2: RmsNorm,
    norm3: RmsNorm,
    ada_ln1: AdaLayerNorm,
    ada_ln2: AdaLayerNorm,
    ada_ln3: AdaLayerNorm,
    self_attn: Attention,
    cross_attn: Attention,
    mlp: FeedForward,
    /// Conditioning width -> hidden width, owned by this block
    conditioning_proj: Linear,
}

impl DiTBlock {
    pub fn new(config: &UniversalDiTConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let eps = config.rms_norm_eps;

        Ok(Self {
            norm1: RmsNorm::load(vb.pp("norm1"), hidden, eps)?,
            norm2: RmsNorm::load(vb.pp("norm2"), hidden, eps)?,
            norm3: RmsNorm::load(vb.pp("norm3"), hidden, eps)?,
            ada_ln1: AdaLayerNorm::new(hidden, hidden, vb.pp("ada_ln1"))?,
            ada_ln2: AdaLayerNorm::new(hidden, hidden, vb.pp("ada_ln2"))?,
            ada_ln3: AdaLayerNorm::new(hidden, hidden, vb.pp("ada_ln3"))?,
            self_attn: Attention::new(config, vb.pp("self_attn"))?,
            cross_attn: Attention::new(config, vb.pp("cross_attn"))?,
            mlp: FeedForward::new(hidden, config.intermediate_size, config.dropout_prob, vb.pp("mlp"))?,
            conditioning_proj: xavier_linear(
                config.conditioning_embedding_size(),
                hidden,
                0.5,
                true,
                vb.pp("conditioning_proj"),
            )?,
        })
    }

    /// * `hidden_states` - (b, L, h)
    /// * `conditioning_states` - raw conditioning (b, L_c, conditioning width)
    /// * `timestep_emb` - (b, h)
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        conditioning_states: &Tensor,
        timestep_emb: &Tensor,
        options: &ForwardOptions,
    ) -> Result<Tensor> {
        let train = options.train;

        let x = self.ada_ln1.forward(&self.norm1.forward(hidden_states)?, timestep_emb)?;
        let x = self
            .self_attn
            .forward(&x, None, options.self_attention_mask.as_ref(), train)?;
        let hidden_states = (hidden_states + x)?;

        let context = self.conditioning_proj.forward(conditioning_states)?;
        let x = self.ada_ln2.forward(&self.norm2.forward(&hidden_states)?, timestep_emb)?;
        let x = self
            .cross_attn
            .forward(&x, Some(&context), options.cross_attention_mask.as_ref(), train)?;
        let hidden_states = (hidden_states + x)?;

        let x = self.ada_ln3.forward(&self.norm3.forward(&hidden_states)?, timestep_emb)?;
        let x = self.mlp.forward(&x, train)?;
        (hidden_states + x).map_err(Into::into)
    }
}
