//! Universal DiT
//!
//! Maps noisy embeddings plus a clean EVA conditioning stream and a timestep
//! to a velocity (or clean target) on the unit hypersphere.
//!
//! Architecture:
//! - L2 normalization of both input streams
//! - Input projection + learned positional table
//! - Timestep MLP shared by every AdaLN
//! - N blocks of self-attention, cross-attention and gated MLP
//! - Output RMSNorm + AdaLN + projection

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::init::Init;
use candle_nn::{Linear, VarBuilder, VarMap};
use rand::Rng;

use super::adaln::AdaLayerNorm;
use super::block::DiTBlock;
use super::layers::{l2_normalize, xavier_linear, RmsNorm};
use super::sampler::{SamplerConfig, SphericalFlowSampler};
use super::timestep::TimestepEmbedder;
use super::weights::parameter_count;
use crate::config::{PredictionType, TaskInfo, TaskMode, UniversalDiTConfig};
use crate::core::error::{DiTError, Result, TensorRole};

/// Per-call knobs for [`UniversalDiT::forward_with`]
#[derive(Debug, Clone, Default)]
pub struct ForwardOptions {
    /// Enables dropout
    pub train: bool,
    /// Additive mask for self-attention scores, broadcast to (b, heads, L, L)
    pub self_attention_mask: Option<Tensor>,
    /// Additive mask for cross-attention scores, broadcast to (b, heads, L, L_c)
    pub cross_attention_mask: Option<Tensor>,
}

impl ForwardOptions {
    pub fn training() -> Self {
        Self {
            train: true,
            ..Default::default()
        }
    }
}

/// Result of a forward pass
#[derive(Debug, Clone)]
pub struct DiTOutput {
    /// (b, L, output width); unit-norm rows for `target`
    pub prediction: Tensor,
    /// Final hidden states before the output projection, (b, L, hidden)
    pub hidden_states: Tensor,
    pub prediction_type: PredictionType,
    pub task_mode: TaskMode,
}

/// The model
pub struct UniversalDiT {
    config: UniversalDiTConfig,
    input_proj: Linear,
    timestep_embedder: TimestepEmbedder,
    /// (1, max_positions, hidden)
    pos_embed: Tensor,
    blocks: Vec<DiTBlock>,
    output_norm: RmsNorm,
    output_adaln: AdaLayerNorm,
    output_proj: Linear,
    device: Device,
    dtype: DType,
    /// Present when the model owns its weights
    varmap: Option<VarMap>,
}

impl UniversalDiT {
    /// Build from a var builder; weights missing from the backend are
    /// initialized with the model's scheme
    pub fn new(config: UniversalDiTConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let hidden = config.hidden_size;
        let device = vb.device().clone();
        let dtype = vb.dtype();

        let input_proj = xavier_linear(config.input_embedding_size(), hidden, 0.8, true, vb.pp("input_proj"))?;
        let timestep_embedder =
            TimestepEmbedder::new(hidden, config.frequency_embedding_size, vb.pp("timestep_embedder"))?;
        let pos_embed = vb.get_with_hints(
            (1, config.max_position_embeddings, hidden),
            "pos_embed",
            Init::Randn {
                mean: 0.0,
                stdev: config.initializer_range,
            },
        )?;

        let vb_blocks = vb.pp("blocks");
        let blocks = (0..config.num_hidden_layers)
            .map(|i| DiTBlock::new(&config, vb_blocks.pp(i.to_string())))
            .collect::<Result<Vec<_>>>()?;

        let output_norm = RmsNorm::load(vb.pp("output_norm"), hidden, config.rms_norm_eps)?;
        let output_adaln = AdaLayerNorm::new(hidden, hidden, vb.pp("output_adaln"))?;
        let output_proj = xavier_linear(hidden, config.output_embedding_size(), 0.1, true, vb.pp("output_proj"))?;

        if let PredictionType::Custom(tag) = &config.prediction_type {
            tracing::warn!(
                prediction_type = %tag,
                "Unrecognized prediction type; denoising will integrate it as a velocity"
            );
        }

        if config.use_gradient_checkpointing {
            tracing::warn!("use_gradient_checkpointing is set but has no effect outside training");
        }

        let info = config.task_info();
        tracing::info!(
            task = %info.task,
            prediction_type = %config.prediction_type,
            hidden_size = hidden,
            layers = config.num_hidden_layers,
            heads = config.num_attention_heads,
            kv_heads = config.num_key_value_heads,
            parameters = parameter_count(&config),
            "Universal DiT initialized"
        );

        Ok(Self {
            config,
            input_proj,
            timestep_embedder,
            pos_embed,
            blocks,
            output_norm,
            output_adaln,
            output_proj,
            device,
            dtype,
            varmap: None,
        })
    }

    /// Freshly initialized model that owns its weights
    pub fn from_config(config: UniversalDiTConfig, dtype: DType, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, dtype, device);
        let mut model = Self::new(config, vb)?;
        model.varmap = Some(varmap);
        Ok(model)
    }

    /// Model with weights read from a safetensors checkpoint
    pub fn load<P: AsRef<std::path::Path>>(
        config: UniversalDiTConfig,
        path: P,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let mut model = Self::from_config(config, dtype, device)?;
        model.load_weights(path)?;
        Ok(model)
    }

    pub fn config(&self) -> &UniversalDiTConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn task_info(&self) -> TaskInfo {
        self.config.task_info()
    }

    pub(crate) fn varmap(&self) -> Option<&VarMap> {
        self.varmap.as_ref()
    }

    pub(crate) fn varmap_mut(&mut self) -> Option<&mut VarMap> {
        self.varmap.as_mut()
    }

    /// Predict for one timestep
    ///
    /// * `hidden_states` - noisy embeddings (b, L, input width)
    /// * `timestep` - (b,) values in [0, 1]
    /// * `encoder_hidden_states` - clean EVA conditioning (b, L_c, EVA width)
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        timestep: &Tensor,
        encoder_hidden_states: &Tensor,
    ) -> Result<DiTOutput> {
        self.forward_with(hidden_states, timestep, encoder_hidden_states, &ForwardOptions::default())
    }

    pub fn forward_with(
        &self,
        hidden_states: &Tensor,
        timestep: &Tensor,
        encoder_hidden_states: &Tensor,
        options: &ForwardOptions,
    ) -> Result<DiTOutput> {
        let seq_len = self.check_inputs(hidden_states, timestep, encoder_hidden_states)?;

        let hidden_states = l2_normalize(hidden_states)?.to_dtype(self.dtype)?;
        let conditioning = l2_normalize(encoder_hidden_states)?.to_dtype(self.dtype)?;

        let x = self.input_proj.forward(&hidden_states)?;
        let mut x = x.broadcast_add(&self.pos_embed.narrow(1, 0, seq_len)?)?;

        let timestep_emb = self.timestep_embedder.forward(timestep)?;

        for block in &self.blocks {
            x = block.forward(&x, &conditioning, &timestep_emb, options)?;
        }

        let x = self.output_norm.forward(&x)?;
        let x = self.output_adaln.forward(&x, &timestep_emb)?;
        let prediction = self.output_proj.forward(&x)?;
        let prediction = if self.config.prediction_type.normalizes_output() {
            l2_normalize(&prediction)?
        } else {
            prediction
        };

        Ok(DiTOutput {
            prediction,
            hidden_states: x,
            prediction_type: self.config.prediction_type.clone(),
            task_mode: self.config.task_mode,
        })
    }

    /// Integrate from `noisy` at t = 1 toward clean embeddings in
    /// `num_inference_steps` steps
    pub fn denoise(
        &self,
        noisy: &Tensor,
        conditioning: &Tensor,
        num_inference_steps: usize,
    ) -> Result<Tensor> {
        let sampler = SphericalFlowSampler::new(num_inference_steps);
        Ok(sampler.sample(self, noisy, conditioning)?.embeddings)
    }

    /// [`denoise`](Self::denoise) with a caller-supplied random source
    ///
    /// The Euler integrator is deterministic, so `rng` is accepted for
    /// stochastic samplers and left untouched.
    pub fn denoise_with_rng<R: Rng + ?Sized>(
        &self,
        noisy: &Tensor,
        conditioning: &Tensor,
        num_inference_steps: usize,
        _rng: &mut R,
    ) -> Result<Tensor> {
        self.denoise(noisy, conditioning, num_inference_steps)
    }

    /// Like [`denoise`](Self::denoise), also returning the state after every
    /// step, oldest first
    pub fn denoise_with_intermediates(
        &self,
        noisy: &Tensor,
        conditioning: &Tensor,
        num_inference_steps: usize,
    ) -> Result<(Tensor, Vec<Tensor>)> {
        let sampler = SphericalFlowSampler::with_config(SamplerConfig {
            num_steps: num_inference_steps,
            return_intermediate: true,
        });
        let output = sampler.sample(self, noisy, conditioning)?;
        Ok((output.embeddings, output.intermediates))
    }

    /// Returns the sequence length
    fn check_inputs(&self, hidden_states: &Tensor, timestep: &Tensor, encoder_hidden_states: &Tensor) -> Result<usize> {
        let input_size = self.config.input_embedding_size();
        let conditioning_size = self.config.conditioning_embedding_size();

        let (batch, seq_len, dim) = match *hidden_states.dims() {
            [b, l, d] => (b, l, d),
            _ => return Err(mismatch(TensorRole::HiddenStates, format!("[B, N, {}]", input_size), hidden_states)),
        };
        if dim != input_size {
            return Err(mismatch(
                TensorRole::HiddenStates,
                format!("[{}, {}, {}]", batch, seq_len, input_size),
                hidden_states,
            ));
        }

        match *encoder_hidden_states.dims() {
            [b, _, d] if b == batch && d == conditioning_size => {}
            _ => {
                return Err(mismatch(
                    TensorRole::EncoderHiddenStates,
                    format!("[{}, N, {}]", batch, conditioning_size),
                    encoder_hidden_states,
                ))
            }
        }

        if timestep.dims() != [batch] {
            return Err(mismatch(TensorRole::Timestep, format!("[{}]", batch), timestep));
        }

        let max_positions = self.config.max_position_embeddings;
        if seq_len > max_positions {
            return Err(DiTError::SequenceTooLong { seq_len, max_positions });
        }

        Ok(seq_len)
    }
}

fn mismatch(tensor: TensorRole, expected: String, actual: &Tensor) -> DiTError {
    DiTError::ShapeMismatch {
        tensor,
        expected,
        actual: format!("{:?}", actual.dims()),
    }
}
