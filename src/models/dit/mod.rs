//! Universal Diffusion Transformer for spherical flow matching
//!
//! Denoises EVA-CLIP or CLIP-ViT patch embeddings conditioned on clean
//! EVA-CLIP embeddings:
//! - Layers: RMSNorm, L2 normalization, Xavier-initialized projections
//! - Rotary embedding and grouped-query attention
//! - Timestep embedder and AdaLN conditioning
//! - Transformer blocks and the full model
//! - Spherical Euler sampler
//! - Weight persistence

mod adaln;
mod attention;
mod block;
mod feed_forward;
pub mod layers;
mod model;
pub mod rotary;
mod sampler;
pub mod timestep;
mod weights;

pub use adaln::{AdaLayerNorm, ADALN_NORM_EPS};
pub use attention::{repeat_kv, Attention, ATTENTION_SCALE_FACTOR};
pub use block::DiTBlock;
pub use feed_forward::FeedForward;
pub use layers::{l2_normalize, row_norms, RmsNorm};
pub use model::{DiTOutput, ForwardOptions, UniversalDiT};
pub use rotary::RotaryEmbedding;
pub use sampler::{SampleOutput, SamplerConfig, SphericalFlowSampler, StepInfo, DEFAULT_NUM_STEPS};
pub use timestep::TimestepEmbedder;
pub use weights::{count_parameters, parameter_count};
