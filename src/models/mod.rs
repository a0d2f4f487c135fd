//! Neural network models
//!
//! - `dit`: universal diffusion transformer and its spherical flow sampler

pub mod dit;

pub use dit::{DiTOutput, ForwardOptions, SphericalFlowSampler, UniversalDiT};
