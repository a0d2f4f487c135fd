//! Spherical flow sampler
//!
//! Euler integration on the unit hypersphere, from t = 1 (noise) down toward
//! t = 0. After every step the state is projected back onto the sphere.

use candle_core::Tensor;

use super::layers::l2_normalize;
use super::model::UniversalDiT;
use crate::config::PredictionType;
use crate::core::error::{DiTError, Result};

/// Default number of inference steps
pub const DEFAULT_NUM_STEPS: usize = 50;

/// Sampler configuration
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Number of Euler steps
    pub num_steps: usize,
    /// Keep the state after every step
    pub return_intermediate: bool,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_steps: DEFAULT_NUM_STEPS,
            return_intermediate: false,
        }
    }
}

/// Progress reported after each step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Zero-based step index
    pub step: usize,
    pub num_steps: usize,
    /// Timestep the prediction was made at
    pub t: f64,
}

/// Sampling result
#[derive(Debug, Clone)]
pub struct SampleOutput {
    /// Final unit-norm embeddings
    pub embeddings: Tensor,
    /// State after every step, oldest first; empty unless requested
    pub intermediates: Vec<Tensor>,
}

/// Euler sampler on the unit sphere
#[derive(Debug, Clone, Default)]
pub struct SphericalFlowSampler {
    config: SamplerConfig,
}

impl SphericalFlowSampler {
    pub fn new(num_steps: usize) -> Self {
        Self::with_config(SamplerConfig {
            num_steps,
            ..Default::default()
        })
    }

    pub fn with_config(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// `t_i = 1 - i / N` for `i in 0..N`
    pub fn timesteps(&self) -> Vec<f64> {
        let n = self.config.num_steps;
        let dt = 1.0 / n as f64;
        (0..n).map(|i| 1.0 - i as f64 * dt).collect()
    }

    /// One integration step
    ///
    /// `target`: the prediction is the next state. Anything else is a
    /// velocity: `x + dt * v`. Either way the result is re-normalized.
    pub fn step(prediction_type: &PredictionType, x: &Tensor, prediction: &Tensor, dt: f64) -> Result<Tensor> {
        let prediction = prediction.to_dtype(x.dtype())?;
        let next = match prediction_type {
            PredictionType::Target => prediction,
            PredictionType::Velocity | PredictionType::Custom(_) => (x + (prediction * dt)?)?,
        };
        l2_normalize(&next)
    }

    pub fn sample(&self, model: &UniversalDiT, noisy: &Tensor, conditioning: &Tensor) -> Result<SampleOutput> {
        self.sample_with_callback(model, noisy, conditioning, |_, _| {})
    }

    /// Sample, calling `on_step` with the new state after every step
    pub fn sample_with_callback<F>(
        &self,
        model: &UniversalDiT,
        noisy: &Tensor,
        conditioning: &Tensor,
        mut on_step: F,
    ) -> Result<SampleOutput>
    where
        F: FnMut(StepInfo, &Tensor),
    {
        let num_steps = self.config.num_steps;
        if num_steps == 0 {
            return Err(DiTError::Validation {
                message: "num_inference_steps must be > 0".to_string(),
            });
        }

        let dt = 1.0 / num_steps as f64;
        let batch_size = noisy.dim(0)?;
        let prediction_type = &model.config().prediction_type;

        let conditioning = l2_normalize(conditioning)?;
        let mut x = l2_normalize(noisy)?.detach();
        let mut intermediates = Vec::with_capacity(if self.config.return_intermediate { num_steps } else { 0 });

        tracing::debug!(
            num_steps,
            batch_size,
            prediction_type = %prediction_type,
            "Starting spherical flow sampling"
        );

        for (step, t) in self.timesteps().into_iter().enumerate() {
            let t_tensor = Tensor::from_slice(&vec![t as f32; batch_size], (batch_size,), model.device())?;
            let prediction = model.forward(&x, &t_tensor, &conditioning)?.prediction;
            x = Self::step(prediction_type, &x, &prediction, dt)?.detach();

            if self.config.return_intermediate {
                intermediates.push(x.clone());
            }
            on_step(StepInfo { step, num_steps, t }, &x);
        }

        Ok(SampleOutput {
            embeddings: x,
            intermediates,
        })
    }
}
