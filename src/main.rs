//! universal-dit CLI
//!
//! - `info`: configuration, task description and parameter count
//! - `init`: write a freshly initialized checkpoint and its config.json
//! - `denoise`: run the spherical flow sampler on seeded synthetic inputs

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use universal_dit::models::dit::{parameter_count, row_norms};
use universal_dit::{
    create_universal_config, ModelSize, PredictionType, SamplerConfig, SphericalFlowSampler,
    TaskMode, TrainingMode, UniversalDiT, UniversalDiTConfig, VERSION,
};

/// Universal DiT - spherical flow matching for vision embeddings
#[derive(Parser, Debug)]
#[command(name = "universal-dit")]
#[command(author, version, about, long_about = None)]
#[command(long_about = "
Diffusion transformer that denoises EVA-CLIP or CLIP-ViT patch embeddings on
the unit hypersphere, conditioned on clean EVA-CLIP embeddings.

Examples:
  # Describe the base EVA denoising model
  universal-dit info --size base --task eva_denoising

  # Write a randomly initialized tiny CLIP model
  universal-dit init --size tiny --task clip_denoising --output checkpoints/tiny-clip

  # Denoise synthetic inputs with 20 steps
  universal-dit denoise --config checkpoints/tiny-clip/config.json \\
      --weights checkpoints/tiny-clip/model.safetensors --steps 20
")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use CPU instead of GPU
    #[arg(long, global = true)]
    cpu: bool,

    /// Use FP16 weights and activations
    #[arg(long, global = true)]
    fp16: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How to obtain a model configuration
#[derive(Args, Debug, Clone)]
struct ModelArgs {
    /// Path to a config.json; overrides the preset flags
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preset size (tiny, small, base, large)
    #[arg(long, default_value = "base")]
    size: ModelSize,

    /// Task (eva_denoising, clip_denoising)
    #[arg(long, default_value = "eva_denoising")]
    task: TaskMode,

    /// Prediction type (velocity, target)
    #[arg(long, default_value = "velocity")]
    prediction: PredictionType,

    /// Token layout (patch_only, cls_patch)
    #[arg(long, default_value = "patch_only")]
    training_mode: TrainingMode,
}

impl ModelArgs {
    fn resolve(&self) -> Result<UniversalDiTConfig> {
        match &self.config {
            Some(path) => UniversalDiTConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config from {:?}", path)),
            None => Ok(create_universal_config(
                self.size,
                self.task,
                self.prediction.clone(),
                self.training_mode,
            )),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show model configuration and size
    Info {
        #[command(flatten)]
        model: ModelArgs,

        /// Print the full configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a freshly initialized checkpoint
    Init {
        #[command(flatten)]
        model: ModelArgs,

        /// Output directory (model.safetensors + config.json)
        #[arg(short, long, default_value = "checkpoints/universal-dit")]
        output: PathBuf,
    },

    /// Denoise seeded synthetic embeddings
    Denoise {
        #[command(flatten)]
        model: ModelArgs,

        /// Safetensors checkpoint; random weights when omitted
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Number of inference steps
        #[arg(long, default_value = "50")]
        steps: usize,

        /// Batch size
        #[arg(long, default_value = "1")]
        batch_size: usize,

        /// Tokens per sequence; defaults to the configured token count
        #[arg(long)]
        tokens: Option<usize>,

        /// RNG seed for the synthetic inputs
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Save the denoised embeddings to a safetensors file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    info!("universal-dit v{}", VERSION);

    match &cli.command {
        Commands::Info { model, json } => run_info(model, *json),
        Commands::Init { model, output } => run_init(&cli, model, output),
        Commands::Denoise {
            model,
            weights,
            steps,
            batch_size,
            tokens,
            seed,
            output,
        } => run_denoise(
            &cli,
            model,
            weights.as_deref(),
            *steps,
            *batch_size,
            *tokens,
            *seed,
            output.as_deref(),
        ),
    }
}

fn run_info(model: &ModelArgs, json: bool) -> Result<()> {
    let config = model.resolve()?;
    config.validate().context("Invalid configuration")?;

    println!("{}", config.task_info());
    println!();
    println!("Hidden size:        {}", config.hidden_size);
    println!("Layers:             {}", config.num_hidden_layers);
    println!(
        "Attention heads:    {} ({} key/value, {} per group)",
        config.num_attention_heads,
        config.num_key_value_heads,
        config.num_key_value_groups()
    );
    println!("Head dim:           {}", config.head_dim());
    println!("MLP width:          {}", config.intermediate_size);
    println!("Tokens:             {} ({})", config.num_tokens, config.training_mode);
    println!("Prediction type:    {}", config.prediction_type);
    println!("Parameters:         {}", format_count(parameter_count(&config)));

    if json {
        println!();
        println!("{}", serde_json::to_string_pretty(&config)?);
    }
    Ok(())
}

fn run_init(cli: &Cli, model: &ModelArgs, output: &Path) -> Result<()> {
    let config = model.resolve()?;
    let device = select_device(cli.cpu)?;

    let pb = create_spinner("Initializing weights...")?;
    let start = Instant::now();
    let dit = UniversalDiT::from_config(config.clone(), select_dtype(cli.fp16), &device)
        .context("Failed to build model")?;
    pb.finish_with_message(format!(
        "Initialized {} parameters in {:.1}s",
        format_count(dit.num_parameters()),
        start.elapsed().as_secs_f32()
    ));

    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory {:?}", output))?;
    let weights_path = output.join("model.safetensors");
    let config_path = output.join("config.json");

    dit.save_weights(&weights_path).context("Failed to save weights")?;
    config.to_json_file(&config_path).context("Failed to save config")?;

    info!("Saved weights to {:?}", weights_path);
    info!("Saved config to {:?}", config_path);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_denoise(
    cli: &Cli,
    model: &ModelArgs,
    weights: Option<&Path>,
    steps: usize,
    batch_size: usize,
    tokens: Option<usize>,
    seed: u64,
    output: Option<&Path>,
) -> Result<()> {
    let config = model.resolve()?;
    let device = select_device(cli.cpu)?;
    let dtype = select_dtype(cli.fp16);

    let pb = create_spinner("Loading model...")?;
    let start = Instant::now();
    let dit = match weights {
        Some(path) => UniversalDiT::load(config.clone(), path, dtype, &device)
            .with_context(|| format!("Failed to load weights from {:?}", path))?,
        None => {
            warn!("No weights given; denoising with randomly initialized parameters");
            UniversalDiT::from_config(config.clone(), dtype, &device)?
        }
    };
    pb.finish_with_message(format!("Model ready in {:.1}s", start.elapsed().as_secs_f32()));

    let tokens = tokens.unwrap_or(config.num_tokens);
    let mut rng = StdRng::seed_from_u64(seed);
    let noisy = random_embeddings(&mut rng, (batch_size, tokens, config.input_embedding_size()), &device)?;
    let conditioning =
        random_embeddings(&mut rng, (batch_size, tokens, config.conditioning_embedding_size()), &device)?;

    info!("{}", config.task_info().task);
    info!("Batch: {} x {} tokens, {} steps, seed {}", batch_size, tokens, steps, seed);

    let progress = ProgressBar::new(steps as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let sampler = SphericalFlowSampler::with_config(SamplerConfig {
        num_steps: steps,
        return_intermediate: false,
    });
    let start = Instant::now();
    let result = sampler
        .sample_with_callback(&dit, &noisy, &conditioning, |step, _| {
            progress.set_message(format!("t={:.3}", step.t));
            progress.inc(1);
        })
        .context("Denoising failed")?;
    progress.finish_with_message(format!("done in {:.2}s", start.elapsed().as_secs_f32()));

    let norms: Vec<f32> = row_norms(&result.embeddings)?.flatten_all()?.to_vec1()?;
    let (min, max, mean) = summarize(&norms);
    info!(
        "Output {:?}: row norm min {:.5}, max {:.5}, mean {:.5}",
        result.embeddings.dims(),
        min,
        max,
        mean
    );

    if let Some(path) = output {
        result
            .embeddings
            .save_safetensors("embeddings", path)
            .with_context(|| format!("Failed to save embeddings to {:?}", path))?;
        info!("Saved embeddings to {:?}", path);
    }
    Ok(())
}

fn random_embeddings(rng: &mut StdRng, shape: (usize, usize, usize), device: &Device) -> Result<Tensor> {
    let (b, l, d) = shape;
    let data: Vec<f32> = (0..b * l * d).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    Ok(Tensor::from_vec(data, shape, device)?)
}

fn summarize(values: &[f32]) -> (f32, f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    (min, max, mean)
}

fn format_count(n: usize) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1e6)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1e3)
    } else {
        n.to_string()
    }
}

fn select_device(cpu: bool) -> Result<Device> {
    if cpu {
        return Ok(Device::Cpu);
    }
    if candle_core::utils::cuda_is_available() {
        return Device::new_cuda(0).context("Failed to open CUDA device");
    }
    if candle_core::utils::metal_is_available() {
        return Device::new_metal(0).context("Failed to open Metal device");
    }
    Ok(Device::Cpu)
}

fn select_dtype(fp16: bool) -> DType {
    if fp16 {
        DType::F16
    } else {
        DType::F32
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));
    fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_env_filter(filter)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::new(if verbose { "debug" } else { "info" })
}

fn create_spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(msg.to_string());
    Ok(pb)
}
