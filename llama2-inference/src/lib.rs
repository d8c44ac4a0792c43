//! Inference engine for Llama-2 style decoder-only transformers.
//!
//! The core loads a flat f32 checkpoint without copying it, runs the forward pass
//! over a per-run activation state and samples tokens one position at a time.

mod checkpoint;
mod configuration;
mod error;
mod evaluation;
mod generation;
pub mod layers;
mod models;
mod sampler;
mod state;
mod vocabulary;
mod weights;

use anyhow::{Context, Result};
use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};

pub use crate::checkpoint::Checkpoint;
pub use crate::configuration::{HEADER_SIZE, ModelConfig, read_config};
pub use crate::error::InferenceError;
pub use crate::evaluation::{EvaluationReport, evaluate, token_loss};
pub use crate::generation::{BOS_TOKEN, GenerationReport, effective_steps, generate};
pub use crate::models::{Llama2Transformer, Llama2TransformerBlock, Transformer};
pub use crate::sampler::{Rng, Sampler};
pub use crate::state::{KvCache, RunState};
pub use crate::vocabulary::Vocabulary;
pub use crate::weights::{LayerWeights, TensorView, WeightLayout, WeightStore};

/// Default seed, fixed so that runs are reproducible unless overridden.
const DEFAULT_SEED: u64 = 1337;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Sample new tokens starting from the beginning-of-sequence token.
    Generate,
    /// Score a token id sequence and report its loss.
    Evaluate,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "generate" => Ok(Mode::Generate),
            "evaluate" => Ok(Mode::Evaluate),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub checkpoint_path: PathBuf,
    pub vocabulary_path: PathBuf,
    pub temperature: f32,
    pub topp: f32,
    pub steps: usize,
    pub seed: u64,
    pub mode: Mode,
    pub tokens_path: Option<PathBuf>,
}

impl InferenceConfig {
    pub fn builder() -> InferenceConfigBuilder {
        InferenceConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct InferenceConfigBuilder {
    checkpoint_path: Option<PathBuf>,
    vocabulary_path: Option<PathBuf>,
    temperature: Option<f32>,
    topp: Option<f32>,
    steps: Option<usize>,
    seed: Option<u64>,
    mode: Option<Mode>,
    tokens_path: Option<PathBuf>,
}

impl InferenceConfigBuilder {
    pub fn checkpoint_path(mut self, path: Option<&String>) -> Self {
        self.checkpoint_path = path.map(PathBuf::from);
        self
    }
    pub fn vocabulary_path(mut self, path: Option<&String>) -> Self {
        self.vocabulary_path = path.map(PathBuf::from);
        self
    }
    pub fn temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
    pub fn topp(mut self, topp: Option<f32>) -> Self {
        self.topp = topp;
        self
    }
    pub fn steps(mut self, steps: Option<usize>) -> Self {
        self.steps = steps;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
    pub fn mode(mut self, mode: Option<Mode>) -> Self {
        self.mode = mode;
        self
    }
    pub fn tokens_path(mut self, path: Option<&String>) -> Self {
        self.tokens_path = path.map(PathBuf::from);
        self
    }
    pub fn build(self) -> std::result::Result<InferenceConfig, String> {
        let mode = self.mode.unwrap_or(Mode::Generate);
        if mode == Mode::Evaluate && self.tokens_path.is_none() {
            return Err("tokens_path is required in evaluate mode".to_string());
        }

        let temperature = self.temperature.unwrap_or(0.9);
        if temperature.is_nan() || temperature < 0.0 {
            return Err(format!("temperature must be non-negative, got {temperature}"));
        }

        Ok(InferenceConfig {
            checkpoint_path: self.checkpoint_path.ok_or("checkpoint_path is required")?,
            vocabulary_path: self.vocabulary_path.unwrap_or_else(|| PathBuf::from("tokenizer.bin")),
            temperature,
            topp: self.topp.unwrap_or(1.0),
            steps: self.steps.unwrap_or(256),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            mode,
            tokens_path: self.tokens_path,
        })
    }
}

/// Runs inference, writing display output to `out`.
pub fn run_inference(inference_config: InferenceConfig, out: &mut impl Write) -> Result<()> {
    debug!("{inference_config:#?}");

    let checkpoint = Checkpoint::open(&inference_config.checkpoint_path)
        .with_context(|| format!("Failed to load checkpoint: {}", inference_config.checkpoint_path.display()))?;

    let weights = WeightStore::new(&checkpoint);
    let mut transformer = Llama2Transformer::new(weights)?;

    debug!("{transformer:#?}");

    let vocab_size = transformer.get_config().vocab_size;
    let vocabulary = Vocabulary::load(&inference_config.vocabulary_path, vocab_size).with_context(|| {
        format!("Failed to load vocabulary: {}", inference_config.vocabulary_path.display())
    })?;

    debug!("{vocabulary:#?}");

    match inference_config.mode {
        Mode::Generate => run_generate(&mut transformer, &vocabulary, &inference_config, out),
        Mode::Evaluate => run_evaluate(&mut transformer, &vocabulary, &inference_config, out),
    }
}

fn run_generate(
    transformer: &mut Llama2Transformer<'_>,
    vocabulary: &Vocabulary,
    inference_config: &InferenceConfig,
    out: &mut impl Write,
) -> Result<()> {
    let vocab_size = transformer.get_config().vocab_size;
    let mut sampler = Sampler::new(vocab_size, inference_config.temperature, inference_config.topp)?;
    let mut rng = Rng::new(inference_config.seed);

    // explicit print of the initial BOS token
    writeln!(out, "<s>")?;

    let report = generate(transformer, &mut sampler, &mut rng, inference_config.steps, |token| {
        write!(out, "{}", vocabulary.decode(token)?)?;
        out.flush()?;
        Ok(())
    })?;

    writeln!(out)?;
    debug!("generated {} tokens at {:.2} tokens/sec", report.tokens.len(), report.tokens_per_sec());

    Ok(())
}

fn run_evaluate(
    transformer: &mut Llama2Transformer<'_>,
    vocabulary: &Vocabulary,
    inference_config: &InferenceConfig,
    out: &mut impl Write,
) -> Result<()> {
    let tokens_path = inference_config.tokens_path.as_ref().context("tokens_path is required in evaluate mode")?;
    let tokens = read_token_ids(tokens_path)?;

    let temperature = if inference_config.temperature > 0.0 { inference_config.temperature } else { 1.0 };
    let report = evaluate(transformer, &tokens, temperature)?;

    for (pos, (&token, loss)) in tokens.iter().zip(&report.losses).enumerate() {
        writeln!(out, "{} {pos} {loss:.6}", vocabulary.decode(token)?)?;
    }
    writeln!(out, "mean loss {:.6}, perplexity {:.6}", report.mean_loss(), report.perplexity())?;

    Ok(())
}

fn read_token_ids(path: &Path) -> Result<Vec<usize>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read token ids: {}", path.display()))?;

    text.split_whitespace()
        .map(|id| id.parse::<usize>().with_context(|| format!("Invalid token id: {id}")))
        .collect()
}
