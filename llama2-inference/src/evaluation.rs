//! Forward-only scoring of token sequences.
//!
//! Computes the cross-entropy of a target token under the model's next-token
//! distribution. No gradients are produced.

use crate::error::{InferenceError, Result};
use crate::generation::BOS_TOKEN;
use crate::layers::softmax;
use crate::models::Transformer;
use log::{info, warn};

/// Added to the target probability before taking the logarithm.
const LOSS_EPSILON: f32 = 1e-7;

/// Per-position losses of a teacher-forced sequence.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub losses: Vec<f32>,
}

impl EvaluationReport {
    pub fn mean_loss(&self) -> f32 {
        self.losses.iter().sum::<f32>() / self.losses.len() as f32
    }

    pub fn perplexity(&self) -> f32 {
        self.mean_loss().exp()
    }
}

/// Negative log-likelihood of `target` following `token` at `pos`:
/// `-ln(softmax(logits / temperature)[target] + 1e-7)`.
pub fn token_loss<T: Transformer + ?Sized>(
    transformer: &mut T,
    token: usize,
    pos: usize,
    target: usize,
    temperature: f32,
) -> Result<f32> {
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(InferenceError::config(format!("loss temperature must be positive, got {temperature}")));
    }

    let vocab_size = transformer.get_config().vocab_size;
    InferenceError::check_range("target token", target, vocab_size)?;

    let mut probabilities: Vec<f32> = transformer.forward(token, pos)?.iter().map(|&l| l / temperature).collect();
    softmax(&mut probabilities);

    Ok(-(probabilities[target] + LOSS_EPSILON).ln())
}

/// Scores `tokens` with teacher forcing: position 0 predicts `tokens[0]` from
/// [`BOS_TOKEN`], position `i` predicts `tokens[i]` from `tokens[i - 1]`.
///
/// Sequences longer than the model context are truncated to `seq_len`.
pub fn evaluate<T: Transformer + ?Sized>(transformer: &mut T, tokens: &[usize], temperature: f32) -> Result<EvaluationReport> {
    if tokens.is_empty() {
        return Err(InferenceError::config("no tokens to evaluate"));
    }

    let seq_len = transformer.get_config().seq_len;
    if tokens.len() > seq_len {
        warn!("evaluating first {seq_len} of {} tokens", tokens.len());
    }

    let mut losses = Vec::with_capacity(tokens.len().min(seq_len));
    let mut token = BOS_TOKEN;

    for (pos, &target) in tokens.iter().take(seq_len).enumerate() {
        losses.push(token_loss(transformer, token, pos, target, temperature)?);
        token = target;
    }

    let report = EvaluationReport { losses };
    info!("mean loss {:.4}, perplexity {:.4} over {} tokens", report.mean_loss(), report.perplexity(), report.losses.len());

    Ok(report)
}
