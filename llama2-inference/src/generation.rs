use crate::error::Result;
use crate::models::Transformer;
use crate::sampler::{Rng, Sampler};
use log::info;
use std::time::{Duration, Instant};

/// Beginning-of-sequence token id used to start every run.
pub const BOS_TOKEN: usize = 1;

/// Number of steps a run performs: `requested` when in `1..=seq_len`, else `seq_len`.
pub fn effective_steps(requested: usize, seq_len: usize) -> usize {
    if requested == 0 || requested > seq_len { seq_len } else { requested }
}

/// Outcome of a completed generation run.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    /// Generated token ids in emission order
    pub tokens: Vec<usize>,
    pub elapsed: Duration,
}

impl GenerationReport {
    pub fn tokens_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.tokens.len() as f64 / secs } else { 0.0 }
    }
}

/// Autoregressively generates tokens starting from [`BOS_TOKEN`] at position 0.
///
/// Every sampled token is handed to `on_token` as soon as it is produced, so tokens
/// emitted before a failure stay emitted; the first error from the forward pass, the
/// sampler or `on_token` ends the run.
pub fn generate<T, F>(
    transformer: &mut T,
    sampler: &mut Sampler,
    rng: &mut Rng,
    requested_steps: usize,
    mut on_token: F,
) -> Result<GenerationReport>
where
    T: Transformer + ?Sized,
    F: FnMut(usize) -> Result<()>,
{
    let steps = effective_steps(requested_steps, transformer.get_config().seq_len);
    let mut state = GenerationState::new(BOS_TOKEN);
    let mut logits = Vec::with_capacity(transformer.get_config().vocab_size);
    let mut tokens = Vec::with_capacity(steps);

    state.metrics.start_generation();

    while state.pos < steps {
        let next = generate_next_token(transformer, sampler, rng, state.token, state.pos, &mut logits)?;
        state.metrics.increment_token();

        on_token(next)?;
        tokens.push(next);

        state.advance(next);
    }

    let elapsed = state.metrics.report_and_reset();

    Ok(GenerationReport { tokens, elapsed })
}

fn generate_next_token<T: Transformer + ?Sized>(
    transformer: &mut T,
    sampler: &mut Sampler,
    rng: &mut Rng,
    token: usize,
    pos: usize,
    logits_buffer: &mut Vec<f32>,
) -> Result<usize> {
    let logits = transformer.forward(token, pos)?;
    logits_buffer.clear();
    logits_buffer.extend_from_slice(logits);
    Ok(sampler.sample(logits_buffer, rng))
}

/// Tracks token generation performance metrics
struct TokenMetrics {
    start_time: Option<Instant>,
    generated_count: usize,
}

impl TokenMetrics {
    fn new() -> Self {
        Self { start_time: None, generated_count: 0 }
    }

    fn start_generation(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    fn increment_token(&mut self) {
        self.generated_count += 1;
    }

    fn report_and_reset(&mut self) -> Duration {
        let duration = self.start_time.take().map(|start| start.elapsed()).unwrap_or_default();

        if self.generated_count > 0 && duration.as_secs_f64() > 0.0 {
            info!(
                "generated {} tokens in {:.2}s - {:.2} tokens/sec",
                self.generated_count,
                duration.as_secs_f64(),
                self.generated_count as f64 / duration.as_secs_f64()
            );
        }

        self.generated_count = 0;
        duration
    }
}

/// Represents the current generation state
struct GenerationState {
    pos: usize,
    token: usize,
    metrics: TokenMetrics,
}

impl GenerationState {
    fn new(initial_token: usize) -> Self {
        Self { pos: 0, token: initial_token, metrics: TokenMetrics::new() }
    }

    fn advance(&mut self, next_token: usize) {
        self.token = next_token;
        self.pos += 1;
    }
}
