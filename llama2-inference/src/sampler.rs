use crate::error::{InferenceError, Result};
use crate::layers::softmax;

/// Seed substituted for zero, which would keep xorshift at zero forever.
const ZERO_SEED_REPLACEMENT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Xorshift random number generator owned by the caller of the sampler.
///
/// Two generators created with the same seed yield the same sequence.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self { state: if seed == 0 { ZERO_SEED_REPLACEMENT } else { seed } }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        ((self.state.wrapping_mul(0x2545F4914F6CDD1D)) >> 32) as u32
    }

    /// Returns a random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / 16777216.0
    }
}

/// Stores a probability and its associated index (token id).
#[derive(Clone, Debug)]
struct ProbIndex {
    prob: f32,
    index: usize,
}

/// Temperature sampler for language model logits with optional top-p truncation.
///
/// The random source is passed into every [`Sampler::sample`] call; the sampler
/// itself holds no random state.
#[derive(Debug)]
pub struct Sampler {
    probindex: Vec<ProbIndex>,
    temperature: f32,
    topp: f32,
}

impl Sampler {
    /// Creates a new sampler.
    ///
    /// # Arguments
    /// * `vocab_size` - Size of the vocabulary
    /// * `temperature` - 0.0 for greedy argmax, otherwise the logit divisor
    /// * `topp` - Top-p threshold; values outside (0, 1) disable truncation
    pub fn new(vocab_size: usize, temperature: f32, topp: f32) -> Result<Self> {
        if vocab_size == 0 {
            return Err(InferenceError::config("vocab size must be positive"));
        }
        if temperature.is_nan() || temperature < 0.0 {
            return Err(InferenceError::config(format!("temperature must be non-negative, got {temperature}")));
        }
        if topp.is_nan() {
            return Err(InferenceError::config("top-p must be a number"));
        }

        Ok(Self { probindex: Vec::with_capacity(vocab_size), temperature, topp })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Returns the index of the maximum logit, lowest index on ties.
    fn sample_argmax(logits: &[f32]) -> usize {
        let Some(&first) = logits.first() else {
            return 0;
        };

        logits
            .iter()
            .enumerate()
            .skip(1)
            .fold((0, first), |(max_i, max_p), (i, &p)| if p > max_p { (i, p) } else { (max_i, max_p) })
            .0
    }

    /// Multinomial sampling: first index whose cumulative probability exceeds `coin`.
    fn sample_mult(probabilities: &[f32], coin: f32) -> usize {
        let mut cdf = 0.0;
        for (i, &prob) in probabilities.iter().enumerate() {
            cdf += prob;
            if coin < cdf {
                return i;
            }
        }
        // rounding left the total below `coin`
        probabilities.len().saturating_sub(1)
    }

    /// Top-p (nucleus) sampling: sample from the smallest set of tokens whose cumulative probability exceeds `topp`.
    fn sample_topp(&mut self, probabilities: &[f32], coin: f32) -> usize {
        let cutoff = (1.0 - self.topp) / (probabilities.len().saturating_sub(1).max(1)) as f32;

        self.probindex.clear();
        self.probindex.extend(
            probabilities
                .iter()
                .enumerate()
                .filter(|&(_, &prob)| prob >= cutoff)
                .map(|(index, &prob)| ProbIndex { prob, index }),
        );

        if self.probindex.is_empty() {
            return Self::sample_mult(probabilities, coin);
        }

        // Sort by probability (descending)
        self.probindex.sort_unstable_by(|a, b| b.prob.total_cmp(&a.prob));

        // Find truncation point
        let mut cumulative_prob = 0.0;
        let mut last_idx = self.probindex.len() - 1;
        for (i, candidate) in self.probindex.iter().enumerate() {
            cumulative_prob += candidate.prob;
            if cumulative_prob > self.topp {
                last_idx = i;
                break;
            }
        }

        // Sample from truncated list
        let r = coin * cumulative_prob;
        let mut cdf = 0.0;
        for candidate in &self.probindex[..=last_idx] {
            cdf += candidate.prob;
            if r < cdf {
                return candidate.index;
            }
        }
        self.probindex[last_idx].index
    }

    /// Samples a token index from logits.
    ///
    /// - If temperature is 0, returns the argmax (greedy) and leaves `rng` untouched.
    /// - Otherwise scales logits by the temperature in place, applies softmax and draws
    ///   one value from `rng` to pick an index, with top-p truncation when enabled.
    pub fn sample(&mut self, logits: &mut [f32], rng: &mut Rng) -> usize {
        if self.temperature == 0.0 {
            return Self::sample_argmax(logits);
        }

        for logit in logits.iter_mut() {
            *logit /= self.temperature;
        }

        softmax(logits);

        let coin = rng.next_f32();

        if self.topp <= 0.0 || self.topp >= 1.0 {
            Self::sample_mult(logits, coin)
        } else {
            self.sample_topp(logits, coin)
        }
    }
}
