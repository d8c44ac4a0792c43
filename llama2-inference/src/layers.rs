use crate::configuration::ModelConfig;
use crate::state::RunState;
use rayon::prelude::*;

/// Epsilon value for numerical stability in normalization
const EPSILON: f32 = 1e-5;

/// Token embedding layer - converts token IDs to dense vectors
///
/// **Shape**: [vocab_size, dim]
/// **Note**: Shared with the classifier when weights are tied
pub struct TokenEmbedding<'a> {
    pub embedding_table: &'a [f32],
    pub dim: usize,
}

impl<'a> TokenEmbedding<'a> {
    pub fn new(embedding_table: &'a [f32], dim: usize) -> Self {
        Self { embedding_table, dim }
    }

    pub fn forward(&self, token: usize, output: &mut [f32]) {
        let start_idx = token * self.dim;
        output[..self.dim].copy_from_slice(&self.embedding_table[start_idx..start_idx + self.dim]);
    }
}

impl std::fmt::Debug for TokenEmbedding<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEmbedding")
            .field("dim", &self.dim)
            .field("vocab_size", &(self.embedding_table.len() / self.dim))
            .finish()
    }
}

/// RMS Layer Normalization
///
/// **Mathematical Formula**:
/// ```text
/// RMSNorm(x) = x / RMS(x) * γ
/// where RMS(x) = sqrt(mean(x²) + ε)
/// ```
pub struct RMSNorm<'a> {
    pub weight: &'a [f32],
}

impl<'a> RMSNorm<'a> {
    pub fn new(weight: &'a [f32]) -> Self {
        Self { weight }
    }

    pub fn forward(&self, output: &mut [f32], input: &[f32]) {
        rmsnorm(output, input, self.weight);
    }

    pub fn forward_inplace(&self, x: &mut [f32]) {
        debug_assert_eq!(x.len(), self.weight.len());

        let scale = rms_scale(x);
        x.iter_mut().zip(self.weight.iter()).for_each(|(val, &w)| {
            *val = w * (scale * *val);
        });
    }
}

impl std::fmt::Debug for RMSNorm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RMSNorm").field("dim", &self.weight.len()).finish()
    }
}

/// Rotary Position Embedding (RoPE) driven by the precomputed frequency tables
/// stored in the checkpoint.
///
/// Adjacent pairs `(i, i + 1)` inside every head are rotated as complex numbers
/// by the `(real, imag)` entry `i / 2` of the row for the current position.
pub struct RoPE {
    pub head_size: usize,
}

impl RoPE {
    pub fn new(head_size: usize) -> Self {
        Self { head_size }
    }

    /// Rotates every head of `x` in place.
    pub fn apply(&self, x: &mut [f32], freq_real: &[f32], freq_imag: &[f32]) {
        debug_assert_eq!(freq_real.len(), self.head_size / 2);
        debug_assert_eq!(freq_imag.len(), self.head_size / 2);

        for head in x.chunks_exact_mut(self.head_size) {
            head.chunks_exact_mut(2).zip(freq_real.iter().zip(freq_imag.iter())).for_each(|(pair, (&fcr, &fci))| {
                let (x0, x1) = (pair[0], pair[1]);
                pair[0] = x0 * fcr - x1 * fci;
                pair[1] = x0 * fci + x1 * fcr;
            });
        }
    }
}

impl std::fmt::Debug for RoPE {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoPE").field("head_size", &self.head_size).finish()
    }
}

/// Linear layer over an output-feature-major weight matrix `(out_features, in_features)`.
pub struct Linear<'a> {
    pub weight: &'a [f32],
    pub in_features: usize,
    pub out_features: usize,
}

impl<'a> Linear<'a> {
    pub fn new(weight: &'a [f32], in_features: usize, out_features: usize) -> Self {
        debug_assert_eq!(weight.len(), in_features * out_features);
        Self { weight, in_features, out_features }
    }

    pub fn forward(&self, output: &mut [f32], input: &[f32]) {
        matmul(&mut output[..self.out_features], &input[..self.in_features], self.weight);
    }
}

impl std::fmt::Debug for Linear<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .finish()
    }
}

/// Multi-Head Attention over the key/value cache
///
/// **Components**:
/// - **Q, K, V Projections**: Linear transformations to query, key, value spaces
/// - **RoPE**: Rotary position embedding applied to queries and keys
/// - **Scaled Dot-Product Attention**: one softmax per head over positions `0..=pos`
/// - **Output Projection**: applied by the owning block
///
/// **Attention Formula**:
/// ```text
/// Attention(Q,K,V) = softmax(QK^T / √d_k)V
/// ```
pub struct MultiHeadAttention<'a> {
    pub wq: Linear<'a>,
    pub wk: Linear<'a>,
    pub wv: Linear<'a>,
    pub wo: Linear<'a>,
    pub rope: RoPE,
    pub n_heads: usize,
    pub head_size: usize,
    pub seq_len: usize,
}

impl<'a> MultiHeadAttention<'a> {
    pub fn new(wq: Linear<'a>, wk: Linear<'a>, wv: Linear<'a>, wo: Linear<'a>, config: &ModelConfig) -> Self {
        Self {
            wq,
            wk,
            wv,
            wo,
            rope: RoPE::new(config.head_size),
            n_heads: config.n_heads,
            head_size: config.head_size,
            seq_len: config.seq_len,
        }
    }

    /// Projects `state.xb` to q/k/v, stores k/v at `(layer_idx, pos)` and leaves the
    /// concatenated head outputs in `state.xb`.
    pub fn forward(&self, pos: usize, layer_idx: usize, freq_cis: (&[f32], &[f32]), state: &mut RunState) {
        self.wq.forward(&mut state.q, &state.xb);
        self.wk.forward(&mut state.k, &state.xb);
        self.wv.forward(&mut state.v, &state.xb);

        let (freq_real, freq_imag) = freq_cis;
        self.rope.apply(&mut state.q, freq_real, freq_imag);
        self.rope.apply(&mut state.k, freq_real, freq_imag);

        state.key_cache.slot_mut(layer_idx, pos).copy_from_slice(&state.k);
        state.value_cache.slot_mut(layer_idx, pos).copy_from_slice(&state.v);

        self.compute_attention(pos, layer_idx, state);
    }

    fn compute_attention(&self, pos: usize, layer_idx: usize, state: &mut RunState) {
        let head_size = self.head_size;
        let dim = self.n_heads * head_size;
        let scale_divisor = (head_size as f32).sqrt();

        let RunState { q, att, xb, key_cache, value_cache, .. } = state;
        let q: &[f32] = q;
        let keys = key_cache.layer(layer_idx);
        let values = value_cache.layer(layer_idx);

        att.par_chunks_mut(self.seq_len).zip(xb.par_chunks_mut(head_size)).enumerate().for_each(
            |(head_idx, (att_slice, xb_slice))| {
                let head_offset = head_idx * head_size;
                let q_head = &q[head_offset..head_offset + head_size];

                let att_head = &mut att_slice[..=pos];

                att_head.iter_mut().enumerate().for_each(|(time_step, score)| {
                    let k_start = time_step * dim + head_offset;
                    *score = dot(q_head, &keys[k_start..k_start + head_size]) / scale_divisor;
                });

                softmax(att_head);

                xb_slice.fill(0.0);
                for (time_step, &weight) in att_head.iter().enumerate() {
                    let v_start = time_step * dim + head_offset;
                    xb_slice
                        .iter_mut()
                        .zip(&values[v_start..v_start + head_size])
                        .for_each(|(out, &value)| *out += weight * value);
                }
            },
        );
    }
}

impl std::fmt::Debug for MultiHeadAttention<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("n_heads", &self.n_heads)
            .field("head_size", &self.head_size)
            .field("wq", &self.wq)
            .field("wk", &self.wk)
            .field("wv", &self.wv)
            .field("wo", &self.wo)
            .finish()
    }
}

/// Feed-Forward Network with SwiGLU activation
///
/// **Formula**: `W2 · (SiLU(W1·x) ⊙ (W3·x))`, where `SiLU(x) = x · sigmoid(x)`
pub struct FeedForward<'a> {
    pub w1: Linear<'a>, // Gate projection
    pub w2: Linear<'a>, // Down projection
    pub w3: Linear<'a>, // Up projection
}

impl<'a> FeedForward<'a> {
    pub fn new(w1: Linear<'a>, w2: Linear<'a>, w3: Linear<'a>) -> Self {
        Self { w1, w2, w3 }
    }

    /// Reads `state.xb`, writes the block output back into `state.xb`.
    pub fn forward(&self, state: &mut RunState) {
        self.w1.forward(&mut state.hb, &state.xb);
        self.w3.forward(&mut state.hb2, &state.xb);

        state.hb.iter_mut().for_each(|val| *val = silu(*val));
        state.hb.iter_mut().zip(state.hb2.iter()).for_each(|(gate_val, &up_val)| *gate_val *= up_val);

        self.w2.forward(&mut state.xb, &state.hb);
    }
}

impl std::fmt::Debug for FeedForward<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedForward")
            .field("hidden_dim", &self.w1.out_features)
            .field("w1", &self.w1)
            .field("w2", &self.w2)
            .field("w3", &self.w3)
            .finish()
    }
}

#[inline]
fn rms_scale(x: &[f32]) -> f32 {
    let sum_of_squares = x.iter().map(|&v| v * v).sum::<f32>();
    1.0f32 / ((sum_of_squares / x.len() as f32) + EPSILON).sqrt()
}

/// RMS-normalizes `input` into `output`, rescaling by `weight`.
pub fn rmsnorm(output: &mut [f32], input: &[f32], weight: &[f32]) {
    debug_assert_eq!(output.len(), input.len());
    debug_assert_eq!(input.len(), weight.len());

    let scale = rms_scale(input);
    output.iter_mut().zip(input.iter()).zip(weight.iter()).for_each(|((out, &inp), &w)| {
        *out = w * (scale * inp);
    });
}

/// Applies numerically stable softmax to a slice in-place.
pub fn softmax(x: &mut [f32]) {
    let max_val = x.iter().fold(f32::NEG_INFINITY, |acc, &val| acc.max(val));
    let sum = x
        .iter_mut()
        .map(|val| {
            *val = (*val - max_val).exp();
            *val
        })
        .sum::<f32>();
    x.iter_mut().for_each(|val| *val /= sum);
}

/// `W (d, n) @ x (n,) -> xout (d,)`, rows computed in parallel.
pub fn matmul(xout: &mut [f32], x: &[f32], w: &[f32]) {
    let n = x.len();
    assert!(w.len() >= xout.len() * n, "weight matrix too small: {} < {} x {}", w.len(), xout.len(), n);

    xout.par_iter_mut().enumerate().for_each(|(i, out_val)| {
        *out_val = dot(&w[i * n..(i + 1) * n], x);
    });
}

/// Adds `delta` to `x` element-wise (residual connection).
pub fn accum(x: &mut [f32], delta: &[f32]) {
    x.iter_mut().zip(delta.iter()).for_each(|(x_val, &d)| *x_val += d);
}

#[inline]
pub fn silu(x: f32) -> f32 {
    x * (1.0f32 / (1.0f32 + (-x).exp()))
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0f32, |acc, (&x, &y)| acc + x * y)
}
