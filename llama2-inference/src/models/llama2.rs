use super::Transformer;
use crate::{
    configuration::ModelConfig,
    error::{InferenceError, Result},
    layers::*,
    state::RunState,
    weights::{LayerWeights, WeightStore},
};

/// Decoder-only transformer with rotary embeddings, multi-head attention and a
/// SwiGLU feed-forward block, running over a borrowed [`WeightStore`].
pub struct Llama2Transformer<'a> {
    config: ModelConfig,
    weights: WeightStore<'a>,
    token_embedding: TokenEmbedding<'a>,
    blocks: Vec<Llama2TransformerBlock<'a>>,
    final_norm: RMSNorm<'a>,
    lm_head: Linear<'a>,
    state: RunState,
}

impl<'a> Llama2Transformer<'a> {
    /// Builds the layer stack over `weights` and allocates a fresh run state.
    pub fn new(weights: WeightStore<'a>) -> Result<Self> {
        let config = *weights.config();
        let state = RunState::new(&config)?;

        let blocks = (0..config.n_layers)
            .map(|layer_idx| Ok(Llama2TransformerBlock::new(&config, layer_idx, weights.layer(layer_idx)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            weights,
            token_embedding: TokenEmbedding::new(weights.token_embedding_table(), config.dim),
            blocks,
            final_norm: RMSNorm::new(weights.rms_final_weight()),
            lm_head: Linear::new(weights.classifier(), config.dim, config.vocab_size),
            state,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Clears activations and both caches so generation can restart at position 0.
    pub fn reset(&mut self) {
        self.state.reset();
    }
}

impl Transformer for Llama2Transformer<'_> {
    /// Forward pass through the transformer for autoregressive generation
    ///
    /// **Process Flow:**
    /// 1. **Token Embedding**: Copy the embedding row for `token` into the residual stream
    /// 2. **Transformer Blocks**: attention + feed-forward per layer, writing cache slot `pos`
    /// 3. **Final Normalization**: RMSNorm of the residual stream in place
    /// 4. **Classification Head**: Project to vocabulary space
    fn forward(&mut self, token: usize, pos: usize) -> Result<&[f32]> {
        InferenceError::check_range("token", token, self.config.vocab_size)?;
        InferenceError::check_range("position", pos, self.config.seq_len)?;

        self.token_embedding.forward(token, &mut self.state.x);

        let freq_cis = self.weights.freq_cis(pos);
        for block in &self.blocks {
            block.forward(pos, freq_cis, &mut self.state);
        }

        self.final_norm.forward_inplace(&mut self.state.x);

        self.lm_head.forward(&mut self.state.logits, &self.state.x);

        Ok(&self.state.logits)
    }

    fn get_config(&self) -> &ModelConfig {
        &self.config
    }
}

impl std::fmt::Debug for Llama2Transformer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct BlocksSummary<'a, T>(&'a [T]);

        impl<T: std::fmt::Debug> std::fmt::Debug for BlocksSummary<'_, T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_list()
                    .entries(self.0.iter().take(1))
                    .entry(&format_args!("... and {} more", self.0.len().saturating_sub(1)))
                    .finish()
            }
        }

        f.debug_struct("Llama2Transformer")
            .field("config", &self.config)
            .field("weights", &self.weights)
            .field("token_embedding", &self.token_embedding)
            .field("blocks", &BlocksSummary(&self.blocks))
            .field("final_norm", &self.final_norm)
            .field("lm_head", &self.lm_head)
            .finish()
    }
}

/// Transformer Block - decoder layer combining self-attention and feed-forward
pub struct Llama2TransformerBlock<'a> {
    pub attn_norm: RMSNorm<'a>,
    pub attention: MultiHeadAttention<'a>,
    pub ffn_norm: RMSNorm<'a>,
    pub feed_forward: FeedForward<'a>,
    pub layer_idx: usize,
}

impl<'a> Llama2TransformerBlock<'a> {
    pub fn new(config: &ModelConfig, layer_idx: usize, weights: LayerWeights<'a>) -> Self {
        let ModelConfig { dim, hidden_dim, .. } = *config;

        let attention = MultiHeadAttention::new(
            Linear::new(weights.wq, dim, dim),
            Linear::new(weights.wk, dim, dim),
            Linear::new(weights.wv, dim, dim),
            Linear::new(weights.wo, dim, dim),
            config,
        );

        let feed_forward = FeedForward::new(
            Linear::new(weights.w1, dim, hidden_dim),
            Linear::new(weights.w2, hidden_dim, dim),
            Linear::new(weights.w3, dim, hidden_dim),
        );

        Self {
            attn_norm: RMSNorm::new(weights.rms_att_weight),
            attention,
            ffn_norm: RMSNorm::new(weights.rms_ffn_weight),
            feed_forward,
            layer_idx,
        }
    }

    fn forward(&self, pos: usize, freq_cis: (&[f32], &[f32]), state: &mut RunState) {
        // Attention block with residual connection
        self.attn_norm.forward(&mut state.xb, &state.x);
        self.attention.forward(pos, self.layer_idx, freq_cis, state);
        self.attention.wo.forward(&mut state.xb2, &state.xb);
        accum(&mut state.x, &state.xb2);

        // Feed-forward block with residual connection
        self.ffn_norm.forward(&mut state.xb, &state.x);
        self.feed_forward.forward(state);
        accum(&mut state.x, &state.xb);
    }
}

impl std::fmt::Debug for Llama2TransformerBlock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerBlock")
            .field("layer_idx", &self.layer_idx)
            .field("attn_norm", &self.attn_norm)
            .field("attention", &self.attention)
            .field("ffn_norm", &self.ffn_norm)
            .field("feed_forward", &self.feed_forward)
            .finish()
    }
}
