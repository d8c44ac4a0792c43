use crate::configuration::{ModelConfig, checked_len};
use crate::error::{InferenceError, Result};
use log::debug;

/// Per-layer, per-position key or value storage.
///
/// Laid out as `[n_layers, seq_len, dim]`; slot `(layer, pos)` is `dim` floats.
#[derive(Debug)]
pub struct KvCache {
    data: Vec<f32>,
    seq_len: usize,
    dim: usize,
}

impl KvCache {
    fn new(name: &'static str, config: &ModelConfig) -> Result<Self> {
        let len = checked_len(name, &[config.n_layers, config.seq_len, config.dim])?;
        Ok(Self { data: zeroed(name, len)?, seq_len: config.seq_len, dim: config.dim })
    }

    /// Cached vector at `(layer, pos)`.
    pub fn slot(&self, layer: usize, pos: usize) -> &[f32] {
        let start = self.slot_offset(layer, pos);
        &self.data[start..start + self.dim]
    }

    pub fn slot_mut(&mut self, layer: usize, pos: usize) -> &mut [f32] {
        let start = self.slot_offset(layer, pos);
        &mut self.data[start..start + self.dim]
    }

    /// All positions of one layer, `[seq_len, dim]`.
    pub fn layer(&self, layer: usize) -> &[f32] {
        let layer_len = self.seq_len * self.dim;
        &self.data[layer * layer_len..(layer + 1) * layer_len]
    }

    fn slot_offset(&self, layer: usize, pos: usize) -> usize {
        debug_assert!(pos < self.seq_len, "position {pos} beyond cache length {}", self.seq_len);
        (layer * self.seq_len + pos) * self.dim
    }

    fn clear(&mut self) {
        self.data.fill(0.0);
    }
}

/// Runtime state for transformer inference.
///
/// Every buffer except the two caches is fully overwritten by each forward pass.
/// The caches keep one slot per `(layer, position)`, written once when that
/// position is processed.
#[derive(Debug)]
pub struct RunState {
    /// Residual stream
    /// Shape: [dim]
    pub x: Vec<f32>,

    /// Activation inside a residual branch
    /// Shape: [dim]
    pub xb: Vec<f32>,

    /// Additional residual branch buffer
    /// Shape: [dim]
    pub xb2: Vec<f32>,

    /// Hidden state buffer for feed-forward computations
    /// Shape: [hidden_dim]
    pub hb: Vec<f32>,

    /// Secondary hidden buffer for FFN gate operations
    /// Shape: [hidden_dim]
    pub hb2: Vec<f32>,

    /// Query, key and value for the current position
    /// Shape: [dim]
    pub q: Vec<f32>,
    pub k: Vec<f32>,
    pub v: Vec<f32>,

    /// Attention scores
    /// Shape: [n_heads, seq_len]
    pub att: Vec<f32>,

    /// Final output logits over vocabulary
    /// Shape: [vocab_size]
    pub logits: Vec<f32>,

    pub key_cache: KvCache,
    pub value_cache: KvCache,
}

impl RunState {
    /// Allocates zeroed buffers sized from the model configuration.
    ///
    /// Fails with [`InferenceError::Allocation`] if any buffer cannot be reserved;
    /// buffers allocated before the failure are released on return.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let ModelConfig { dim, hidden_dim, n_heads, vocab_size, seq_len, .. } = *config;

        let state = Self {
            x: zeroed("x", dim)?,
            xb: zeroed("xb", dim)?,
            xb2: zeroed("xb2", dim)?,

            hb: zeroed("hb", hidden_dim)?,
            hb2: zeroed("hb2", hidden_dim)?,

            q: zeroed("q", dim)?,
            k: zeroed("k", dim)?,
            v: zeroed("v", dim)?,
            att: zeroed("att", checked_len("att", &[n_heads, seq_len])?)?,

            logits: zeroed("logits", vocab_size)?,

            key_cache: KvCache::new("key cache", config)?,
            value_cache: KvCache::new("value cache", config)?,
        };

        debug!(
            "allocated run state: {} cache floats per tensor, {} attention floats",
            state.key_cache.data.len(),
            state.att.len()
        );

        Ok(state)
    }

    /// Zeroes every buffer, including both caches, for a fresh run.
    pub fn reset(&mut self) {
        for buffer in
            [&mut self.x, &mut self.xb, &mut self.xb2, &mut self.hb, &mut self.hb2, &mut self.q, &mut self.k, &mut self.v]
        {
            buffer.fill(0.0);
        }
        self.att.fill(0.0);
        self.logits.fill(0.0);
        self.key_cache.clear();
        self.value_cache.clear();
    }
}

fn zeroed(buffer: &'static str, len: usize) -> Result<Vec<f32>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| InferenceError::Allocation { buffer, len })?;
    data.resize(len, 0.0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        ModelConfig::from_header([8, 16, 2, 2, 2, 4, 3]).unwrap()
    }

    #[test]
    fn buffers_are_sized_from_config() {
        let state = RunState::new(&config()).unwrap();

        assert_eq!(state.x.len(), 8);
        assert_eq!(state.xb2.len(), 8);
        assert_eq!(state.hb.len(), 16);
        assert_eq!(state.hb2.len(), 16);
        assert_eq!(state.k.len(), 8);
        assert_eq!(state.att.len(), 6);
        assert_eq!(state.logits.len(), 4);
        assert_eq!(state.key_cache.layer(1).len(), 24);
        assert!(state.value_cache.layer(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn cache_slots_do_not_overlap() {
        let mut state = RunState::new(&config()).unwrap();

        state.key_cache.slot_mut(1, 2).fill(5.0);

        assert!(state.key_cache.slot(1, 2).iter().all(|&v| v == 5.0));
        assert!(state.key_cache.slot(1, 1).iter().all(|&v| v == 0.0));
        assert!(state.key_cache.slot(0, 2).iter().all(|&v| v == 0.0));
        assert_eq!(&state.key_cache.layer(1)[16..24], state.key_cache.slot(1, 2));
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut state = RunState::new(&config()).unwrap();
        state.x.fill(1.0);
        state.logits.fill(2.0);
        state.value_cache.slot_mut(0, 0).fill(3.0);

        state.reset();

        assert!(state.x.iter().all(|&v| v == 0.0));
        assert!(state.logits.iter().all(|&v| v == 0.0));
        assert!(state.value_cache.slot(0, 0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn impossible_allocation_is_reported() {
        let result = zeroed("huge", usize::MAX / 2);

        assert!(matches!(result, Err(InferenceError::Allocation { buffer: "huge", .. })));
    }
}
