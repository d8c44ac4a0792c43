use std::ops::Range;

use crate::checkpoint::Checkpoint;
use crate::configuration::{ModelConfig, checked_len};
use crate::error::{InferenceError, Result};

/// Location of one named tensor inside the flat checkpoint region, in f32 elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorView {
    pub offset: usize,
    pub len: usize,
}

impl TensorView {
    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Range of the `index`-th equally sized slice of this tensor.
    fn slice_range(&self, index: usize, count: usize) -> Range<usize> {
        let stride = self.len / count;
        let start = self.offset + index * stride;
        start..start + stride
    }
}

/// Offsets of every tensor in checkpoint order, computed once from the config.
///
/// Order: token embeddings, attention norms, wq, wk, wv, wo, ffn norms, w1, w2, w3,
/// final norm, RoPE real/imag tables and, for untied weights only, the classifier.
#[derive(Debug, Clone, Copy)]
pub struct WeightLayout {
    pub token_embedding_table: TensorView,
    pub rms_att_weight: TensorView,
    pub wq: TensorView,
    pub wk: TensorView,
    pub wv: TensorView,
    pub wo: TensorView,
    pub rms_ffn_weight: TensorView,
    pub w1: TensorView,
    pub w2: TensorView,
    pub w3: TensorView,
    pub rms_final_weight: TensorView,
    pub freq_cis_real: TensorView,
    pub freq_cis_imag: TensorView,
    pub wcls: Option<TensorView>,
    total_len: usize,
}

impl WeightLayout {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let ModelConfig { dim, hidden_dim, n_layers, vocab_size, seq_len, head_size, shared_classifier, .. } = *config;

        let mut offset = 0usize;
        let mut next = |what: &str, factors: &[usize]| -> Result<TensorView> {
            let len = checked_len(what, factors)?;
            let view = TensorView { offset, len };
            offset = offset
                .checked_add(len)
                .ok_or_else(|| InferenceError::config(format!("offset of {what} overflows")))?;
            Ok(view)
        };

        let token_embedding_table = next("token embedding table", &[vocab_size, dim])?;
        let rms_att_weight = next("attention norm weights", &[n_layers, dim])?;
        let wq = next("wq", &[n_layers, dim, dim])?;
        let wk = next("wk", &[n_layers, dim, dim])?;
        let wv = next("wv", &[n_layers, dim, dim])?;
        let wo = next("wo", &[n_layers, dim, dim])?;
        let rms_ffn_weight = next("ffn norm weights", &[n_layers, dim])?;
        let w1 = next("w1", &[n_layers, hidden_dim, dim])?;
        let w2 = next("w2", &[n_layers, dim, hidden_dim])?;
        let w3 = next("w3", &[n_layers, hidden_dim, dim])?;
        let rms_final_weight = next("final norm weights", &[dim])?;
        let freq_cis_real = next("freq_cis_real", &[seq_len, head_size / 2])?;
        let freq_cis_imag = next("freq_cis_imag", &[seq_len, head_size / 2])?;
        let wcls = if shared_classifier { None } else { Some(next("classifier", &[vocab_size, dim])?) };

        Ok(Self {
            token_embedding_table,
            rms_att_weight,
            wq,
            wk,
            wv,
            wo,
            rms_ffn_weight,
            w1,
            w2,
            w3,
            rms_final_weight,
            freq_cis_real,
            freq_cis_imag,
            wcls,
            total_len: offset,
        })
    }

    /// Total number of f32 values the layout spans.
    pub fn len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }
}

/// Per-layer weights borrowed from the checkpoint.
///
/// Projection matrices are output-feature-major: `(out_dim, in_dim)` row-major.
#[derive(Debug, Clone, Copy)]
pub struct LayerWeights<'a> {
    pub rms_att_weight: &'a [f32],
    pub wq: &'a [f32],
    pub wk: &'a [f32],
    pub wv: &'a [f32],
    pub wo: &'a [f32],
    pub rms_ffn_weight: &'a [f32],
    pub w1: &'a [f32],
    pub w2: &'a [f32],
    pub w3: &'a [f32],
}

/// Read-only, zero-copy set of named tensor views over a checkpoint.
#[derive(Clone, Copy)]
pub struct WeightStore<'a> {
    config: ModelConfig,
    layout: WeightLayout,
    data: &'a [f32],
}

impl<'a> WeightStore<'a> {
    pub fn new(checkpoint: &'a Checkpoint) -> Self {
        Self { config: *checkpoint.config(), layout: *checkpoint.layout(), data: checkpoint.weights() }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Weights of layer `layer` in `[0, n_layers)`.
    pub fn layer(&self, layer: usize) -> Result<LayerWeights<'a>> {
        InferenceError::check_range("layer", layer, self.config.n_layers)?;

        let n_layers = self.config.n_layers;
        let slice = |view: &TensorView| self.tensor(view.slice_range(layer, n_layers));

        Ok(LayerWeights {
            rms_att_weight: slice(&self.layout.rms_att_weight),
            wq: slice(&self.layout.wq),
            wk: slice(&self.layout.wk),
            wv: slice(&self.layout.wv),
            wo: slice(&self.layout.wo),
            rms_ffn_weight: slice(&self.layout.rms_ffn_weight),
            w1: slice(&self.layout.w1),
            w2: slice(&self.layout.w2),
            w3: slice(&self.layout.w3),
        })
    }

    /// Token embedding table, shape `(vocab_size, dim)`.
    pub fn token_embedding_table(&self) -> &'a [f32] {
        self.tensor(self.layout.token_embedding_table.range())
    }

    pub fn rms_final_weight(&self) -> &'a [f32] {
        self.tensor(self.layout.rms_final_weight.range())
    }

    /// RoPE table row for `pos`: `(real, imag)`, each `head_size / 2` long.
    pub fn freq_cis(&self, pos: usize) -> (&'a [f32], &'a [f32]) {
        let seq_len = self.config.seq_len;
        let real = self.tensor(self.layout.freq_cis_real.slice_range(pos, seq_len));
        let imag = self.tensor(self.layout.freq_cis_imag.slice_range(pos, seq_len));
        (real, imag)
    }

    /// Classifier projection, shape `(vocab_size, dim)`.
    ///
    /// With tied weights this is the embedding table itself.
    pub fn classifier(&self) -> &'a [f32] {
        match &self.layout.wcls {
            Some(wcls) => self.tensor(wcls.range()),
            None => self.token_embedding_table(),
        }
    }

    fn tensor(&self, range: Range<usize>) -> &'a [f32] {
        let data: &'a [f32] = self.data;
        &data[range]
    }
}

impl std::fmt::Debug for WeightStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightStore")
            .field("n_layers", &self.config.n_layers)
            .field("floats", &self.layout.len())
            .field("shared_classifier", &self.layout.wcls.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_checkpoint_order() {
        let config = ModelConfig::from_header([8, 16, 2, 2, 2, 4, 4]).unwrap();
        let layout = WeightLayout::new(&config).unwrap();

        assert_eq!(layout.token_embedding_table, TensorView { offset: 0, len: 32 });
        assert_eq!(layout.rms_att_weight, TensorView { offset: 32, len: 16 });
        assert_eq!(layout.wq, TensorView { offset: 48, len: 128 });
        assert_eq!(layout.wk.offset, 176);
        assert_eq!(layout.wv.offset, 304);
        assert_eq!(layout.wo.offset, 432);
        assert_eq!(layout.rms_ffn_weight, TensorView { offset: 560, len: 16 });
        assert_eq!(layout.w1, TensorView { offset: 576, len: 256 });
        assert_eq!(layout.w2.offset, 832);
        assert_eq!(layout.w3.offset, 1088);
        assert_eq!(layout.rms_final_weight, TensorView { offset: 1344, len: 8 });
        assert_eq!(layout.freq_cis_real, TensorView { offset: 1352, len: 8 });
        assert_eq!(layout.freq_cis_imag, TensorView { offset: 1360, len: 8 });
        assert_eq!(layout.wcls, None);
        assert_eq!(layout.len(), 1368);
    }

    #[test]
    fn untied_layout_appends_classifier() {
        let config = ModelConfig::from_header([8, 16, 2, 2, 2, -4, 4]).unwrap();
        let layout = WeightLayout::new(&config).unwrap();

        assert_eq!(layout.wcls, Some(TensorView { offset: 1368, len: 32 }));
        assert_eq!(layout.len(), 1400);
    }

    #[test]
    fn slice_range_splits_layer_major() {
        let view = TensorView { offset: 10, len: 12 };

        assert_eq!(view.slice_range(0, 3), 10..14);
        assert_eq!(view.slice_range(2, 3), 18..22);
    }
}
