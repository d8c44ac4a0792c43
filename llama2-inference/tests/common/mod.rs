//! Synthetic checkpoints for integration tests.

#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;

/// Header of the toy model: dim=8, hidden_dim=16, n_layers=1, n_heads=2,
/// n_kv_heads=2, vocab_size=4, seq_len=4.
pub const TOY_HEADER: [i32; 7] = [8, 16, 1, 2, 2, 4, 4];

pub const DIM: usize = 8;
pub const HIDDEN_DIM: usize = 16;
pub const VOCAB_SIZE: usize = 4;
pub const SEQ_LEN: usize = 4;
pub const N_HEADS: usize = 2;
pub const HEAD_SIZE: usize = 4;

/// Every tensor of a checkpoint, in file order.
#[derive(Debug, Clone)]
pub struct ToyWeights {
    pub token_embedding_table: Vec<f32>,
    pub rms_att_weight: Vec<f32>,
    pub wq: Vec<f32>,
    pub wk: Vec<f32>,
    pub wv: Vec<f32>,
    pub wo: Vec<f32>,
    pub rms_ffn_weight: Vec<f32>,
    pub w1: Vec<f32>,
    pub w2: Vec<f32>,
    pub w3: Vec<f32>,
    pub rms_final_weight: Vec<f32>,
    pub freq_cis_real: Vec<f32>,
    pub freq_cis_imag: Vec<f32>,
    pub wcls: Option<Vec<f32>>,
}

/// Deterministic values in `[-scale, scale)` from a 64-bit LCG.
pub fn pseudo_random(seed: u64, len: usize, scale: f32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 2.0 * scale
        })
        .collect()
}

/// RoPE tables holding `cos/sin(pos * 10000^(-2i / head_size))`.
fn rope_tables() -> (Vec<f32>, Vec<f32>) {
    let half = HEAD_SIZE / 2;
    let angle = |pos: usize, i: usize| pos as f32 * 10000f32.powf(-2.0 * i as f32 / HEAD_SIZE as f32);
    let real = (0..SEQ_LEN * half).map(|j| angle(j / half, j % half).cos()).collect();
    let imag = (0..SEQ_LEN * half).map(|j| angle(j / half, j % half).sin()).collect();
    (real, imag)
}

pub fn identity(n: usize) -> Vec<f32> {
    (0..n * n).map(|i| if i / n == i % n { 1.0 } else { 0.0 }).collect()
}

impl ToyWeights {
    /// Hand-computable single-layer model.
    ///
    /// Embedding rows: `[1; 8]`, `[0.5; 8]`, `[-1; 8]`, `[0, .., 0, 2]`. Attention
    /// projections are identities, w1/w3 average the input, w2 averages the hidden
    /// state and the final norm weight is `[1, 2, .., 8]`. RoPE tables hold
    /// `cos/sin(pos * 10000^(-2i / head_size))`, so position 0 has zero phase.
    pub fn golden() -> Self {
        let mut token_embedding_table: Vec<f32> = Vec::with_capacity(VOCAB_SIZE * DIM);
        token_embedding_table.extend([1.0; DIM]);
        token_embedding_table.extend([0.5; DIM]);
        token_embedding_table.extend([-1.0; DIM]);
        token_embedding_table.extend([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0]);

        let (freq_cis_real, freq_cis_imag) = rope_tables();

        Self {
            token_embedding_table,
            rms_att_weight: vec![1.0; DIM],
            wq: identity(DIM),
            wk: identity(DIM),
            wv: identity(DIM),
            wo: identity(DIM),
            rms_ffn_weight: vec![1.0; DIM],
            w1: vec![1.0 / 8.0; HIDDEN_DIM * DIM],
            w2: vec![1.0 / 16.0; DIM * HIDDEN_DIM],
            w3: vec![1.0 / 8.0; HIDDEN_DIM * DIM],
            rms_final_weight: (1..=DIM).map(|i| i as f32).collect(),
            freq_cis_real,
            freq_cis_imag,
            wcls: None,
        }
    }

    /// Dense seeded weights, so attention scores differ across positions and heads.
    pub fn seeded(seed: u64) -> Self {
        let norm = |seed: u64| -> Vec<f32> { pseudo_random(seed, DIM, 0.25).into_iter().map(|v| 1.0 + v).collect() };
        let (freq_cis_real, freq_cis_imag) = rope_tables();

        Self {
            token_embedding_table: pseudo_random(seed, VOCAB_SIZE * DIM, 1.0),
            rms_att_weight: norm(seed + 1),
            wq: pseudo_random(seed + 2, DIM * DIM, 0.8),
            wk: pseudo_random(seed + 3, DIM * DIM, 0.8),
            wv: pseudo_random(seed + 4, DIM * DIM, 0.5),
            wo: pseudo_random(seed + 5, DIM * DIM, 0.5),
            rms_ffn_weight: norm(seed + 6),
            w1: pseudo_random(seed + 7, HIDDEN_DIM * DIM, 0.5),
            w2: pseudo_random(seed + 8, DIM * HIDDEN_DIM, 0.5),
            w3: pseudo_random(seed + 9, HIDDEN_DIM * DIM, 0.5),
            rms_final_weight: norm(seed + 10),
            freq_cis_real,
            freq_cis_imag,
            wcls: None,
        }
    }

    /// Checkpoint bytes: little-endian header followed by the tensors.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut header = TOY_HEADER;
        if self.wcls.is_some() {
            header[5] = -header[5];
        }

        let tensors = [
            &self.token_embedding_table,
            &self.rms_att_weight,
            &self.wq,
            &self.wk,
            &self.wv,
            &self.wo,
            &self.rms_ffn_weight,
            &self.w1,
            &self.w2,
            &self.w3,
            &self.rms_final_weight,
            &self.freq_cis_real,
            &self.freq_cis_imag,
        ];

        header
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .chain(tensors.into_iter().chain(self.wcls.as_ref()).flatten().flat_map(|v| v.to_le_bytes()))
            .collect()
    }
}

pub fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}

/// Vocabulary file bytes in the length-prefixed format.
pub fn vocabulary_bytes(entries: &[&str]) -> Vec<u8> {
    entries
        .iter()
        .flat_map(|entry| (entry.len() as i32).to_le_bytes().into_iter().chain(entry.bytes()))
        .collect()
}
