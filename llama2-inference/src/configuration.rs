use std::io::Cursor;

use crate::error::{InferenceError, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

/// Number of i32 fields in the checkpoint header.
const CONFIG_FIELDS: usize = 7;
/// Size of the checkpoint header in bytes
pub const HEADER_SIZE: usize = CONFIG_FIELDS * std::mem::size_of::<i32>();

/// Configuration struct for transformer models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    pub dim: usize,
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub n_kv_heads: usize,
    pub vocab_size: usize,
    pub seq_len: usize,
    pub head_size: usize,
    /// Classifier reuses the token embedding table (positive raw vocab size).
    pub shared_classifier: bool,
}

/// Header values exactly as stored in the checkpoint.
#[derive(Debug, Clone, Copy)]
struct RawConfig {
    dim: i32,
    hidden_dim: i32,
    n_layers: i32,
    n_heads: i32,
    n_kv_heads: i32,
    vocab_size: i32,
    seq_len: i32,
}

impl TryFrom<RawConfig> for ModelConfig {
    type Error = InferenceError;

    fn try_from(raw: RawConfig) -> Result<ModelConfig> {
        validate_config(&raw)?;

        let dim = raw.dim as usize;
        let n_heads = raw.n_heads as usize;

        Ok(ModelConfig {
            dim,
            hidden_dim: raw.hidden_dim as usize,
            n_layers: raw.n_layers as usize,
            n_heads,
            n_kv_heads: raw.n_kv_heads as usize,
            vocab_size: raw.vocab_size.unsigned_abs() as usize,
            seq_len: raw.seq_len as usize,
            head_size: dim / n_heads,
            shared_classifier: raw.vocab_size > 0,
        })
    }
}

impl ModelConfig {
    /// Builds a validated config from header values in file order:
    /// `dim, hidden_dim, n_layers, n_heads, n_kv_heads, vocab_size, seq_len`.
    pub fn from_header(values: [i32; CONFIG_FIELDS]) -> Result<Self> {
        let [dim, hidden_dim, n_layers, n_heads, n_kv_heads, vocab_size, seq_len] = values;
        RawConfig { dim, hidden_dim, n_layers, n_heads, n_kv_heads, vocab_size, seq_len }.try_into()
    }
}

/// Reads and validates the model configuration from the checkpoint header.
///
/// The configuration is stored as 7 consecutive i32 values in little-endian format.
/// A negative vocabulary size marks an untied classifier tensor.
pub fn read_config(data: &[u8]) -> Result<ModelConfig> {
    if data.len() < HEADER_SIZE {
        return Err(InferenceError::format(format!(
            "insufficient data for header: need {HEADER_SIZE} bytes, got {}",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

    macro_rules! read_i32 {
        ($field:literal) => {
            cursor
                .read_i32::<LittleEndian>()
                .map_err(|err| InferenceError::format(format!("failed to read {}: {err}", $field)))?
        };
    }

    let raw = RawConfig {
        dim: read_i32!("dimension"),
        hidden_dim: read_i32!("hidden dimension"),
        n_layers: read_i32!("number of layers"),
        n_heads: read_i32!("number of heads"),
        n_kv_heads: read_i32!("number of KV heads"),
        vocab_size: read_i32!("vocabulary size"),
        seq_len: read_i32!("sequence length"),
    };

    debug!("{raw:?}");

    raw.try_into()
}

/// Validates the model configuration to ensure it's supported.
fn validate_config(config: &RawConfig) -> Result<()> {
    let dimensions = [
        ("dim", config.dim),
        ("hidden_dim", config.hidden_dim),
        ("n_layers", config.n_layers),
        ("n_heads", config.n_heads),
        ("n_kv_heads", config.n_kv_heads),
        ("seq_len", config.seq_len),
    ];

    for (name, value) in dimensions {
        if value <= 0 {
            return Err(InferenceError::config(format!("invalid {name}: must be positive, got {value}")));
        }
    }

    if config.vocab_size == 0 || config.vocab_size == i32::MIN {
        return Err(InferenceError::config(format!("invalid vocab_size: {}", config.vocab_size)));
    }

    if config.dim % config.n_heads != 0 {
        return Err(InferenceError::config(format!(
            "dim {} is not divisible by n_heads {}",
            config.dim, config.n_heads
        )));
    }

    let head_size = config.dim / config.n_heads;
    if head_size % 2 != 0 {
        return Err(InferenceError::config(format!("head size {head_size} must be even for rotary embedding")));
    }

    if config.n_kv_heads > config.n_heads {
        return Err(InferenceError::config(format!(
            "n_kv_heads {} exceeds n_heads {}",
            config.n_kv_heads, config.n_heads
        )));
    }

    Ok(())
}

/// Multiplies buffer dimensions, failing instead of wrapping on overflow.
pub(crate) fn checked_len(what: &str, factors: &[usize]) -> Result<usize> {
    factors
        .iter()
        .try_fold(1usize, |acc, &factor| acc.checked_mul(factor))
        .ok_or_else(|| InferenceError::config(format!("size of {what} overflows: {factors:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(values: [i32; CONFIG_FIELDS]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Header values as they would be written to a checkpoint.
    fn to_header(config: &ModelConfig) -> [i32; CONFIG_FIELDS] {
        let field = |value: usize| i32::try_from(value).unwrap();
        let vocab_size = field(config.vocab_size);
        [
            field(config.dim),
            field(config.hidden_dim),
            field(config.n_layers),
            field(config.n_heads),
            field(config.n_kv_heads),
            if config.shared_classifier { vocab_size } else { -vocab_size },
            field(config.seq_len),
        ]
    }

    #[test]
    fn reads_shared_classifier_config() {
        let config = read_config(&header_bytes([8, 16, 1, 2, 2, 4, 4])).unwrap();

        assert_eq!(config.dim, 8);
        assert_eq!(config.hidden_dim, 16);
        assert_eq!(config.n_layers, 1);
        assert_eq!(config.n_heads, 2);
        assert_eq!(config.n_kv_heads, 2);
        assert_eq!(config.vocab_size, 4);
        assert_eq!(config.seq_len, 4);
        assert_eq!(config.head_size, 4);
        assert!(config.shared_classifier);
    }

    #[test]
    fn negative_vocab_size_marks_untied_classifier() {
        let config = read_config(&header_bytes([8, 16, 1, 2, 2, -32, 4])).unwrap();

        assert_eq!(config.vocab_size, 32);
        assert!(!config.shared_classifier);
        assert_eq!(to_header(&config), [8, 16, 1, 2, 2, -32, 4]);
    }

    #[test]
    fn short_header_is_format_error() {
        let result = read_config(&[0u8; HEADER_SIZE - 1]);

        assert!(matches!(result, Err(InferenceError::Format(_))));
    }

    #[test]
    fn rejects_invalid_dimensions() {
        let cases = [
            [0, 16, 1, 2, 2, 4, 4],  // zero dim
            [8, -1, 1, 2, 2, 4, 4],  // negative hidden_dim
            [8, 16, 1, 3, 3, 4, 4],  // dim not divisible by n_heads
            [6, 16, 1, 2, 2, 4, 4],  // odd head size
            [8, 16, 1, 2, 4, 4, 4],  // more kv heads than heads
            [8, 16, 1, 2, 2, 0, 4],  // zero vocab
            [8, 16, 1, 2, 2, 4, 0],  // zero seq_len
        ];

        for values in cases {
            let result = ModelConfig::from_header(values);
            assert!(matches!(result, Err(InferenceError::Config(_))), "expected config error for {values:?}");
        }
    }

    #[test]
    fn checked_len_detects_overflow() {
        assert_eq!(checked_len("cache", &[2, 3, 4]).unwrap(), 24);
        assert!(matches!(checked_len("cache", &[usize::MAX, 2]), Err(InferenceError::Config(_))));
    }
}
