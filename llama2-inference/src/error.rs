//! Error types for the inference core.

use thiserror::Error;

/// Result type alias for inference operations.
pub type Result<T> = std::result::Result<T, InferenceError>;

/// Errors surfaced by the inference core.
///
/// Every error is fatal for the current run: nothing in the core retries.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Checkpoint or vocabulary source cannot be opened or read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Source is shorter than its header implies, or an entry is malformed.
    #[error("format error: {0}")]
    Format(String),

    /// Model or run parameters violate the configuration invariants.
    #[error("config error: {0}")]
    Config(String),

    /// Token id or position outside of the model limits.
    #[error("{what} {value} is out of range (must be below {limit})")]
    Range { what: &'static str, value: usize, limit: usize },

    /// Scratch or cache buffer could not be allocated.
    #[error("failed to allocate {len} elements for {buffer}")]
    Allocation { buffer: &'static str, len: usize },
}

impl InferenceError {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Checks `value < limit`, reporting a [`InferenceError::Range`] otherwise.
    pub(crate) fn check_range(what: &'static str, value: usize, limit: usize) -> Result<()> {
        if value < limit { Ok(()) } else { Err(Self::Range { what, value, limit }) }
    }
}
