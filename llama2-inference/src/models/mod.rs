use crate::configuration::ModelConfig;
use crate::error::Result;

mod llama2;

pub use llama2::{Llama2Transformer, Llama2TransformerBlock};

/// Contains the main inference logic for the Transformer model.
pub trait Transformer {
    /// Runs forward pass for `token` at `pos`, returning the logits.
    ///
    /// Fails with a range error if `token >= vocab_size` or `pos >= seq_len`.
    fn forward(&mut self, token: usize, pos: usize) -> Result<&[f32]>;

    fn get_config(&self) -> &ModelConfig;
}
