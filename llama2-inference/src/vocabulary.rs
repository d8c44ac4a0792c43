//! Token id to display string lookup.
//!
//! The vocabulary file holds `vocab_size` entries, each a little-endian i32 byte
//! length followed by that many raw bytes. Decoding is lossy: entries that are
//! not valid UTF-8 are displayed with replacement characters.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{InferenceError, Result};
use byteorder::{LittleEndian, ReadBytesExt};

/// Vocabulary: each token is a byte sequence (not necessarily valid UTF-8)
pub struct Vocabulary {
    tokens: Vec<Vec<u8>>,
}

impl Vocabulary {
    /// Loads exactly `vocab_size` entries from a vocabulary file.
    pub fn load(path: impl AsRef<Path>, vocab_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), vocab_size)
    }

    pub fn from_reader<R: Read>(mut reader: R, vocab_size: usize) -> Result<Self> {
        let tokens = (0..vocab_size)
            .map(|token_id| read_entry(&mut reader, token_id))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Raw bytes of `token`.
    pub fn token_bytes(&self, token: usize) -> Result<&[u8]> {
        InferenceError::check_range("token", token, self.tokens.len())?;
        Ok(&self.tokens[token])
    }

    /// Display string of `token`.
    pub fn decode(&self, token: usize) -> Result<Cow<'_, str>> {
        self.token_bytes(token).map(String::from_utf8_lossy)
    }
}

fn read_entry<R: Read>(reader: &mut R, token_id: usize) -> Result<Vec<u8>> {
    let len = reader.read_i32::<LittleEndian>().map_err(|err| entry_error(err, token_id, "length"))?;

    let len = usize::try_from(len)
        .map_err(|_| InferenceError::format(format!("vocabulary entry {token_id} has negative length {len}")))?;

    // capacity follows the bytes present, not the length prefix
    let mut token_bytes = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut token_bytes)
        .map_err(|err| entry_error(err, token_id, "bytes"))?;

    if token_bytes.len() < len {
        return Err(InferenceError::format(format!(
            "vocabulary truncated while reading bytes of entry {token_id}: expected {len}, got {}",
            token_bytes.len()
        )));
    }

    Ok(token_bytes)
}

fn entry_error(err: std::io::Error, token_id: usize, part: &str) -> InferenceError {
    if err.kind() == ErrorKind::UnexpectedEof {
        InferenceError::format(format!("vocabulary truncated while reading {part} of entry {token_id}"))
    } else {
        InferenceError::Io(err)
    }
}

impl std::fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vocabulary").field("vocab_size", &self.tokens.len()).finish()
    }
}
