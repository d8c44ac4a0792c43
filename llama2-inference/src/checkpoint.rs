use std::fs::File;
use std::path::Path;
use std::slice;

use crate::configuration::{HEADER_SIZE, ModelConfig, read_config};
use crate::error::{InferenceError, Result};
use crate::weights::WeightLayout;
use log::{debug, warn};
use memmap2::{Mmap, MmapMut, MmapOptions};

/// Memory-mapped checkpoint: a validated header followed by a flat f32 region.
///
/// The tensor region is never copied; [`Checkpoint::weights`] hands out a view
/// straight into the mapping, so the mapping must outlive every weight store
/// built on top of it.
pub struct Checkpoint {
    config: ModelConfig,
    layout: WeightLayout,
    mmap: Mmap,
}

impl Checkpoint {
    /// Opens and maps a checkpoint file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;

        // SAFETY: the mapping is read-only and the file is not expected to be
        // modified while the checkpoint is in use.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        debug!("mapped checkpoint {} ({} bytes)", path.display(), mmap.len());

        Self::from_mmap(mmap)
    }

    /// Builds a checkpoint from in-memory bytes.
    ///
    /// The bytes are copied once into an anonymous read-only mapping, which then
    /// backs the same zero-copy view as a file-based checkpoint.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // Fail early on a truncated or invalid header before allocating.
        read_config(bytes)?;

        let mut mmap = MmapMut::map_anon(bytes.len())?;
        mmap.copy_from_slice(bytes);

        Self::from_mmap(mmap.make_read_only()?)
    }

    fn from_mmap(mmap: Mmap) -> Result<Self> {
        if cfg!(target_endian = "big") {
            return Err(InferenceError::format("checkpoint tensors are little-endian f32"));
        }

        let config = read_config(&mmap)?;
        let layout = WeightLayout::new(&config)?;

        let expected = layout
            .len()
            .checked_mul(std::mem::size_of::<f32>())
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
            .ok_or_else(|| InferenceError::config("checkpoint size overflows"))?;

        if mmap.len() < expected {
            return Err(InferenceError::format(format!(
                "checkpoint too short: header implies {expected} bytes, got {}",
                mmap.len()
            )));
        }

        if mmap.len() > expected {
            warn!("checkpoint has {} trailing bytes after the last tensor", mmap.len() - expected);
        }

        let tensor_start = mmap[HEADER_SIZE..].as_ptr();
        if tensor_start.align_offset(std::mem::align_of::<f32>()) != 0 {
            return Err(InferenceError::format("tensor data is not aligned for f32 access"));
        }

        debug!("{config:?}");
        debug!("{layout:?}");

        Ok(Self { config, layout, mmap })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn layout(&self) -> &WeightLayout {
        &self.layout
    }

    /// Flat view over every tensor in file order.
    pub fn weights(&self) -> &[f32] {
        let byte_slice = &self.mmap[HEADER_SIZE..];

        // SAFETY: casting &[u8] to &[f32] is sound here because:
        // 1. the mapping holds at least `layout.len()` floats past the header (checked in from_mmap)
        // 2. the start of the tensor region is f32-aligned (checked in from_mmap)
        // 3. every bit pattern is a valid f32
        unsafe { slice::from_raw_parts(byte_slice.as_ptr() as *const f32, self.layout.len()) }
    }
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("config", &self.config)
            .field("bytes", &self.mmap.len())
            .finish()
    }
}
