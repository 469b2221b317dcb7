//! Compressibility assessment: how many contiguous FP-Index slots a chunk
//! should occupy (spec.md §3, "Compress level"; §6).
//!
//! Grounded on the teacher's direct use of the `zstd` crate for backup
//! blob compression — this crate reuses the same dependency rather than
//! hand-rolling an estimator.

use anyhow::Result;

/// Scores how compressible a chunk's content is, returning a level in
/// `1..=4` (1 = highly compressible, occupies one slot; 4 = incompressible,
/// occupies four).
pub trait CompressionModule: Send + Sync {
    fn compress_level(&self, data: &[u8]) -> Result<u8>;
}

/// Compresses with `zstd` at a low level and buckets the ratio into one of
/// four levels. Only the ratio matters here, not the compressed bytes
/// themselves (spec.md §3 treats `compress_level` as purely a slot-count
/// hint).
pub struct ZstdCompressionModule {
    level: i32,
}

impl ZstdCompressionModule {
    pub fn new() -> Self {
        ZstdCompressionModule { level: 1 }
    }
}

impl Default for ZstdCompressionModule {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionModule for ZstdCompressionModule {
    fn compress_level(&self, data: &[u8]) -> Result<u8> {
        if data.is_empty() {
            return Ok(4);
        }
        let compressed = zstd::encode_all(data, self.level)?;
        let ratio = compressed.len() as f64 / data.len() as f64;
        let level = if ratio < 0.25 {
            1
        } else if ratio < 0.5 {
            2
        } else if ratio < 0.85 {
            3
        } else {
            4
        };
        Ok(level)
    }
}
