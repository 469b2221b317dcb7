//! Process-wide configuration, re-expressed as an explicit, owned
//! collaborator instead of the original's global singleton (see
//! `SPEC_FULL.md` component J).

use crate::error::CacheError;

/// Which replacement policy the FP Index buckets use.
///
/// Re-expressed as a tagged sum rather than a trait object: there are
/// exactly three variants and no third-party extension point (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CachePolicyKind {
    Lru,
    CaClock,
    GarbageAware,
}

/// Bucketized hash index configuration shared by the LBA Index and FP Index.
///
/// `signature_len + bucket_no_len` must not exceed 32 (the hash width the
/// chunker/fingerprinter produces, spec.md §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Chunk size in bytes; all chunk lengths are multiples of this.
    pub chunk_size: u32,
    /// Bits of an LBA hash kept as the in-bucket key.
    pub lba_signature_len: u32,
    /// Bits of an LBA hash used to select the bucket.
    pub lba_bucket_no_len: u32,
    /// Bits of a CA hash kept as the in-bucket key.
    pub ca_signature_len: u32,
    /// Bits of a CA hash used to select the bucket.
    pub ca_bucket_no_len: u32,
    /// Slots per bucket, both indices.
    pub n_slots_per_bucket: u32,
    /// Replacement policy used by FP Index buckets (the LBA Index always
    /// uses LRU, matching `original_source`'s `LBABucket`/`LRUExecutor`
    /// pairing: only the FP Index has the garbage-aware/CA-Clock choice).
    pub cache_policy_for_fp_index: CachePolicyKind,
    /// Number of pending dirty entries that triggers an asynchronous flush.
    pub dirty_list_threshold: usize,
}

impl Config {
    /// Bucket count implied by `lba_bucket_no_len`.
    pub fn n_lba_buckets(&self) -> u32 {
        1u32 << self.lba_bucket_no_len
    }

    /// Bucket count implied by `ca_bucket_no_len`.
    pub fn n_ca_buckets(&self) -> u32 {
        1u32 << self.ca_bucket_no_len
    }

    /// Width in bits of the value stored in an FP slot: the CA Index value
    /// is the compress level (spec.md §3, "FP slot").
    pub fn fp_value_bits(&self) -> u32 {
        2
    }

    /// Width in bits of the value stored in an LBA slot: the masked CA-hash
    /// (bucket number and signature together), wide enough for the FP
    /// Index to be re-entered directly without rehashing (spec.md §3,
    /// "LBA slot").
    pub fn lba_value_bits(&self) -> u32 {
        self.ca_signature_len + self.ca_bucket_no_len
    }

    /// Bytes occupied by one cache-device slot, derived from chunk size and
    /// the maximum compress level (4, spec.md §3 "Compress level").
    pub fn min_slot_bytes(&self) -> u32 {
        self.chunk_size / 4
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.lba_signature_len + self.lba_bucket_no_len > 32 {
            return Err(CacheError::ConfigurationInvalid(
                "lba_signature_len + lba_bucket_no_len must fit in 32 bits".into(),
            ));
        }
        if self.ca_signature_len + self.ca_bucket_no_len > 32 {
            return Err(CacheError::ConfigurationInvalid(
                "ca_signature_len + ca_bucket_no_len must fit in 32 bits".into(),
            ));
        }
        if self.n_slots_per_bucket == 0 {
            return Err(CacheError::ConfigurationInvalid(
                "n_slots_per_bucket must be > 0".into(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_size % 4 != 0 {
            return Err(CacheError::ConfigurationInvalid(
                "chunk_size must be a positive multiple of 4".into(),
            ));
        }
        if self.dirty_list_threshold == 0 {
            return Err(CacheError::ConfigurationInvalid(
                "dirty_list_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: 32 * 1024,
            lba_signature_len: 12,
            lba_bucket_no_len: 10,
            ca_signature_len: 12,
            ca_bucket_no_len: 10,
            n_slots_per_bucket: 8,
            cache_policy_for_fp_index: CachePolicyKind::Lru,
            dirty_list_threshold: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn overlong_signature_is_rejected() {
        let mut cfg = Config::default();
        cfg.lba_signature_len = 20;
        cfg.lba_bucket_no_len = 20;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_slots_rejected() {
        let mut cfg = Config::default();
        cfg.n_slots_per_bucket = 0;
        assert!(cfg.validate().is_err());
    }
}
