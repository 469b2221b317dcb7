//! Error types for the cache metadata subsystem.
//!
//! Index operations themselves never fail (a full bucket evicts rather than
//! rejects); the failure surface is limited to configuration validation and
//! device I/O.

use thiserror::Error;

/// Errors that can cross the metadata subsystem's public boundary.
///
/// Both `CacheMiss` and a verification collision are deliberately absent
/// here: a miss is normal control flow, and a collision is local recovery
/// (erase the offending FP slot, continue as a miss) — both are reported
/// through `Chunk::lookup_result`/`dedup_result`/`verification_result`, not
/// an `Err` (spec.md §7).
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O failure: {0}")]
    IoFailure(#[from] anyhow::Error),

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
