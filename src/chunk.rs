//! The `Chunk` input record and the result enums it carries (spec.md §3).

/// Outcome of `MetadataOrchestrator::lookup` (address-present query).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    Hit,
    NotHit,
}

/// Outcome of `MetadataOrchestrator::dedup` (content-present query).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupResult {
    DupContent,
    NotDup,
}

/// Outcome of `Verification::verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationResult {
    Hit,
    Fail,
    Unknown,
}

/// One I/O request cut to the fixed chunk size, already fingerprinted by the
/// (out of scope) chunker/fingerprinter.
///
/// Mirrors `original_source`'s `Chunk`: a logical block address, the raw
/// 32-bit LBA/CA hashes the caller derived from it, the full fingerprint,
/// and the compressibility level assigned when the chunk was admitted.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Logical block address on the primary device.
    pub addr: u64,
    /// Length in bytes; a multiple of `Config::chunk_size`.
    pub len: u32,
    /// Raw 32-bit hash of `addr`, split into an LBA signature + bucket number.
    pub lba_hash: u32,
    /// Raw 32-bit hash of `fingerprint`, split into a CA signature + bucket number.
    pub ca_hash: u32,
    /// Cryptographic digest of the chunk's content (≥128 bit, spec.md §3).
    pub fingerprint: [u8; 20],
    /// 1 (highly compressible) .. 4 (incompressible); sets how many
    /// contiguous FP-Index slots the chunk occupies.
    pub compress_level: u8,

    pub lookup_result: Option<LookupResult>,
    pub dedup_result: Option<DedupResult>,
    pub verification_result: Option<VerificationResult>,
    /// The masked CA-hash found in the LBA Index on an address-present hit;
    /// points back into the FP Index for the content currently at `addr`.
    pub lba_pointer: Option<u64>,
    /// Cache-device byte offset of the chunk's content, once resolved via
    /// the FP Index.
    pub cache_loc: Option<u64>,
}

impl Chunk {
    pub fn new(addr: u64, len: u32, lba_hash: u32, ca_hash: u32, fingerprint: [u8; 20], compress_level: u8) -> Self {
        Chunk {
            addr,
            len,
            lba_hash,
            ca_hash,
            fingerprint,
            compress_level,
            lookup_result: None,
            dedup_result: None,
            verification_result: None,
            lba_pointer: None,
            cache_loc: None,
        }
    }
}
