//! On-device metadata verification: detects bucket-signature collisions
//! by re-checking the full fingerprint against what's actually stored at
//! a cache location (spec.md §4.I).
//!
//! The FP Index only ever stores a truncated signature (space budget,
//! spec.md §3), so two different fingerprints can land on the same
//! signature in the same bucket. Verification is the backstop: every
//! admission writes the full fingerprint alongside the cached content,
//! and every hit re-reads and compares it.

use crate::chunk::VerificationResult;
use crate::io::{Device, IoModule};

pub const VERIFICATION_STRIPE_BYTES: u32 = 20;

pub struct Verification<'a> {
    io: &'a dyn IoModule,
}

impl<'a> Verification<'a> {
    pub fn new(io: &'a dyn IoModule) -> Self {
        Verification { io }
    }

    /// Record the full fingerprint for content just admitted at `cache_loc`.
    pub fn write_stripe(&self, cache_loc: u64, fingerprint: &[u8; 20]) -> anyhow::Result<()> {
        self.io.write(Device::Cache, cache_loc, fingerprint)
    }

    /// Compare what's actually at `cache_loc` against the fingerprint an
    /// index lookup expected. `Unknown` covers I/O failure and an all-zero
    /// (never-written) stripe; callers should treat it as a miss rather
    /// than a verified hit, without raising `VerificationCollision`.
    pub fn verify(&self, cache_loc: u64, expected_fingerprint: &[u8; 20]) -> VerificationResult {
        let buf = match self.io.read(Device::Cache, cache_loc, VERIFICATION_STRIPE_BYTES) {
            Ok(buf) if buf.len() == VERIFICATION_STRIPE_BYTES as usize => buf,
            _ => return VerificationResult::Unknown,
        };

        if buf == expected_fingerprint {
            VerificationResult::Hit
        } else if buf.iter().all(|&b| b == 0) {
            VerificationResult::Unknown
        } else {
            VerificationResult::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryIoModule;

    #[test]
    fn stripe_round_trips() {
        let io = MemoryIoModule::new(4096, 4096);
        let v = Verification::new(&io);
        let fp = [7u8; 20];
        v.write_stripe(256, &fp).unwrap();
        assert_eq!(v.verify(256, &fp), VerificationResult::Hit);
    }

    #[test]
    fn mismatched_stripe_is_a_collision() {
        let io = MemoryIoModule::new(4096, 4096);
        let v = Verification::new(&io);
        v.write_stripe(256, &[7u8; 20]).unwrap();
        assert_eq!(v.verify(256, &[8u8; 20]), VerificationResult::Fail);
    }

    #[test]
    fn never_written_stripe_is_unknown() {
        let io = MemoryIoModule::new(4096, 4096);
        let v = Verification::new(&io);
        assert_eq!(v.verify(3000, &[1u8; 20]), VerificationResult::Unknown);
    }
}
