//! Metadata orchestrator: wires the LBA Index, FP Index, dirty list and
//! verification together behind the three request-phase entry points
//! (spec.md §4.G).
//!
//! Collaborators are passed in at construction rather than reached through
//! process-wide globals (spec.md §9), so a test can spin up as many
//! independent caches as it likes.

use std::sync::Arc;

use crate::chunk::{Chunk, DedupResult, LookupResult, VerificationResult};
use crate::compression::CompressionModule;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::io::IoModule;
use crate::manage::DirtyList;

use super::fp_index::FpIndex;
use super::lba_index::LbaIndex;
use super::verification::Verification;

pub struct MetadataOrchestrator {
    lba_index: LbaIndex,
    fp_index: FpIndex,
    dirty_list: DirtyList,
    io: Arc<dyn IoModule>,
    compression: Box<dyn CompressionModule>,
    config: Config,
    verify_on_hit: bool,
}

impl MetadataOrchestrator {
    pub fn new(config: Config, io: Arc<dyn IoModule>, compression: Box<dyn CompressionModule>) -> Result<Self> {
        config.validate()?;
        let lba_index = LbaIndex::new(&config);
        let fp_index = FpIndex::new(&config);
        let dirty_list = DirtyList::new(&config, Arc::clone(&io));
        Ok(MetadataOrchestrator {
            lba_index,
            fp_index,
            dirty_list,
            io,
            compression,
            config,
            verify_on_hit: true,
        })
    }

    /// Disables on-device verification, trusting every signature match as a
    /// true hit. Matches the "duplicate-by-signature benchmark" mode
    /// spec.md §4.I calls out.
    pub fn without_verification(mut self) -> Self {
        self.verify_on_hit = false;
        self
    }

    fn verification(&self) -> Verification<'_> {
        Verification::new(&*self.io)
    }

    /// Content-present query: does `chunk.fingerprint` already have a home
    /// in the FP Index, keyed purely by content rather than address?
    pub fn dedup(&self, chunk: &mut Chunk) -> Result<()> {
        match self.fp_index.lookup(chunk.ca_hash) {
            None => {
                chunk.dedup_result = Some(DedupResult::NotDup);
            }
            Some(found) => {
                let verdict = self.check_hit(found.cache_loc, &chunk.fingerprint, chunk.ca_hash);
                if let Some(v) = verdict {
                    chunk.verification_result = Some(v);
                }
                if matches!(verdict, None | Some(VerificationResult::Hit)) {
                    chunk.dedup_result = Some(DedupResult::DupContent);
                    chunk.cache_loc = Some(found.cache_loc);
                    chunk.compress_level = found.compress_level;
                } else {
                    chunk.dedup_result = Some(DedupResult::NotDup);
                }
            }
        }
        Ok(())
    }

    /// Address-present query: read path before fetching content. Resolves
    /// `chunk.addr` via the LBA Index, then the FP Index.
    pub fn lookup(&self, chunk: &mut Chunk) -> Result<()> {
        let fp_index = &self.fp_index;
        let lba_pointer = self.lba_index.lookup(chunk.lba_hash, |ca| fp_index.contains(ca));
        let Some(ptr) = lba_pointer else {
            chunk.lookup_result = Some(LookupResult::NotHit);
            return Ok(());
        };
        chunk.lba_pointer = Some(ptr);

        let Some(found) = self.fp_index.lookup(ptr as u32) else {
            // The LBA pointer outlived its FP entry (a race with a
            // concurrent reclaim); report a miss rather than erroring.
            chunk.lookup_result = Some(LookupResult::NotHit);
            return Ok(());
        };

        let verdict = self.check_hit(found.cache_loc, &chunk.fingerprint, ptr as u32);
        if let Some(v) = verdict {
            chunk.verification_result = Some(v);
        }
        if matches!(verdict, None | Some(VerificationResult::Hit)) {
            chunk.lookup_result = Some(LookupResult::Hit);
            chunk.cache_loc = Some(found.cache_loc);
            chunk.compress_level = found.compress_level;
        } else {
            chunk.lookup_result = Some(LookupResult::NotHit);
        }
        Ok(())
    }

    /// Runs verification (if enabled) for a suspected FP hit at `cache_loc`,
    /// returning `None` when verification is disabled (the signature match
    /// is trusted outright, spec.md §4.I "duplicate-by-signature
    /// benchmarks") or `Some(outcome)` otherwise. On `Fail` — a genuine
    /// signature collision — the offending FP entry is erased and the
    /// caller treats this as a miss rather than an error (spec.md §4.G,
    /// §7: "the request proceeds as a miss").
    fn check_hit(&self, cache_loc: u64, fingerprint: &[u8; 20], ca_hash: u32) -> Option<VerificationResult> {
        if !self.verify_on_hit {
            return None;
        }
        let outcome = self.verification().verify(cache_loc, fingerprint);
        if outcome == VerificationResult::Fail {
            log::warn!("verification collision at cache_loc {}, erasing FP entry", cache_loc);
            self.fp_index.invalidate(ca_hash);
        }
        Some(outcome)
    }

    /// Commit path: land `chunk`'s content in the cache and update both
    /// indices. Callers normally run `dedup` first so `chunk.dedup_result`
    /// reflects whether this is new content or a content-address hit; if
    /// it's a hit, the existing FP entry is referenced rather than
    /// re-admitted.
    pub fn update(&self, chunk: &mut Chunk) -> Result<()> {
        let ca_hash_masked = chunk.ca_hash as u64;
        let old_fp = self.lba_index.update(chunk.lba_hash, ca_hash_masked, |ca| self.fp_index.contains(ca));
        if let Some(old) = old_fp {
            if old != ca_hash_masked {
                self.fp_index.dereference(old as u32);
            }
        }

        let is_dedup_hit = matches!(chunk.dedup_result, Some(DedupResult::DupContent));
        let cache_loc = if is_dedup_hit {
            self.fp_index.reference(chunk.ca_hash);
            chunk.cache_loc.expect("dedup hit must have resolved a cache_loc")
        } else {
            let admission = self.fp_index.admit(chunk.ca_hash, chunk.compress_level);
            for (evicted_loc, evicted_len) in admission.evicted {
                self.dirty_list.flush_on_eviction(evicted_loc, evicted_len, self.config.min_slot_bytes());
            }
            self.verification().write_stripe(admission.cache_loc, &chunk.fingerprint)?;
            admission.cache_loc
        };

        chunk.cache_loc = Some(cache_loc);
        self.dirty_list.add_latest_update(chunk.addr, cache_loc, chunk.len);
        Ok(())
    }

    /// Scores a chunk's content for compressibility, setting
    /// `chunk.compress_level` before `update` admits it. Not invoked by
    /// `update` itself so callers can skip it on a dedup hit.
    pub fn assess_compressibility(&self, chunk: &mut Chunk, data: &[u8]) -> Result<()> {
        chunk.compress_level = self.compression.compress_level(data).map_err(CacheError::IoFailure)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::compression::ZstdCompressionModule;
    use crate::config::CachePolicyKind;
    use crate::io::MemoryIoModule;

    fn config() -> Config {
        let mut c = Config::default();
        c.chunk_size = 16;
        c.n_slots_per_bucket = 8;
        c.lba_bucket_no_len = 2;
        c.lba_signature_len = 12;
        c.ca_bucket_no_len = 2;
        c.ca_signature_len = 12;
        c.dirty_list_threshold = 1000; // keep writes pending for inspection
        c
    }

    fn orchestrator(policy: CachePolicyKind) -> MetadataOrchestrator {
        let mut c = config();
        c.cache_policy_for_fp_index = policy;
        let io: Arc<dyn IoModule> = Arc::new(MemoryIoModule::new(1 << 20, 1 << 20));
        MetadataOrchestrator::new(c, io, Box::new(ZstdCompressionModule::new())).unwrap()
    }

    fn chunk(addr: u64, lba_hash: u32, ca_hash: u32, fp_byte: u8) -> Chunk {
        Chunk::new(addr, 16, lba_hash, ca_hash, [fp_byte; 20], 1)
    }

    #[test]
    fn pure_dup_scenario() {
        let orch = orchestrator(CachePolicyKind::Lru);
        let mut c1 = chunk(0, 0x100, 0x200, 0xAA);
        orch.dedup(&mut c1).unwrap();
        assert_eq!(c1.dedup_result, Some(DedupResult::NotDup));
        orch.update(&mut c1).unwrap();

        let mut c2 = chunk(1, 0x101, 0x200, 0xAA); // same content, different addr
        orch.dedup(&mut c2).unwrap();
        assert_eq!(c2.dedup_result, Some(DedupResult::DupContent));
        assert_eq!(c2.cache_loc, c1.cache_loc);
    }

    #[test]
    fn update_then_lookup_hits_at_the_same_location() {
        let orch = orchestrator(CachePolicyKind::Lru);
        let mut c = chunk(5, 0x55, 0x77, 0x42);
        orch.dedup(&mut c).unwrap();
        orch.update(&mut c).unwrap();
        let written_loc = c.cache_loc.unwrap();

        let mut read_back = chunk(5, 0x55, 0x77, 0x42);
        orch.lookup(&mut read_back).unwrap();
        assert_eq!(read_back.lookup_result, Some(LookupResult::Hit));
        assert_eq!(read_back.cache_loc, Some(written_loc));
    }

    #[test]
    fn lookup_before_any_update_is_a_miss() {
        let orch = orchestrator(CachePolicyKind::Lru);
        let mut c = chunk(9, 0x9, 0x9, 0x1);
        orch.lookup(&mut c).unwrap();
        assert_eq!(c.lookup_result, Some(LookupResult::NotHit));
    }

    #[test]
    fn stale_lba_is_cleared_after_fp_entry_is_gone() {
        let orch = orchestrator(CachePolicyKind::Lru);
        let mut c = chunk(2, 0x22, 0x33, 0x9);
        orch.dedup(&mut c).unwrap();
        orch.update(&mut c).unwrap();

        orch.fp_index.invalidate(0x33);

        let mut read_back = chunk(2, 0x22, 0x33, 0x9);
        orch.lookup(&mut read_back).unwrap();
        assert_eq!(read_back.lookup_result, Some(LookupResult::NotHit));
    }

    #[test]
    fn verification_collision_erases_the_fp_slot_and_reports_a_miss() {
        let orch = orchestrator(CachePolicyKind::Lru);
        let mut c = chunk(3, 0x3, 0x3, 0x5);
        orch.dedup(&mut c).unwrap();
        orch.update(&mut c).unwrap();

        // a different fingerprint sharing the same truncated signature
        let mut colliding = chunk(3, 0x3, 0x3, 0x6);
        colliding.lba_pointer = Some(0x3);
        orch.lookup(&mut colliding).unwrap();
        assert_eq!(colliding.lookup_result, Some(LookupResult::NotHit));
        assert_eq!(colliding.verification_result, Some(crate::chunk::VerificationResult::Fail));
        assert!(!orch.fp_index.contains(0x3));
    }

    #[test]
    fn verified_hit_records_verification_result() {
        let orch = orchestrator(CachePolicyKind::Lru);
        let mut c = chunk(7, 0x77, 0x88, 0x11);
        orch.dedup(&mut c).unwrap();
        orch.update(&mut c).unwrap();

        let mut read_back = chunk(7, 0x77, 0x88, 0x11);
        orch.lookup(&mut read_back).unwrap();
        assert_eq!(read_back.verification_result, Some(crate::chunk::VerificationResult::Hit));
    }

    #[test]
    fn disabled_verification_leaves_verification_result_unset() {
        let mut c_cfg = config();
        c_cfg.cache_policy_for_fp_index = CachePolicyKind::Lru;
        let io: Arc<dyn IoModule> = Arc::new(MemoryIoModule::new(1 << 20, 1 << 20));
        let orch = MetadataOrchestrator::new(c_cfg, io, Box::new(ZstdCompressionModule::new()))
            .unwrap()
            .without_verification();
        let mut c = chunk(8, 0x88, 0x99, 0x22);
        orch.dedup(&mut c).unwrap();
        orch.update(&mut c).unwrap();

        let mut read_back = chunk(8, 0x88, 0x99, 0x22);
        orch.lookup(&mut read_back).unwrap();
        assert_eq!(read_back.lookup_result, Some(LookupResult::Hit));
        assert_eq!(read_back.verification_result, None);
    }
}
