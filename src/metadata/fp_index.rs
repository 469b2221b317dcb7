//! FP Index: maps a content fingerprint's signature to the cache-device
//! location holding that content, plus its compress level (spec.md §4.F).
//!
//! Entries are 1-4 contiguous slots wide (`compress_level`), so this index
//! always carries a continuation plane. Its replacement policy is
//! configurable (`Config::cache_policy_for_fp_index`); `GarbageAware`
//! additionally needs the external reference counts `BucketArray` owns.
//!
//! All find-then-mutate sequences (reference counting, admission) run
//! inside a single `BucketArray::with_bucket` call so the bucket's mutex
//! covers the whole operation — splitting it into a find pass and a
//! separate mutate pass would let a concurrent admission reuse the slot
//! in between (spec.md §5).

use std::sync::atomic::Ordering;

use super::bucket_array::BucketArray;
use super::policy::Policy;
use super::split_hash;
use crate::config::{CachePolicyKind, Config};

pub struct FpLookup {
    pub compress_level: u8,
    pub cache_loc: u64,
}

/// Result of admitting new content: where it landed, and the cache
/// locations (plus slot-run length) of anything evicted to make room.
pub struct FpAdmission {
    pub cache_loc: u64,
    pub evicted: Vec<(u64, u32)>,
}

pub struct FpIndex {
    array: BucketArray,
    bucket_no_len: u32,
    signature_len: u32,
    min_slot_bytes: u32,
}

impl FpIndex {
    pub fn new(config: &Config) -> Self {
        let policy = match config.cache_policy_for_fp_index {
            CachePolicyKind::Lru => Policy::Lru,
            CachePolicyKind::CaClock => Policy::CaClock,
            CachePolicyKind::GarbageAware => Policy::GarbageAware,
        };
        let array = BucketArray::new(
            config.n_ca_buckets(),
            config.n_slots_per_bucket,
            config.ca_signature_len,
            config.fp_value_bits(),
            policy,
            true,
        );
        FpIndex {
            array,
            bucket_no_len: config.ca_bucket_no_len,
            signature_len: config.ca_signature_len,
            min_slot_bytes: config.min_slot_bytes(),
        }
    }

    fn cache_loc(&self, bucket_id: u32, slot: u32) -> u64 {
        ((bucket_id * self.array.n_slots_per_bucket() + slot) as u64) * self.min_slot_bytes as u64
    }

    /// Whether a (masked) CA-hash still resolves to a live entry. Used by
    /// `LbaIndex::clear_obsolete`.
    pub fn contains(&self, ca_hash_masked: u64) -> bool {
        let hash = ca_hash_masked as u32;
        let (bucket_id, sig) = split_hash(hash, self.bucket_no_len, self.signature_len);
        self.array.with_bucket(bucket_id, |bucket, _, _| bucket.find(sig).is_some())
    }

    /// Find the content for `ca_hash`, promoting it under the active
    /// policy.
    pub fn lookup(&self, ca_hash: u32) -> Option<FpLookup> {
        let (bucket_id, sig) = split_hash(ca_hash, self.bucket_no_len, self.signature_len);
        let policy = self.array.policy();
        let found = self.array.with_bucket(bucket_id, |bucket, _, _| {
            bucket.find(sig).map(|slot| {
                let compress_level = bucket.value(slot) as u8 + 1;
                let len = bucket.run_len(slot);
                policy.promote(bucket, slot, len);
                (slot, compress_level)
            })
        });
        found.map(|(slot, compress_level)| FpLookup {
            compress_level,
            cache_loc: self.cache_loc(bucket_id, slot),
        })
    }

    /// Admit newly-cached content: reserve `compress_level` contiguous
    /// slots, evicting as needed, and record the entry.
    pub fn admit(&self, ca_hash: u32, compress_level: u8) -> FpAdmission {
        let (bucket_id, sig) = split_hash(ca_hash, self.bucket_no_len, self.signature_len);
        let n = (compress_level as u32).max(1).min(4);
        let policy = self.array.policy();

        let outcome = self.array.with_bucket(bucket_id, |bucket, clock_ptr, ref_counts| {
            let outcome = policy.allocate(bucket, n, clock_ptr, ref_counts);
            bucket.occupy_run(outcome.start, n, sig, (compress_level.saturating_sub(1)) as u64);
            if policy == Policy::CaClock {
                bucket.set_clock_value(outcome.start, compress_level.min(3));
            }
            if let Some(rc) = ref_counts {
                for &(slot, _len) in &outcome.evicted {
                    rc[slot as usize].store(0, Ordering::SeqCst);
                }
                if policy == Policy::GarbageAware {
                    rc[outcome.start as usize].store(1, Ordering::SeqCst);
                }
            }
            outcome
        });

        let evicted = outcome.evicted.iter().map(|&(slot, len)| (self.cache_loc(bucket_id, slot), len)).collect();
        FpAdmission {
            cache_loc: self.cache_loc(bucket_id, outcome.start),
            evicted,
        }
    }

    /// Increment the reference count on the entry for `ca_hash`
    /// (no-op outside `GarbageAware`).
    pub fn reference(&self, ca_hash: u32) {
        let (bucket_id, sig) = split_hash(ca_hash, self.bucket_no_len, self.signature_len);
        self.array.with_bucket(bucket_id, |bucket, _, ref_counts| {
            if let (Some(slot), Some(rc)) = (bucket.find(sig), ref_counts) {
                rc[slot as usize].fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    /// Decrement the reference count on the entry for `ca_hash`, returning
    /// the count afterward (no-op, returns 0, outside `GarbageAware`).
    pub fn dereference(&self, ca_hash: u32) -> u32 {
        let (bucket_id, sig) = split_hash(ca_hash, self.bucket_no_len, self.signature_len);
        self.array.with_bucket(bucket_id, |bucket, _, ref_counts| match (bucket.find(sig), ref_counts) {
            (Some(slot), Some(rc)) => rc[slot as usize]
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)))
                .unwrap_or(0)
                .saturating_sub(1),
            _ => 0,
        })
    }

    /// Erase the entry for `ca_hash`, if any. Used to repair a bucket after
    /// a verification collision: the signature matched but the fingerprint
    /// didn't, so the slot can no longer be trusted (spec.md §4.I).
    pub fn invalidate(&self, ca_hash: u32) {
        let (bucket_id, sig) = split_hash(ca_hash, self.bucket_no_len, self.signature_len);
        self.array.with_bucket(bucket_id, |bucket, _, ref_counts| {
            if let Some(slot) = bucket.find(sig) {
                let len = bucket.run_len(slot);
                bucket.invalidate_run(slot, len);
                if let Some(rc) = ref_counts {
                    rc[slot as usize].store(0, Ordering::SeqCst);
                }
            }
        });
    }
}
