//! `BucketArray`: owned backing storage for one bucketized hash index,
//! plus the per-bucket locks and the single replacement-policy instance
//! shared by every bucket (spec.md §4.C, §5).
//!
//! Ported from `original_source`'s `MetadataModuleBucketDLRU`/`BucketArray`
//! notion, but collapsed: the original keeps one C++ class per policy
//! (`MetadataModuleDLRU`, `MetadataModuleBucketDLRU`, ...). Here the policy
//! is a field, not a base class (spec.md §9).
//!
//! Each bucket owns its own backing bytes behind its own `Mutex`, so two
//! threads touching different buckets never contend (spec.md §5: locking
//! is always bucket-granular, never array-wide).

use std::sync::atomic::AtomicU32;
use std::sync::Mutex;

use super::bucket::{bucket_layout, Bucket, BucketLayout};
use super::policy::{AllocateOutcome, Policy};

struct BucketStorage {
    data: Vec<u8>,
    valid: Vec<u8>,
    continuation: Vec<u8>,
    clock: Vec<u8>,
}

pub struct BucketArray {
    n_buckets: u32,
    n_slots_per_bucket: u32,
    key_bits: u32,
    value_bits: u32,
    policy: Policy,
    buckets: Vec<Mutex<BucketStorage>>,

    /// Shared clock-hand cursor; only populated (and only touched) when
    /// `policy == CaClock`. Races across buckets are tolerated: allocation
    /// is still transactional per bucket (spec.md §5).
    clock_ptr: Option<AtomicU32>,
    /// External per-slot reference counts; only populated when
    /// `policy == GarbageAware` (spec.md §4.D, "external to the bucket").
    ref_counts: Option<Vec<AtomicU32>>,
}

impl BucketArray {
    pub fn new(
        n_buckets: u32,
        n_slots_per_bucket: u32,
        key_bits: u32,
        value_bits: u32,
        policy: Policy,
        has_continuation: bool,
    ) -> Self {
        let has_clock = policy == Policy::CaClock;
        let layout: BucketLayout = bucket_layout(key_bits, value_bits, n_slots_per_bucket, has_continuation, has_clock);

        let buckets = (0..n_buckets)
            .map(|_| {
                Mutex::new(BucketStorage {
                    data: vec![0u8; layout.data_bytes],
                    valid: vec![0u8; layout.valid_bytes],
                    continuation: vec![0u8; layout.continuation_bytes],
                    clock: vec![0u8; layout.clock_bytes],
                })
            })
            .collect();

        let clock_ptr = if has_clock { Some(AtomicU32::new(0)) } else { None };
        let ref_counts = if policy == Policy::GarbageAware {
            Some((0..n_buckets * n_slots_per_bucket).map(|_| AtomicU32::new(0)).collect())
        } else {
            None
        };

        BucketArray {
            n_buckets,
            n_slots_per_bucket,
            key_bits,
            value_bits,
            policy,
            buckets,
            clock_ptr,
            ref_counts,
        }
    }

    pub fn n_buckets(&self) -> u32 {
        self.n_buckets
    }

    pub fn n_slots_per_bucket(&self) -> u32 {
        self.n_slots_per_bucket
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Run `f` with exclusive access to bucket `bucket_id`'s view, along
    /// with the shared clock cursor (`CaClock`) and this bucket's slice of
    /// the reference-count table (`GarbageAware`), whichever applies. The
    /// bucket's mutex guard lives only for the duration of this call
    /// (spec.md §9, "transient bucket handles").
    pub fn with_bucket<R>(
        &self,
        bucket_id: u32,
        f: impl FnOnce(&mut Bucket, Option<&AtomicU32>, Option<&[AtomicU32]>) -> R,
    ) -> R {
        let mut storage = self.buckets[bucket_id as usize].lock().unwrap();
        let has_continuation = !storage.continuation.is_empty();
        let has_clock = !storage.clock.is_empty();

        let mut bucket = Bucket::new(
            &mut storage.data,
            &mut storage.valid,
            if has_continuation { Some(&mut storage.continuation) } else { None },
            if has_clock { Some(&mut storage.clock) } else { None },
            bucket_id,
            self.key_bits,
            self.value_bits,
            self.n_slots_per_bucket,
        );
        let ref_counts = self.ref_counts.as_ref().map(|rc| {
            let lo = (bucket_id * self.n_slots_per_bucket) as usize;
            &rc[lo..lo + self.n_slots_per_bucket as usize]
        });
        f(&mut bucket, self.clock_ptr.as_ref(), ref_counts)
    }

    /// Allocate room for one entry in `bucket_id`, returning where to write
    /// it and what was evicted.
    pub fn allocate(&self, bucket_id: u32, n_slots_to_occupy: u32) -> AllocateOutcome {
        let policy = self.policy;
        self.with_bucket(bucket_id, |bucket, clock_ptr, ref_counts| {
            policy.allocate(bucket, n_slots_to_occupy, clock_ptr, ref_counts)
        })
    }

    /// Reference count for an occupied FP slot (garbage-aware policy only).
    pub fn ref_count(&self, bucket_id: u32, slot: u32) -> u32 {
        self.ref_counts
            .as_ref()
            .map_or(0, |rc| rc[(bucket_id * self.n_slots_per_bucket + slot) as usize].load(std::sync::atomic::Ordering::SeqCst))
    }

    pub fn ref_increment(&self, bucket_id: u32, slot: u32) {
        if let Some(rc) = &self.ref_counts {
            rc[(bucket_id * self.n_slots_per_bucket + slot) as usize].fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Decrement a slot's reference count, returning the count after
    /// decrementing. No-op (returns 0) outside garbage-aware policy.
    pub fn ref_decrement(&self, bucket_id: u32, slot: u32) -> u32 {
        match &self.ref_counts {
            Some(rc) => {
                let idx = (bucket_id * self.n_slots_per_bucket + slot) as usize;
                let prev = rc[idx].fetch_update(std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst, |v| {
                    Some(v.saturating_sub(1))
                });
                prev.unwrap_or(0).saturating_sub(1)
            }
            None => 0,
        }
    }

    pub fn reset_ref_count(&self, bucket_id: u32, slot: u32) {
        if let Some(rc) = &self.ref_counts {
            rc[(bucket_id * self.n_slots_per_bucket + slot) as usize].store(0, std::sync::atomic::Ordering::SeqCst);
        }
    }
}
