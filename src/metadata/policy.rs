//! Cache-replacement policy executors (spec.md §4.D).
//!
//! Modeled as a tagged sum rather than a trait object (spec.md §9): there
//! are exactly three variants (`Lru`, `CaClock`, `GarbageAware`) and no
//! third-party extension point. Each operates on one locked `Bucket` at a
//! time; `CaClock` additionally shares one `AtomicU32` clock-hand cursor
//! across every bucket in the FP Index (spec.md §4.C), and
//! `GarbageAware`'s reference counts live outside the bit-packed bucket
//! entirely, owned by the FP Index (spec.md §4.D).

use std::sync::atomic::{AtomicU32, Ordering};

use super::bucket::Bucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Lru,
    CaClock,
    GarbageAware,
}

/// Result of an `allocate` call: where the new entry should be written, and
/// which previously-valid runs were invalidated to make room. Callers turn
/// each `(start, len)` into a cache-device offset and notify the dirty
/// list before reusing that storage.
#[derive(Debug, Default)]
pub struct AllocateOutcome {
    pub start: u32,
    pub evicted: Vec<(u32, u32)>,
}

/// Run-aware helper: the non-continuation slot a given slot belongs to.
fn run_start(bucket: &Bucket, slot: u32) -> u32 {
    let mut s = slot;
    while s > 0 && bucket.is_valid(s) && bucket.is_continuation(s) {
        s -= 1;
    }
    s
}

/// Collect `(start, len, key, value)` for every occupied run, scanning
/// front to back. For an LRU bucket, slot order is recency order (slot 0
/// = least recently used), so this list is already LRU -> MRU ordered.
fn collect_runs(bucket: &Bucket) -> Vec<(u32, u32, u64, u64)> {
    let mut runs = Vec::new();
    let mut slot = 0;
    while slot < bucket.n_slots() {
        if bucket.is_valid(slot) && !bucket.is_continuation(slot) {
            let len = bucket.run_len(slot);
            runs.push((slot, len, bucket.key(slot), bucket.value(slot)));
            slot += len;
        } else {
            slot += 1;
        }
    }
    runs
}

/// Rewrite `runs` back into the bucket, packed contiguously ending at the
/// last slot, after clearing every slot. Returns the offset the first run
/// was written at.
fn rewrite_packed(bucket: &mut Bucket, runs: &[(u32, u32, u64, u64)]) -> u32 {
    clear_all(bucket);
    let end = bucket.n_slots();
    pack_ending_at(bucket, runs, end)
}

fn clear_all(bucket: &mut Bucket) {
    for slot in 0..bucket.n_slots() {
        bucket.set_invalid(slot);
    }
}

/// Write `runs` back to back so the last one ends exactly at
/// `end_exclusive`. Does not touch any slot outside that span; the caller
/// is responsible for having cleared the bucket first. Returns the offset
/// the first run was written at.
fn pack_ending_at(bucket: &mut Bucket, runs: &[(u32, u32, u64, u64)], end_exclusive: u32) -> u32 {
    let total_len: u32 = runs.iter().map(|r| r.1).sum();
    let mut cursor = end_exclusive - total_len;
    let start = cursor;
    for &(_old_start, len, key, value) in runs {
        bucket.occupy_run(cursor, len, key, value);
        cursor += len;
    }
    start
}

impl Policy {
    /// Mark the run starting at `start` (length `n_slots_to_occupy`) as
    /// recently used.
    pub fn promote(&self, bucket: &mut Bucket, start: u32, n_slots_to_occupy: u32) {
        match self {
            Policy::Lru => {
                let mut runs = collect_runs(bucket);
                if let Some(pos) = runs.iter().position(|r| r.0 == start) {
                    let run = runs.remove(pos);
                    runs.push(run);
                    rewrite_packed(bucket, &runs);
                }
            }
            Policy::CaClock => {
                let c = bucket.clock_value(start);
                bucket.set_clock_value(start, (c + 1).min(3));
            }
            Policy::GarbageAware => {
                // Garbage-aware promotion is a no-op on the bucket itself;
                // liveness is entirely reference-count driven.
                let _ = n_slots_to_occupy;
            }
        }
    }

    /// Reserve a contiguous run of `n_slots_to_occupy` slots, evicting
    /// existing runs as needed. Returns the run's start slot and whatever
    /// was evicted to make room, in their pre-eviction slot positions.
    ///
    /// `clock_ptr` is required (and only used) for `CaClock`; `ref_counts`
    /// (this bucket's slice of the FP Index's external reference counts) is
    /// required (and only used) for `GarbageAware`.
    pub fn allocate(
        &self,
        bucket: &mut Bucket,
        n_slots_to_occupy: u32,
        clock_ptr: Option<&AtomicU32>,
        ref_counts: Option<&[AtomicU32]>,
    ) -> AllocateOutcome {
        match self {
            Policy::Lru => self.allocate_lru(bucket, n_slots_to_occupy),
            Policy::CaClock => self.allocate_ca_clock(bucket, n_slots_to_occupy, clock_ptr.expect("CaClock requires a clock cursor")),
            Policy::GarbageAware => {
                self.allocate_least_ref_count(bucket, n_slots_to_occupy, ref_counts.expect("GarbageAware requires reference counts"))
            }
        }
    }

    fn allocate_lru(&self, bucket: &mut Bucket, n: u32) -> AllocateOutcome {
        let runs = collect_runs(bucket);
        let used: u32 = runs.iter().map(|r| r.1).sum();
        let free = bucket.n_slots() - used;
        let mut evict_count = 0usize;
        let mut freed = free;
        while freed < n && evict_count < runs.len() {
            freed += runs[evict_count].1;
            evict_count += 1;
        }
        let evicted: Vec<(u32, u32)> = runs[..evict_count].iter().map(|r| (r.0, r.1)).collect();
        let survivors = &runs[evict_count..];
        // The new entry takes the last `n` slots; survivors are repacked
        // to end exactly where the new entry begins, preserving LRU order.
        let start = bucket.n_slots() - n;
        clear_all(bucket);
        pack_ending_at(bucket, survivors, start);
        AllocateOutcome { start, evicted }
    }

    fn allocate_ca_clock(&self, bucket: &mut Bucket, n: u32, clock_ptr: &AtomicU32) -> AllocateOutcome {
        let total = bucket.n_slots();
        for _pass in 0..4 {
            let start_pos = clock_ptr.fetch_add(total, Ordering::Relaxed) % total;
            let mut pos = start_pos;
            let mut visited = 0u32;
            let mut window_start: Option<u32> = None;
            let mut window_len = 0u32;
            let mut window_evicted: Vec<(u32, u32)> = Vec::new();

            while visited < total {
                let unit_start = run_start(bucket, pos);
                let unit_len = if bucket.is_valid(unit_start) { bucket.run_len(unit_start) } else { 1 };

                let is_free_unit = if !bucket.is_valid(unit_start) {
                    true
                } else {
                    let c = bucket.clock_value(unit_start);
                    if c == 0 {
                        true
                    } else {
                        bucket.set_clock_value(unit_start, c - 1);
                        false
                    }
                };

                if is_free_unit {
                    if window_start.is_none() {
                        window_start = Some(unit_start);
                    }
                    window_len += unit_len;
                    if bucket.is_valid(unit_start) {
                        window_evicted.push((unit_start, unit_len));
                    }
                } else {
                    window_start = None;
                    window_len = 0;
                    window_evicted.clear();
                }

                if window_len >= n {
                    let start = window_start.unwrap();
                    for &(s, l) in &window_evicted {
                        bucket.invalidate_run(s, l);
                    }
                    return AllocateOutcome { start, evicted: window_evicted };
                }

                visited += unit_len;
                pos = (unit_start + unit_len) % total;
            }
        }
        // Bounded-pass fallback: every counter saturates at 3, so four full
        // sweeps are always enough in practice. If configuration makes the
        // bucket smaller than `n`, evict everything and take slot 0.
        for slot in 0..total {
            bucket.set_invalid(slot);
        }
        AllocateOutcome { start: 0, evicted: Vec::new() }
    }

    fn allocate_least_ref_count(&self, bucket: &mut Bucket, n: u32, ref_counts: &[AtomicU32]) -> AllocateOutcome {
        let total = bucket.n_slots();
        if n > total {
            return AllocateOutcome { start: 0, evicted: Vec::new() };
        }
        let mut best_start = 0u32;
        let mut best_score = i64::MAX;
        let mut best_runs: Vec<(u32, u32)> = Vec::new();

        let mut start = 0u32;
        while start + n <= total {
            // Only consider windows aligned to a run boundary so we never
            // split an existing run.
            if !bucket.is_valid(start) || !bucket.is_continuation(start) {
                let mut score = 0i64;
                let mut runs_in_window = Vec::new();
                let mut ok = true;
                let mut pos = start;
                while pos < start + n {
                    let unit_start = run_start(bucket, pos);
                    if unit_start < start {
                        // window starts mid-run; reject
                        ok = false;
                        break;
                    }
                    let unit_len = if bucket.is_valid(unit_start) { bucket.run_len(unit_start) } else { 1 };
                    if unit_start + unit_len > start + n {
                        // run spills past window end; reject
                        ok = false;
                        break;
                    }
                    if bucket.is_valid(unit_start) {
                        score += ref_counts[unit_start as usize].load(Ordering::SeqCst) as i64;
                        runs_in_window.push((unit_start, unit_len));
                    }
                    pos = unit_start + unit_len;
                }
                if ok && score < best_score {
                    best_score = score;
                    best_start = start;
                    best_runs = runs_in_window;
                }
            }
            start += 1;
        }

        for &(s, l) in &best_runs {
            bucket.invalidate_run(s, l);
        }
        AllocateOutcome { start: best_start, evicted: best_runs }
    }

    /// Invalidate any valid LBA slot whose value (an FP-signature) no
    /// longer exists in the FP Index. Only meaningful for the LBA Index,
    /// which always uses `Lru` (spec.md §4.D).
    pub fn clear_obsolete(&self, bucket: &mut Bucket, mut fp_exists: impl FnMut(u64) -> bool) {
        for slot in 0..bucket.n_slots() {
            if bucket.is_valid(slot) && !bucket.is_continuation(slot) {
                let fp_sig = bucket.value(slot);
                if !fp_exists(fp_sig) {
                    bucket.set_invalid(slot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::bucket::bucket_layout;

    fn make_bucket<'a>(
        data: &'a mut [u8],
        valid: &'a mut [u8],
        cont: &'a mut [u8],
        clock: Option<&'a mut [u8]>,
        key_bits: u32,
        value_bits: u32,
        n_slots: u32,
    ) -> Bucket<'a> {
        Bucket::new(data, valid, Some(cont), clock, 0, key_bits, value_bits, n_slots)
    }

    #[test]
    fn lru_promote_moves_to_tail() {
        let layout = bucket_layout(12, 12, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make_bucket(&mut data, &mut valid, &mut cont, None, 12, 12, 8);

        // fill all 8 slots with distinct single-slot entries
        for i in 0..8u32 {
            b.occupy_run(i, 1, (i + 1) as u64, 0);
        }
        let policy = Policy::Lru;
        policy.promote(&mut b, 0, 1); // promote the LRU-most entry (key=1)
        // key 1 should now be at the tail, slot 7
        assert_eq!(b.key(7), 1);
        // everything else shifted down by one
        assert_eq!(b.key(0), 2);
        assert_eq!(b.key(6), 8);
    }

    #[test]
    fn lru_allocate_evicts_oldest() {
        let layout = bucket_layout(12, 12, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make_bucket(&mut data, &mut valid, &mut cont, None, 12, 12, 8);
        for i in 0..8u32 {
            b.occupy_run(i, 1, (i + 1) as u64, 0);
        }
        let policy = Policy::Lru;
        let outcome = policy.allocate(&mut b, 1, None, None);
        assert_eq!(outcome.start, 7);
        assert_eq!(outcome.evicted, vec![(0, 1)]);
        b.occupy_run(outcome.start, 1, 99, 0);
        assert_eq!(b.key(7), 99);
        assert_eq!(b.key(6), 8); // second-oldest shifted to second-from-tail
    }

    #[test]
    fn lru_allocate_uses_free_slot_without_eviction() {
        let layout = bucket_layout(12, 12, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make_bucket(&mut data, &mut valid, &mut cont, None, 12, 12, 8);
        for i in 0..5u32 {
            b.occupy_run(3 + i, 1, (i + 1) as u64, 0);
        }
        let policy = Policy::Lru;
        let outcome = policy.allocate(&mut b, 1, None, None);
        assert!(outcome.evicted.is_empty());
        assert_eq!(outcome.start, 7);
    }

    #[test]
    fn ca_clock_reclaims_earliest_group_after_decrements() {
        // 16 slots, four compress_level=4 items fill the bucket, then a
        // compress_level=2 item is admitted.
        let layout = bucket_layout(12, 2, 16, true, true);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut clock = vec![0u8; layout.clock_bytes];
        let mut b = make_bucket(&mut data, &mut valid, &mut cont, Some(&mut clock), 12, 2, 16);
        let policy = Policy::CaClock;
        let clock_ptr = AtomicU32::new(0);

        for i in 0..4u32 {
            let outcome = policy.allocate(&mut b, 4, Some(&clock_ptr), None);
            b.occupy_run(outcome.start, 4, (i + 1) as u64, 4);
            b.set_clock_value(outcome.start, 3); // compress_level 4, clamped to 3 lives
        }
        // bucket is now full: runs at 0,4,8,12 each length 4, clock=3
        let outcome = policy.allocate(&mut b, 2, Some(&clock_ptr), None);
        // earliest group (key=1, slots 0..4) must be the one reclaimed
        assert_eq!(outcome.start, 0);
        assert!(outcome.evicted.contains(&(0, 4)));
    }

    #[test]
    fn clear_obsolete_invalidates_stale_mapping() {
        let layout = bucket_layout(12, 12, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make_bucket(&mut data, &mut valid, &mut cont, None, 12, 12, 8);
        b.occupy_run(0, 1, 5, 0xAAA);
        let policy = Policy::Lru;
        policy.clear_obsolete(&mut b, |fp_sig| fp_sig != 0xAAA);
        assert!(!b.is_valid(0));
    }
}
