//! `Bucket`: one locked, fixed-capacity bit-packed slot array.
//!
//! A `Bucket` is a transient, borrowing view over a `BucketArray`'s backing
//! storage — built fresh for the duration of one locked operation, never
//! stored (spec.md §9, "Bucket handles as transient views"). Ported from
//! `original_source/src/metadata/bucket.h`'s `Bucket`/`LBABucket`/`CABucket`.
//!
//! The LBA Index uses only `data`/`valid`; the FP Index additionally uses
//! `continuation` (one bit/slot, marking a slot as the tail of a
//! multi-slot run rather than re-purposing a zero key as the original does
//! — see DESIGN.md) and, depending on policy, `clock` (two bits/slot).

use super::bitmap::BitmapView;

pub struct Bucket<'a> {
    data: BitmapView<'a>,
    valid: BitmapView<'a>,
    continuation: Option<BitmapView<'a>>,
    clock: Option<BitmapView<'a>>,
    bucket_id: u32,
    key_bits: u32,
    value_bits: u32,
    n_slots: u32,
}

impl<'a> Bucket<'a> {
    pub fn new(
        data: &'a mut [u8],
        valid: &'a mut [u8],
        continuation: Option<&'a mut [u8]>,
        clock: Option<&'a mut [u8]>,
        bucket_id: u32,
        key_bits: u32,
        value_bits: u32,
        n_slots: u32,
    ) -> Self {
        Bucket {
            data: BitmapView::new(data),
            valid: BitmapView::new(valid),
            continuation: continuation.map(BitmapView::new),
            clock: clock.map(BitmapView::new),
            bucket_id,
            key_bits,
            value_bits,
            n_slots,
        }
    }

    #[inline]
    pub fn bucket_id(&self) -> u32 {
        self.bucket_id
    }

    #[inline]
    pub fn n_slots(&self) -> u32 {
        self.n_slots
    }

    #[inline]
    fn bits_per_slot(&self) -> u32 {
        self.key_bits + self.value_bits
    }

    #[inline]
    pub fn key(&self, slot: u32) -> u64 {
        let b = slot * self.bits_per_slot();
        self.data.get_bits(b, b + self.key_bits)
    }

    #[inline]
    pub fn set_key(&mut self, slot: u32, v: u64) {
        let b = slot * self.bits_per_slot();
        self.data.store_bits(b, b + self.key_bits, v);
    }

    #[inline]
    pub fn value(&self, slot: u32) -> u64 {
        let b = slot * self.bits_per_slot() + self.key_bits;
        self.data.get_bits(b, b + self.value_bits)
    }

    #[inline]
    pub fn set_value(&mut self, slot: u32, v: u64) {
        let b = slot * self.bits_per_slot() + self.key_bits;
        self.data.store_bits(b, b + self.value_bits, v);
    }

    #[inline]
    pub fn is_valid(&self, slot: u32) -> bool {
        self.valid.get(slot)
    }

    #[inline]
    pub fn set_valid(&mut self, slot: u32) {
        self.valid.set(slot);
    }

    #[inline]
    pub fn set_invalid(&mut self, slot: u32) {
        self.valid.clear(slot);
        if let Some(c) = self.continuation.as_mut() {
            c.clear(slot);
        }
    }

    /// Find the slot currently holding `key` as a run start. O(n_slots).
    pub fn find(&self, key: u64) -> Option<u32> {
        for slot in 0..self.n_slots {
            if self.is_valid(slot) && !self.is_continuation(slot) && self.key(slot) == key {
                return Some(slot);
            }
        }
        None
    }

    #[inline]
    pub fn is_continuation(&self, slot: u32) -> bool {
        self.continuation.as_ref().map_or(false, |c| c.get(slot))
    }

    #[inline]
    pub fn set_continuation(&mut self, slot: u32) {
        if let Some(c) = self.continuation.as_mut() {
            c.set(slot);
        }
    }

    /// Length of the run starting at `start` (a non-continuation valid
    /// slot): `start` itself plus every immediately following valid
    /// continuation slot. Returns 1 if `start` is invalid or has no
    /// following continuation slots.
    pub fn run_len(&self, start: u32) -> u32 {
        if !self.is_valid(start) {
            return 1;
        }
        let mut len = 1;
        let mut s = start + 1;
        while s < self.n_slots && self.is_valid(s) && self.is_continuation(s) {
            len += 1;
            s += 1;
        }
        len
    }

    /// Mark a fresh run `[start, start+len)` valid, with `key`/`value` on
    /// the start slot and continuation markers on the rest (spec.md §4.F).
    pub fn occupy_run(&mut self, start: u32, len: u32, key: u64, value: u64) {
        self.set_key(start, key);
        self.set_value(start, value);
        self.set_valid(start);
        for i in 1..len {
            let s = start + i;
            self.set_valid(s);
            self.set_continuation(s);
        }
    }

    /// Invalidate every slot in `[start, start+len)`.
    pub fn invalidate_run(&mut self, start: u32, len: u32) {
        for i in 0..len {
            self.set_invalid(start + i);
        }
    }

    /// Two-bit clock counter for `slot`, or 0 if this bucket carries no
    /// clock plane (non-CA-Clock policies).
    pub fn clock_value(&self, slot: u32) -> u8 {
        self.clock
            .as_ref()
            .map_or(0, |c| c.get_bits(slot * 2, slot * 2 + 2) as u8)
    }

    pub fn set_clock_value(&mut self, slot: u32, v: u8) {
        if let Some(c) = self.clock.as_mut() {
            c.store_bits(slot * 2, slot * 2 + 2, v as u64);
        }
    }

    /// Move slot contents (key, value, valid, continuation) from `src` to
    /// `dst`. Used by the LRU executor's compaction and shift.
    pub fn move_slot(&mut self, src: u32, dst: u32) {
        if src == dst {
            return;
        }
        if self.is_valid(src) {
            let k = self.key(src);
            let v = self.value(src);
            let cont = self.is_continuation(src);
            self.set_key(dst, k);
            self.set_value(dst, v);
            self.set_valid(dst);
            if cont {
                self.set_continuation(dst);
            }
        } else {
            self.set_invalid(dst);
        }
        self.set_invalid(src);
    }
}

/// Storage shape needed to back one bucket: bytes of `data`, `valid`, and
/// (if used) `continuation`/`clock` planes.
pub struct BucketLayout {
    pub data_bytes: usize,
    pub valid_bytes: usize,
    pub continuation_bytes: usize,
    pub clock_bytes: usize,
}

pub fn bucket_layout(key_bits: u32, value_bits: u32, n_slots: u32, has_continuation: bool, has_clock: bool) -> BucketLayout {
    let data_bits = (key_bits + value_bits) * n_slots;
    BucketLayout {
        data_bytes: super::bitmap::bytes_for_bits(data_bits),
        valid_bytes: super::bitmap::bytes_for_bits(n_slots),
        continuation_bytes: if has_continuation { super::bitmap::bytes_for_bits(n_slots) } else { 0 },
        clock_bytes: if has_clock { super::bitmap::bytes_for_bits(n_slots * 2) } else { 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make<'a>(data: &'a mut [u8], valid: &'a mut [u8], cont: &'a mut [u8]) -> Bucket<'a> {
        Bucket::new(data, valid, Some(cont), None, 0, 12, 12, 8)
    }

    #[test]
    fn key_value_roundtrip() {
        let layout = bucket_layout(12, 12, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make(&mut data, &mut valid, &mut cont);
        b.set_key(3, 0xABC);
        b.set_value(3, 0x123);
        b.set_valid(3);
        assert_eq!(b.key(3), 0xABC);
        assert_eq!(b.value(3), 0x123);
        assert!(b.is_valid(3));
        assert!(!b.is_valid(2));
    }

    #[test]
    fn find_scans_valid_non_continuation_slots() {
        let layout = bucket_layout(12, 12, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make(&mut data, &mut valid, &mut cont);
        b.set_key(5, 42);
        assert_eq!(b.find(42), None);
        b.set_valid(5);
        assert_eq!(b.find(42), Some(5));
    }

    #[test]
    fn run_occupy_and_invalidate() {
        let layout = bucket_layout(12, 2, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make(&mut data, &mut valid, &mut cont);
        b.occupy_run(2, 3, 0x7, 2);
        assert_eq!(b.run_len(2), 3);
        assert!(b.is_valid(2) && b.is_valid(3) && b.is_valid(4));
        assert!(!b.is_continuation(2));
        assert!(b.is_continuation(3) && b.is_continuation(4));
        assert_eq!(b.find(0x7), Some(2));
        b.invalidate_run(2, 3);
        assert!(!b.is_valid(2) && !b.is_valid(3) && !b.is_valid(4));
    }

    #[test]
    fn move_slot_clears_source() {
        let layout = bucket_layout(12, 12, 8, true, false);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut b = make(&mut data, &mut valid, &mut cont);
        b.set_key(0, 7);
        b.set_value(0, 1);
        b.set_valid(0);
        b.move_slot(0, 1);
        assert!(!b.is_valid(0));
        assert!(b.is_valid(1));
        assert_eq!(b.key(1), 7);
    }

    #[test]
    fn clock_value_roundtrip() {
        let layout = bucket_layout(12, 2, 8, true, true);
        let mut data = vec![0u8; layout.data_bytes];
        let mut valid = vec![0u8; layout.valid_bytes];
        let mut cont = vec![0u8; layout.continuation_bytes];
        let mut clock = vec![0u8; layout.clock_bytes];
        let mut b = Bucket::new(&mut data, &mut valid, Some(&mut cont), Some(&mut clock), 0, 12, 2, 8);
        b.set_clock_value(4, 3);
        assert_eq!(b.clock_value(4), 3);
        assert_eq!(b.clock_value(5), 0);
    }
}
