//! The metadata subsystem: the two bucketized hash indices, their shared
//! bit-packing and replacement-policy machinery, and on-device
//! verification (spec.md §4).

mod bitmap;
mod bucket;
mod bucket_array;
mod fp_index;
mod lba_index;
mod orchestrator;
mod policy;
mod verification;

pub use bucket::{bucket_layout, Bucket, BucketLayout};
pub use bucket_array::BucketArray;
pub use fp_index::FpIndex;
pub use lba_index::LbaIndex;
pub use orchestrator::MetadataOrchestrator;
pub use policy::{AllocateOutcome, Policy};
pub use verification::Verification;

/// Splits a 32-bit hash into a bucket selector (low `bucket_no_len` bits)
/// and an in-bucket signature (next `signature_len` bits), matching
/// `original_source`'s quotient/remainder hash bucketing. Shared by both
/// the LBA Index and the FP Index.
pub(crate) fn split_hash(hash: u32, bucket_no_len: u32, signature_len: u32) -> (u32, u64) {
    let bucket_mask = (1u32 << bucket_no_len) - 1;
    let bucket_id = hash & bucket_mask;
    let sig_mask = (1u64 << signature_len) - 1;
    let signature = ((hash >> bucket_no_len) as u64) & sig_mask;
    (bucket_id, signature)
}
