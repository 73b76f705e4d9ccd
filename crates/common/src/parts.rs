//! Part-size policy for partitioned copies.
//!
//! Pure decision logic - no I/O. Given a total object size, chooses a part
//! size that stays within the provider's part-count limit and computes the
//! byte range owned by each 1-based part index.

use crate::constants::{MAX_PARTS, MIN_PART_SIZE};

const MIB: u64 = 1024 * 1024;

/// Choose the part size for an object of `total_size` bytes.
///
/// The result is at least `MIN_PART_SIZE` and grows (rounded up to a whole
/// MiB) so the resulting part count never exceeds `MAX_PARTS`.
pub fn part_size_for(total_size: u64) -> u64 {
    let needed: u64 = (total_size + MAX_PARTS - 1) / MAX_PARTS;
    let rounded: u64 = ((needed + MIB - 1) / MIB) * MIB;
    rounded.max(MIN_PART_SIZE)
}

/// Number of parts for an object of `total_size` bytes at `part_size`.
///
/// Zero-byte objects still occupy one part.
pub fn part_count_for(total_size: u64, part_size: u64) -> u64 {
    if total_size == 0 {
        return 1;
    }
    (total_size + part_size - 1) / part_size
}

/// Recover the part size of a source object uploaded in `part_count`
/// parts.
///
/// Providers upload in whole-MiB part sizes, so rounding the even split up
/// to a MiB reproduces the original split and lets the composite checksum
/// match at finalization. Sub-MiB objects fall back to the exact ceiling.
pub fn part_size_matching(total_size: u64, part_count: u64) -> u64 {
    let even: u64 = (total_size + part_count - 1) / part_count.max(1);
    if even < MIB {
        return even.max(1);
    }
    ((even + MIB - 1) / MIB) * MIB
}

/// Inclusive byte range `(first, last)` covered by 1-based part `part_number`.
///
/// The final part may be shorter than `part_size`.
pub fn part_range(part_number: u64, part_size: u64, total_size: u64) -> (u64, u64) {
    let first: u64 = (part_number - 1) * part_size;
    let last: u64 = std::cmp::min(total_size, part_number * part_size) - 1;
    (first, last)
}
