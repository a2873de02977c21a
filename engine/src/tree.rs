//! Height-variable block tree arithmetic.
//!
//! A tree of height `h` is a leaf (`h == 0`) or an indirect block whose 512
//! children are each the root of a tree of height `h - 1`. These functions
//! compute capacities and child indices; they never touch the device.

use bpfs_api::types::{BLOCK_SIZE, CHILDREN_PER_INDIR, MAX_HEIGHT};

/// Byte capacity of a tree of the given height, saturating at `u64::MAX`
/// rather than overflowing — heights near `MAX_HEIGHT` represent capacities
/// no `u64` byte count can reach anyway.
pub fn capacity_bytes(height: u8) -> u64 {
    let mut cap: u128 = BLOCK_SIZE as u128;
    for _ in 0..height {
        cap = cap.saturating_mul(CHILDREN_PER_INDIR as u128);
    }
    cap.min(u64::MAX as u128) as u64
}

/// The number of bytes spanned by a single child of a height-`height`
/// indirect block.
///
/// # Panics
/// Panics if `height == 0`; a leaf has no children.
pub fn child_span(height: u8) -> u64 {
    assert!(height > 0, "a leaf has no children");
    capacity_bytes(height - 1)
}

/// Minimum tree height whose capacity can hold `nbytes`.
pub fn height_for_capacity(nbytes: u64) -> u8 {
    let mut h = 0u8;
    while capacity_bytes(h) < nbytes && h < MAX_HEIGHT {
        h += 1;
    }
    h
}

/// Split a byte offset at tree height `height` into `(child_index,
/// offset_within_child)`.
///
/// # Panics
/// Panics if `height == 0`.
pub fn locate(height: u8, off: u64) -> (u64, u64) {
    let span = child_span(height);
    (off / span, off % span)
}
