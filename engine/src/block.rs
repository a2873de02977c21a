//! Copy-on-write block helpers and the zero-block sentinel.
//!
//! These are the leaf-level primitives the crawler uses to decide, and
//! carry out, in-place vs. shadowed block writes. None of them know about
//! tree shape; they operate purely in terms of device block numbers.

use crate::alloc::BitmapAllocator;
use crate::error::{AllocError, CrawlError};
use bpfs_api::controller::Device;
use bpfs_api::types::{Block, BLOCK_SIZE, FIRST_ALLOCATABLE_BLOCK, INVALID_ADDR};
use std::sync::OnceLock;

/// Borrow the shared, read-only, all-zero page used as the read value for
/// holes.
///
/// Never write through this page's bytes back to the device, and never pass
/// its (reserved) block number to [`free_block`] — both are programming
/// errors.
pub fn zero_page() -> &'static [u8] {
    static ZERO: OnceLock<Box<[u8]>> = OnceLock::new();
    ZERO.get_or_init(|| vec![0u8; BLOCK_SIZE as usize].into_boxed_slice())
}

/// Build a (freshly-owned, not shared) `Block` reading as all zero, for
/// callers that need an owned `Block` rather than a borrowed slice.
pub fn hole_block() -> Block {
    Block::new_zero(INVALID_ADDR, BLOCK_SIZE)
}

fn block_no_of_id(id: u64) -> u64 {
    FIRST_ALLOCATABLE_BLOCK + id
}

fn id_of_block_no(block_no: u64) -> u64 {
    assert!(block_no >= FIRST_ALLOCATABLE_BLOCK, "block {} is in the reserved region", block_no);
    block_no - FIRST_ALLOCATABLE_BLOCK
}

/// Allocate a fresh, zero-filled block and return its block number.
pub fn alloc_block(device: &mut Device, balloc: &mut BitmapAllocator) -> Result<u64, AllocError> {
    let id = balloc.alloc()?;
    let block_no = block_no_of_id(id);
    device.write_block(&Block::new_zero(block_no, BLOCK_SIZE))?;
    Ok(block_no)
}

/// Stage the free of the block at `block_no`.
///
/// # Panics
/// Panics if `block_no` names the reserved region (superblocks or the
/// invalid sentinel); freeing those is a programming error, not a
/// recoverable one.
pub fn free_block(balloc: &mut BitmapAllocator, block_no: u64) -> Result<(), AllocError> {
    balloc.free(id_of_block_no(block_no))
}

/// Copy-on-write a hole: allocate a fresh block. Since freshly allocated
/// blocks already read as zero, there is nothing to copy.
pub fn cow_block_hole(device: &mut Device, balloc: &mut BitmapAllocator) -> Result<u64, CrawlError> {
    Ok(alloc_block(device, balloc)?)
}

/// Copy-on-write an existing block, preserving the bytes outside
/// `[off, off+size)` up to `valid` and freeing the old block. The caller is
/// responsible for filling `[off, off+size)` in the returned block.
pub fn cow_block(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    old_block_no: u64,
    off: u64,
    size: u64,
    valid: u64,
) -> Result<u64, CrawlError> {
    let old = device.read_block(old_block_no)?;
    let new_no = alloc_block(device, balloc)?;
    let mut newb = device.read_block(new_no)?;

    if off > 0 {
        let mut buf = vec![0u8; off as usize];
        old.read_data(&mut buf, 0)?;
        newb.write_data(&buf, 0)?;
    }
    let tail_start = off + size;
    if tail_start < valid {
        let tail_len = (valid - tail_start) as usize;
        let mut buf = vec![0u8; tail_len];
        old.read_data(&mut buf, tail_start)?;
        newb.write_data(&buf, tail_start)?;
    }
    device.write_block(&newb)?;
    free_block(balloc, old_block_no)?;
    Ok(new_no)
}

/// Copy-on-write an entire block unchanged (used when a later in-place
/// mutation needs the block's prior contents to survive under a new
/// address), freeing the old block.
pub fn cow_block_entire(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    old_block_no: u64,
) -> Result<u64, CrawlError> {
    let old = device.read_block(old_block_no)?;
    let new_no = alloc_block(device, balloc)?;
    let mut newb = device.read_block(new_no)?;
    newb.write_data(old.contents_as_ref(), 0)?;
    device.write_block(&newb)?;
    free_block(balloc, old_block_no)?;
    Ok(new_no)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_device(nblocks: u64) -> (tempfile::TempDir, Device) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img");
        let dev = Device::new(path, BLOCK_SIZE, nblocks).unwrap();
        (dir, dev)
    }

    #[test]
    fn cow_block_preserves_surrounding_bytes() {
        let (_dir, mut dev) = new_device(16);
        let mut balloc = BitmapAllocator::new(8);
        let old_no = alloc_block(&mut dev, &mut balloc).unwrap();
        let mut old = dev.read_block(old_no).unwrap();
        old.write_data(&[1, 2, 3, 4], 0).unwrap();
        old.write_data(&[9, 9], 100).unwrap();
        dev.write_block(&old).unwrap();

        let new_no = cow_block(&mut dev, &mut balloc, old_no, 4, 2, 102).unwrap();
        let newb = dev.read_block(new_no).unwrap();
        let mut head = [0u8; 4];
        newb.read_data(&mut head, 0).unwrap();
        assert_eq!(head, [1, 2, 3, 4]);
        let mut tail = [0u8; 2];
        newb.read_data(&mut tail, 100).unwrap();
        assert_eq!(tail, [9, 9]);
    }
}
