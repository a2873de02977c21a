//! The tree crawler: recursive descent over a height-variable block tree
//! that decides, at every indirect node and leaf it touches, whether a
//! change can be published in place or must be shadowed.
//!
//! Rather than a single visitor-parameterized `crawl_tree` entry point, this
//! module exposes the handful of concrete traversals the rest of the engine
//! actually needs (`crawl_read`, `crawl_write`, `crawl_blocknos`,
//! `crawl_truncate`); they share the same recursive shape and the same
//! commit-mode decision table, just specialized per operation so the
//! traversal state (a caller-provided byte slice) stays ordinary borrowed
//! data instead of going through a dynamic visitor.

use crate::alloc::BitmapAllocator;
use crate::block::{alloc_block, cow_block, cow_block_entire, free_block};
use crate::error::{CrawlError, TreeError};
use crate::tree;
use bpfs_api::controller::Device;
use bpfs_api::types::{TreeRoot, BLOCK_SIZE, CHILDREN_PER_INDIR, INVALID_ADDR, MAX_HEIGHT};
use log::warn;

/// The commit mode a crawl step runs under (§4.4 of the design this engine
/// implements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Read-only; never mutates.
    None,
    /// The region is not yet referenced persistently; mutate in place.
    Free,
    /// Mutate into a newly allocated shadow; re-point the parent.
    Copy,
    /// Mutate in place via a single atomic pointer/byte-span store if the
    /// range touches exactly one child; otherwise downgrades to `Copy`.
    Atomic,
}

fn child_mode(parent: CrawlMode, children_spanned: u64) -> CrawlMode {
    match parent {
        CrawlMode::Atomic if children_spanned == 1 => CrawlMode::Atomic,
        CrawlMode::Atomic => CrawlMode::Copy,
        other => other,
    }
}

fn span_range(height: u8, off: u64, size: u64) -> (u64, u64) {
    let span = tree::child_span(height);
    let first = off / span;
    let last = (off + size - 1) / span;
    (first, last)
}

/// Read `size` bytes starting at `off` from the tree rooted at `root`.
/// Holes (unallocated regions) read as zero.
pub fn crawl_read(device: &Device, root: TreeRoot, off: u64, size: u64, out: &mut [u8]) -> Result<(), CrawlError> {
    debug_assert_eq!(out.len() as u64, size);
    read_node(device, root.addr(), root.height(), off, size, out)
}

fn read_node(device: &Device, addr: u64, height: u8, off: u64, size: u64, out: &mut [u8]) -> Result<(), CrawlError> {
    if size == 0 {
        return Ok(());
    }
    if height == 0 {
        if addr == INVALID_ADDR {
            out.iter_mut().for_each(|b| *b = 0);
        } else {
            let blk = device.read_block(addr)?;
            blk.read_data(out, off)?;
        }
        return Ok(());
    }
    let (first, last) = span_range(height, off, size);
    let span = tree::child_span(height);
    let mut pos = 0usize;
    for i in first..=last {
        let child_start = i * span;
        let lo = off.max(child_start);
        let hi = (off + size).min(child_start + span);
        let sub_size = hi - lo;
        let sub_off = lo - child_start;
        let child_addr = if addr == INVALID_ADDR {
            INVALID_ADDR
        } else {
            device.read_block(addr)?.read_u64(i * 8)?
        };
        let slice = &mut out[pos..pos + sub_size as usize];
        read_node(device, child_addr, height - 1, sub_off, sub_size, slice)?;
        pos += sub_size as usize;
    }
    Ok(())
}

/// Grow the tree rooted at `addr` (currently of `height`) by one level,
/// wrapping the old root as child 0 of a fresh indirect block.
fn grow_height(device: &mut Device, balloc: &mut BitmapAllocator, addr: u64) -> Result<u64, TreeError> {
    let new_no = alloc_block(device, balloc)?;
    if addr != INVALID_ADDR {
        let mut blk = device.read_block(new_no)?;
        blk.write_u64(0, addr)?;
        device.write_block(&blk)?;
    }
    Ok(new_no)
}

/// Write `data` (`data.len() == size`) at `off` into the tree rooted at
/// `root`, growing its height first if the write would exceed current
/// capacity. Returns the new tree root; the caller decides how to publish
/// it into the record that embeds it (inode or superblock).
pub fn crawl_write(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    root: TreeRoot,
    off: u64,
    size: u64,
    data: &[u8],
    mode: CrawlMode,
) -> Result<TreeRoot, CrawlError> {
    debug_assert_eq!(data.len() as u64, size);
    let needed = off + size;
    let mut height = root.height();
    let mut addr = root.addr();
    while tree::capacity_bytes(height) < needed {
        if height >= MAX_HEIGHT {
            return Err(TreeError::HeightOverflow.into());
        }
        addr = grow_height(device, balloc, addr)?;
        height += 1;
    }
    let valid = root.nbytes.min(tree::capacity_bytes(height));
    let new_addr = write_node(device, balloc, addr, height, off, size, valid, data, mode)?;
    let new_nbytes = root.nbytes.max(off + size);
    Ok(TreeRoot::new(height, new_addr, new_nbytes))
}

fn write_node(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    addr: u64,
    height: u8,
    off: u64,
    size: u64,
    valid: u64,
    data: &[u8],
    mode: CrawlMode,
) -> Result<u64, CrawlError> {
    if height == 0 {
        if size > BLOCK_SIZE {
            return Err(CrawlError::OversizedLeafWrite(size));
        }
        let materialize = addr == INVALID_ADDR;
        let in_place = materialize || mode == CrawlMode::Free;
        let new_addr = if in_place {
            let real = if materialize { alloc_block(device, balloc)? } else { addr };
            let mut blk = device.read_block(real)?;
            blk.write_data(data, off)?;
            device.write_block(&blk)?;
            real
        } else if mode == CrawlMode::Atomic && size <= 8 && off % 8 == 0 {
            let mut blk = device.read_block(addr)?;
            blk.write_data(data, off)?;
            device.write_block(&blk)?;
            addr
        } else {
            if mode == CrawlMode::Atomic {
                warn!("downgrading ATOMIC to COPY for a {}-byte leaf write at offset {}", size, off);
            }
            let shadow = cow_block(device, balloc, addr, off, size, valid)?;
            let mut blk = device.read_block(shadow)?;
            blk.write_data(data, off)?;
            device.write_block(&blk)?;
            shadow
        };
        return Ok(new_addr);
    }

    let (first, last) = span_range(height, off, size);
    let children_spanned = last - first + 1;
    let sub_mode = child_mode(mode, children_spanned);

    let materialize = addr == INVALID_ADDR;
    let mut node_addr = if materialize { alloc_block(device, balloc)? } else { addr };
    let mut node_is_shadow = materialize || mode == CrawlMode::Free;

    let span = tree::child_span(height);
    let mut pos = 0usize;
    for i in first..=last {
        let child_start = i * span;
        let lo = off.max(child_start);
        let hi = (off + size).min(child_start + span);
        let sub_size = hi - lo;
        let sub_off = lo - child_start;
        let child_valid = if valid <= child_start { 0 } else { (valid - child_start).min(span) };

        let child_old = device.read_block(node_addr)?.read_u64(i * 8)?;
        let sub_data = &data[pos..pos + sub_size as usize];
        let child_new = write_node(device, balloc, child_old, height - 1, sub_off, sub_size, child_valid, sub_data, sub_mode)?;
        pos += sub_size as usize;

        if child_new != child_old {
            if node_is_shadow {
                let mut blk = device.read_block(node_addr)?;
                blk.write_u64(i * 8, child_new)?;
                device.write_block(&blk)?;
            } else if mode == CrawlMode::Atomic && children_spanned == 1 {
                let mut blk = device.read_block(node_addr)?;
                blk.write_u64(i * 8, child_new)?;
                device.write_block(&blk)?;
            } else {
                if mode == CrawlMode::Atomic {
                    warn!("downgrading ATOMIC to COPY: write spans {} children", children_spanned);
                }
                let shadow = cow_block_entire(device, balloc, node_addr)?;
                let mut blk = device.read_block(shadow)?;
                blk.write_u64(i * 8, child_new)?;
                device.write_block(&blk)?;
                node_addr = shadow;
                node_is_shadow = true;
            }
        }
    }
    Ok(node_addr)
}

/// Collect every block number reachable from `root`, root block included,
/// in traversal order. Used by truncation and by mount-time discovery.
pub fn crawl_blocknos(device: &Device, root: TreeRoot) -> Result<Vec<u64>, CrawlError> {
    let mut out = Vec::new();
    collect_blocknos(device, root.addr(), root.height(), &mut out)?;
    Ok(out)
}

fn collect_blocknos(device: &Device, addr: u64, height: u8, out: &mut Vec<u64>) -> Result<(), CrawlError> {
    if addr == INVALID_ADDR {
        return Ok(());
    }
    out.push(addr);
    if height > 0 {
        let blk = device.read_block(addr)?;
        for i in 0..CHILDREN_PER_INDIR {
            let child = blk.read_u64(i * 8)?;
            collect_blocknos(device, child, height - 1, out)?;
        }
    }
    Ok(())
}

/// Free every block reachable from `root`.
pub fn crawl_free_all(device: &Device, balloc: &mut BitmapAllocator, root: TreeRoot) -> Result<(), CrawlError> {
    for addr in crawl_blocknos(device, root)? {
        free_block(balloc, addr)?;
    }
    Ok(())
}

fn free_subtree(device: &Device, balloc: &mut BitmapAllocator, addr: u64, height: u8) -> Result<(), CrawlError> {
    if addr == INVALID_ADDR {
        return Ok(());
    }
    if height > 0 {
        let blk = device.read_block(addr)?;
        for i in 0..CHILDREN_PER_INDIR {
            let child = blk.read_u64(i * 8)?;
            free_subtree(device, balloc, child, height - 1)?;
        }
    }
    free_block(balloc, addr)?;
    Ok(())
}

fn truncate_free_subtree(device: &mut Device, balloc: &mut BitmapAllocator, addr: u64, height: u8, new_size: u64) -> Result<u64, CrawlError> {
    if addr == INVALID_ADDR || height == 0 {
        return Ok(addr);
    }
    let span = tree::child_span(height);
    let mut blk = device.read_block(addr)?;
    let mut changed = false;
    for i in 0..CHILDREN_PER_INDIR {
        let child_start = i * span;
        let child = blk.read_u64(i * 8)?;
        if child == INVALID_ADDR {
            continue;
        }
        if child_start >= new_size {
            free_subtree(device, balloc, child, height - 1)?;
            blk.write_u64(i * 8, INVALID_ADDR)?;
            changed = true;
        } else if child_start + span > new_size {
            let new_child = truncate_free_subtree(device, balloc, child, height - 1, new_size - child_start)?;
            if new_child != child {
                blk.write_u64(i * 8, new_child)?;
                changed = true;
            }
        }
    }
    if changed {
        device.write_block(&blk)?;
    }
    Ok(addr)
}

fn shrink_one_level(device: &Device, balloc: &mut BitmapAllocator, addr: u64) -> Result<u64, CrawlError> {
    let blk = device.read_block(addr)?;
    let child0 = blk.read_u64(0)?;
    free_block(balloc, addr)?;
    Ok(child0)
}

/// Shrink or (trivially) grow the tree rooted at `root` so it describes
/// `new_size` bytes.
///
/// Shrinking frees every block wholly beyond `new_size` and then collapses
/// tree height while it remains sufficient. Growing the logical size
/// without writing any bytes costs nothing: bytes beyond the old `nbytes`
/// already read as holes.
pub fn crawl_truncate(device: &mut Device, balloc: &mut BitmapAllocator, root: TreeRoot, new_size: u64) -> Result<TreeRoot, CrawlError> {
    if new_size >= root.nbytes {
        return Ok(root.with_nbytes(new_size));
    }
    let mut addr = truncate_free_subtree(device, balloc, root.addr(), root.height(), new_size)?;
    let mut height = root.height();
    while height > 0 && tree::capacity_bytes(height - 1) >= new_size && addr != INVALID_ADDR {
        addr = shrink_one_level(device, balloc, addr)?;
        height -= 1;
    }
    Ok(TreeRoot::new(height, addr, new_size))
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
    fn write_then_read_small_file() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let root = crawl_write(&mut dev, &mut balloc, root, 0, 5, b"hello", CrawlMode::Copy).unwrap();
        assert_eq!(root.nbytes, 5);
        let mut out = [0u8; 5];
        crawl_read(&dev, root, 0, 5, &mut out).unwrap();
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn write_past_first_leaf_creates_indirect_and_hole() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let off = BLOCK_SIZE * 2;
        let root = crawl_write(&mut dev, &mut balloc, root, off, 1, b"X", CrawlMode::Copy).unwrap();
        assert_eq!(root.nbytes, off + 1);
        assert!(root.height() >= 1);

        let mut out = vec![0u8; (off + 1) as usize];
        crawl_read(&dev, root, 0, off + 1, &mut out).unwrap();
        assert!(out[..off as usize].iter().all(|&b| b == 0));
        assert_eq!(out[off as usize], b'X');
    }

    #[test]
    fn truncate_shrinks_and_frees_blocks() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let root = crawl_write(&mut dev, &mut balloc, root, BLOCK_SIZE * 2, 1, b"X", CrawlMode::Copy).unwrap();
        balloc.commit();
        let before = balloc.in_use();

        let root = crawl_truncate(&mut dev, &mut balloc, root, 1).unwrap();
        balloc.commit();
        assert_eq!(root.nbytes, 1);
        assert!(balloc.in_use() < before);

        let mut out = [0u8; 1];
        crawl_read(&dev, root, 0, 1, &mut out).unwrap();
        assert_eq!(out[0], 0);
    }
}
