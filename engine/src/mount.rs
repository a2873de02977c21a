//! Mount-time discovery.
//!
//! Block and inode bitmaps are never written to media — they are
//! reconstructed here by walking the inode tree and every directory's
//! entries. Per-inode link counts are ephemeral in the same sense and are
//! only recomputed (and repaired on disk) when the superblock's
//! `ephemeral_valid` flag says the last recorded counts cannot be trusted.

use crate::alloc::BitmapAllocator;
use crate::crawl::{crawl_blocknos, CrawlMode};
use crate::crawl_adapters::{crawl_inodes, write_inode};
use crate::dirent::list;
use crate::error::{FsError, Result};
use crate::txn::Txn;
use bpfs_api::controller::Device;
use bpfs_api::types::{FileType, SuperBlock, FIRST_ALLOCATABLE_BLOCK, INODE_SIZE, ROOT_INUM};
use log::{info, warn};
use std::collections::HashMap;

/// Everything discovered about a mounted file system that is not itself
/// stored on media.
pub struct MountState {
    /// Block allocator, with every block reachable from the inode tree or
    /// any live file's data tree marked in use.
    pub block_alloc: BitmapAllocator,
    /// Inode allocator, with every inode that has `nlinks > 0` marked in
    /// use.
    pub inode_alloc: BitmapAllocator,
    /// Child inode number -> parent inode number, since `..` is not stored
    /// on media.
    pub parent_of: HashMap<u64, u64>,
}

fn id_of_block_no(block_no: u64) -> u64 {
    block_no - FIRST_ALLOCATABLE_BLOCK
}

/// Walk the whole file system, computing the bitmaps and parent map fresh.
/// Does not touch the device.
fn discover_readonly(device: &Device, superblock: &SuperBlock) -> Result<(MountState, HashMap<u64, u32>)> {
    let mut block_alloc = BitmapAllocator::new(superblock.nblocks.saturating_sub(FIRST_ALLOCATABLE_BLOCK));
    let inode_capacity = superblock.inode_root.nbytes / INODE_SIZE;
    let mut inode_alloc = BitmapAllocator::new(inode_capacity);
    let mut nlinks: HashMap<u64, u32> = HashMap::new();
    let mut parent_of: HashMap<u64, u64> = HashMap::new();

    for block_no in crawl_blocknos(device, superblock.inode_root)? {
        block_alloc.ensure_set(id_of_block_no(block_no));
    }

    *nlinks.entry(ROOT_INUM).or_insert(0) += 1;
    parent_of.insert(ROOT_INUM, ROOT_INUM);

    let inodes = crawl_inodes(device, superblock.inode_root)?;
    for inode in &inodes {
        if inode.disk.nlinks == 0 {
            continue;
        }
        inode_alloc.ensure_set(inode.inum - 1);
        for block_no in crawl_blocknos(device, inode.disk.tree_root)? {
            block_alloc.ensure_set(id_of_block_no(block_no));
        }
        if inode.file_type() == FileType::Directory {
            for entry in list(device, inode.disk.tree_root)? {
                *nlinks.entry(entry.ino).or_insert(0) += 1;
                parent_of.insert(entry.ino, inode.inum);
                if entry.file_type == FileType::Directory {
                    *nlinks.entry(entry.ino).or_insert(0) += 1;
                }
            }
        }
    }

    Ok((
        MountState {
            block_alloc,
            inode_alloc,
            parent_of,
        },
        nlinks,
    ))
}

/// Mount `superblock`, reconstructing its bitmaps and, if the recorded
/// link counts are not known to be valid, repairing them in place.
/// Returns the (possibly updated) superblock alongside the discovered
/// state.
pub fn mount(device: &mut Device, mut superblock: SuperBlock) -> Result<(SuperBlock, MountState)> {
    let (mut state, nlinks) = discover_readonly(device, &superblock)?;

    if !superblock.ephemeral_valid {
        info!("ephemeral link counts marked invalid at mount; repairing");
        let inodes = crawl_inodes(device, superblock.inode_root)?;
        let mut inode_root = superblock.inode_root;
        let mut txn = Txn::begin(device, &mut state.block_alloc, &mut state.inode_alloc);
        for inode in &inodes {
            let expected = nlinks.get(&inode.inum).copied().unwrap_or(0);
            if inode.disk.nlinks != expected {
                let mut fixed = inode.disk;
                fixed.nlinks = expected;
                inode_root = write_inode(txn.device(), txn.block_alloc(), inode_root, inode.inum, &fixed, CrawlMode::Free)?;
            }
        }
        superblock.inode_root = inode_root;
        superblock.ephemeral_valid = true;
        txn.commit(&superblock)?;
    }

    Ok((superblock, state))
}

/// Re-derive the file system's bitmaps and compare their occupancy against
/// `expected_blocks_in_use`/`expected_inodes_in_use`, without mutating
/// anything. Used for an online consistency re-scan; a mismatch is
/// reported as [`FsError::Inconsistent`] rather than panicking, since it
/// reflects file system state, not a programming error.
pub fn rescan(device: &Device, superblock: &SuperBlock, expected_blocks_in_use: u64, expected_inodes_in_use: u64) -> Result<()> {
    let (state, _nlinks) = discover_readonly(device, superblock)?;
    if state.block_alloc.in_use() != expected_blocks_in_use {
        warn!(
            "rescan: block bitmap mismatch: recomputed {} vs tracked {}",
            state.block_alloc.in_use(),
            expected_blocks_in_use
        );
        return Err(FsError::Inconsistent("block bitmap does not match recomputed occupancy"));
    }
    if state.inode_alloc.in_use() != expected_inodes_in_use {
        warn!(
            "rescan: inode bitmap mismatch: recomputed {} vs tracked {}",
            state.inode_alloc.in_use(),
            expected_inodes_in_use
        );
        return Err(FsError::Inconsistent("inode bitmap does not match recomputed occupancy"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl_adapters::write_inode;
    use bpfs_api::types::{DInode, TreeRoot, BLOCK_SIZE};
    use tempfile::tempdir;

    fn new_device(nblocks: u64) -> (tempfile::TempDir, Device) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img");
        let dev = Device::new(path, BLOCK_SIZE, nblocks).unwrap();
        (dir, dev)
    }

    #[test]
    fn discover_marks_root_and_its_blocks() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root_disk = DInode {
            nlinks: 1,
            mode: FileType::Directory.mode_bits(),
            ..DInode::default()
        };
        let inode_root = write_inode(&mut dev, &mut balloc, TreeRoot::empty(), ROOT_INUM, &root_disk, CrawlMode::Copy).unwrap();

        let mut superblock = SuperBlock {
            nblocks: 64,
            inode_root,
            ephemeral_valid: true,
            ..SuperBlock::default()
        };

        let (superblock2, state) = mount(&mut dev, superblock).unwrap();
        superblock = superblock2;
        assert!(superblock.ephemeral_valid);
        assert!(state.inode_alloc.in_use() >= 1);
        assert!(state.block_alloc.in_use() >= 1);
    }

    #[test]
    fn ephemeral_invalid_repairs_nlinks() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root_disk = DInode {
            nlinks: 99,
            mode: FileType::Directory.mode_bits(),
            ..DInode::default()
        };
        let inode_root = write_inode(&mut dev, &mut balloc, TreeRoot::empty(), ROOT_INUM, &root_disk, CrawlMode::Copy).unwrap();
        let superblock = SuperBlock {
            nblocks: 64,
            inode_root,
            ephemeral_valid: false,
            ..SuperBlock::default()
        };

        let (superblock, _state) = mount(&mut dev, superblock).unwrap();
        assert!(superblock.ephemeral_valid);
        let fixed = crate::crawl_adapters::read_inode(&dev, superblock.inode_root, ROOT_INUM).unwrap();
        assert_eq!(fixed.disk.nlinks, 1);
    }
}
