//! The short-circuit shadow paging transaction wrapper.
//!
//! Every crawl already applies its own copy-on-write effects directly to
//! the device as it runs; what a transaction adds is (a) a place to stage
//! block/inode allocator changes so a failed operation can be undone
//! without leaving the bitmaps wrong, and (b) the single publish step —
//! writing the new superblock — that is the actual atomic commit point. A
//! transaction that aborts leaves behind orphaned shadow blocks, which is
//! fine: they are simply unreachable garbage until the allocator's bitmap
//! (restored to its pre-transaction state) hands their ids out again.

use crate::alloc::BitmapAllocator;
use crate::crawl::CrawlMode;
use crate::crawl_adapters::crawl_data_2;
use crate::error::{FsError, Result};
use bpfs_api::controller::Device;
use bpfs_api::types::{DInode, TreeRoot, CommitMode, SuperBlock, FORMAT_VERSION, MAGIC, SUPERBLOCK_PRIMARY, SUPERBLOCK_SECONDARY};

/// A superblock copy is self-consistent if its magic/version are the ones
/// this crate understands *and* its two redundant inode-root fields agree.
/// The two fields are always written equal by `Txn::commit`; disagreement
/// means this copy was torn by a crash mid-write and the other copy (or a
/// repair) must be consulted instead.
fn self_consistent(sb: &SuperBlock) -> bool {
    sb.magic == MAGIC && sb.version == FORMAT_VERSION && sb.inode_root == sb.inode_root_2
}

/// Read whichever superblock copy is self-consistent, preferring the
/// primary.
///
/// There is no attempt to repair a corrupt copy from its sibling; the two
/// copies are kept byte-identical, so the only time they legitimately
/// differ is mid-crash, in which case the self-consistent one is simply
/// the last one the previous transaction managed to publish.
pub fn read_superblock(device: &Device) -> Result<SuperBlock> {
    let primary = device.read_block(SUPERBLOCK_PRIMARY)?.deserialize_from::<SuperBlock>(0);
    if let Ok(sb) = &primary {
        if self_consistent(sb) {
            return Ok(*sb);
        }
    }
    let secondary = device.read_block(SUPERBLOCK_SECONDARY)?.deserialize_from::<SuperBlock>(0);
    if let Ok(sb) = &secondary {
        if self_consistent(sb) {
            return Ok(*sb);
        }
    }
    Err(FsError::Inconsistent("neither superblock copy is self-consistent"))
}

fn write_superblock_copy(device: &mut Device, block_no: u64, sb: &SuperBlock) -> Result<()> {
    let mut blk = device.read_block(block_no)?;
    blk.serialize_into(sb, 0)?;
    device.write_block(&blk)?;
    Ok(())
}

/// Publish `sb` as the new committed superblock. In `ShortCircuit` mode the
/// primary copy's write is the actual atomic publish point and the
/// secondary is refreshed to match immediately after (it only matters if
/// the primary is ever found corrupt); in `ShadowPaging` mode the
/// secondary is written first so a crash between the two writes always
/// leaves the primary as the self-consistent copy.
fn publish_superblock(device: &mut Device, sb: &SuperBlock) -> Result<()> {
    match CommitMode::from_u8(sb.commit_mode).expect("corrupt superblock commit mode") {
        CommitMode::ShortCircuit => {
            write_superblock_copy(device, SUPERBLOCK_PRIMARY, sb)?;
            write_superblock_copy(device, SUPERBLOCK_SECONDARY, sb)?;
        }
        CommitMode::ShadowPaging => {
            write_superblock_copy(device, SUPERBLOCK_SECONDARY, sb)?;
            write_superblock_copy(device, SUPERBLOCK_PRIMARY, sb)?;
        }
    }
    Ok(())
}

/// A single file-system operation's transaction scope.
///
/// Borrows the device and both allocators for its lifetime; callers crawl
/// through them directly (via `crawl`/`crawl_adapters`/`dirent`) and then
/// either `commit` with the resulting superblock or `abort`.
pub struct Txn<'a> {
    device: &'a mut Device,
    block_alloc: &'a mut BitmapAllocator,
    inode_alloc: &'a mut BitmapAllocator,
}

impl<'a> Txn<'a> {
    /// Begin a transaction over the given device and allocators.
    pub fn begin(device: &'a mut Device, block_alloc: &'a mut BitmapAllocator, inode_alloc: &'a mut BitmapAllocator) -> Txn<'a> {
        Txn {
            device,
            block_alloc,
            inode_alloc,
        }
    }

    /// Borrow the device mutably, for crawl operations run within this
    /// transaction.
    pub fn device(&mut self) -> &mut Device {
        self.device
    }

    /// Borrow the block allocator mutably.
    pub fn block_alloc(&mut self) -> &mut BitmapAllocator {
        self.block_alloc
    }

    /// Borrow the inode allocator mutably.
    pub fn inode_alloc(&mut self) -> &mut BitmapAllocator {
        self.inode_alloc
    }

    /// Publish `superblock` as the new committed state and retire staged
    /// allocator changes. This is the transaction's one durability point.
    ///
    /// `inode_root_2` is always synced to `inode_root` here, regardless of
    /// what the caller set it to, so every published copy is self-consistent
    /// by construction and no `Fs` call site needs to manage it itself.
    pub fn commit(self, superblock: &SuperBlock) -> Result<()> {
        let mut sb = *superblock;
        sb.inode_root_2 = sb.inode_root;
        publish_superblock(self.device, &sb)?;
        self.block_alloc.commit();
        self.inode_alloc.commit();
        Ok(())
    }

    /// Discard every staged allocator change made during this transaction,
    /// without publishing anything. Blocks written during the aborted
    /// transaction stay physically on the device but are unreachable once
    /// the allocator bitmap forgets they were ever claimed.
    pub fn abort(self) {
        self.block_alloc.abort();
        self.inode_alloc.abort();
    }
}

impl<'a> Drop for Txn<'a> {
    /// A `Txn` dropped without an explicit `commit` or `abort` — because an
    /// operation returned early via `?` — must still unwind its staged
    /// allocator changes. `BitmapAllocator::abort` is idempotent against an
    /// already-committed or already-aborted allocator (its staged lists are
    /// empty by then), so this is safe to run unconditionally.
    fn drop(&mut self) {
        self.block_alloc.abort();
        self.inode_alloc.abort();
    }
}

fn inode_offset(inum: u64) -> u64 {
    (inum - 1) * bpfs_api::types::INODE_SIZE
}

/// Write two distinct inode records into the same inode tree as a single
/// two-site crawl, returning the tree's new root. Used by `rename`, which
/// must publish both the source and destination directory inodes (updated
/// data-tree roots) together so no intermediate state — new entry present
/// but old one not yet gone, or vice versa — is ever what a crash leaves
/// durable.
///
/// # Panics
/// Panics if `inum_a == inum_b`; writing the same record twice in one
/// crawl is not meaningful and indicates a caller bug.
pub fn write_inodes_2(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    inode_root: TreeRoot,
    inum_a: u64,
    disk_a: &DInode,
    inum_b: u64,
    disk_b: &DInode,
    mode: CrawlMode,
) -> Result<TreeRoot> {
    assert_ne!(inum_a, inum_b, "write_inodes_2 called with the same inode number twice");
    let bytes_a = bincode::serialize(disk_a).map_err(bpfs_api::error::APIError::from)?;
    let bytes_b = bincode::serialize(disk_b).map_err(bpfs_api::error::APIError::from)?;
    let (_intermediate, combined) = crawl_data_2(
        device,
        balloc,
        inode_root,
        inode_offset(inum_a),
        &bytes_a,
        inode_root,
        inode_offset(inum_b),
        &bytes_b,
        mode,
    )?;
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl_adapters::{read_inode, write_inode};
    use bpfs_api::types::{FileType, BLOCK_SIZE};
    use tempfile::tempdir;

    fn new_device(nblocks: u64) -> (tempfile::TempDir, Device) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img");
        let dev = Device::new(path, BLOCK_SIZE, nblocks).unwrap();
        (dir, dev)
    }

    #[test]
    fn commit_publishes_self_consistent_superblock() {
        let (_dir, mut dev) = new_device(64);
        let mut block_alloc = BitmapAllocator::new(32);
        let mut inode_alloc = BitmapAllocator::new(8);

        let sb = SuperBlock {
            nblocks: 64,
            ..SuperBlock::default()
        };

        let txn = Txn::begin(&mut dev, &mut block_alloc, &mut inode_alloc);
        txn.commit(&sb).unwrap();

        let back = read_superblock(&dev).unwrap();
        assert_eq!(back.nblocks, 64);
    }

    #[test]
    fn read_superblock_falls_back_when_primary_root_pointers_disagree() {
        let (_dir, mut dev) = new_device(64);
        let mut block_alloc = BitmapAllocator::new(32);
        let mut inode_alloc = BitmapAllocator::new(8);

        let sb = SuperBlock {
            nblocks: 64,
            ..SuperBlock::default()
        };
        let txn = Txn::begin(&mut dev, &mut block_alloc, &mut inode_alloc);
        txn.commit(&sb).unwrap();

        // Corrupt only the primary copy's self-consistency, as a torn
        // mid-write crash would: magic/version intact, but the two root
        // fields no longer agree.
        let mut torn = sb;
        torn.inode_root_2 = TreeRoot::empty();
        torn.inode_root = write_inode(
            &mut dev,
            &mut block_alloc,
            TreeRoot::empty(),
            1,
            &DInode {
                uid: 99,
                ..DInode::default()
            },
            CrawlMode::Copy,
        )
        .unwrap();
        write_superblock_copy(&mut dev, SUPERBLOCK_PRIMARY, &torn).unwrap();

        let back = read_superblock(&dev).unwrap();
        assert_eq!(back.inode_root, sb.inode_root);
        assert_eq!(back.inode_root, back.inode_root_2);
    }

    #[test]
    fn abort_restores_allocator_state() {
        let (_dir, mut dev) = new_device(64);
        let mut block_alloc = BitmapAllocator::new(32);
        let mut inode_alloc = BitmapAllocator::new(8);

        {
            let mut txn = Txn::begin(&mut dev, &mut block_alloc, &mut inode_alloc);
            txn.block_alloc().alloc().unwrap();
            txn.abort();
        }
        assert_eq!(block_alloc.in_use(), 0);
    }

    #[test]
    fn write_inodes_2_publishes_both_records() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let a = DInode {
            uid: 1,
            mode: FileType::Directory.mode_bits(),
            nlinks: 1,
            ..DInode::default()
        };
        let root = write_inode(&mut dev, &mut balloc, TreeRoot::empty(), 1, &a, CrawlMode::Copy).unwrap();

        let mut a2 = a;
        a2.uid = 11;
        let b = DInode {
            uid: 2,
            mode: FileType::Directory.mode_bits(),
            nlinks: 1,
            ..DInode::default()
        };
        let root = write_inodes_2(&mut dev, &mut balloc, root, 1, &a2, 2, &b, CrawlMode::Copy).unwrap();

        assert_eq!(read_inode(&dev, root, 1).unwrap().disk.uid, 11);
        assert_eq!(read_inode(&dev, root, 2).unwrap().disk.uid, 2);
    }
}
