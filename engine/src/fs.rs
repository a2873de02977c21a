//! The file system operation surface: a single concrete `Fs` over a
//! mounted device, its allocators, and the in-memory directory parent map.
//!
//! Every mutating method opens a [`Txn`], crawls whatever it needs to
//! through it, and finishes by publishing an updated superblock through
//! `Txn::commit` — the one place a change becomes durable. A method that
//! returns an error before reaching `commit` has left the device with
//! nothing but orphaned shadow blocks, cleaned up by the allocator's
//! `abort` (called implicitly by dropping the `Txn` without committing).

use crate::alloc::BitmapAllocator;
use crate::crawl::{self, CrawlMode};
use crate::crawl_adapters::{crawl_data_read, crawl_data_write, read_inode, write_inode};
use crate::dirent::{self, DirEntry};
use crate::error::{AllocError, FsError, Result};
use crate::mount;
use crate::txn::{read_superblock, write_inodes_2, Txn};
use bpfs_api::controller::Device;
use bpfs_api::types::{
    dirent_max_name_len, CommitMode, DInode, FileType, Inode, SuperBlock, TreeRoot, BLOCK_SIZE, INODES_PER_LEAF, ROOT_INUM,
};
use log::info;
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

/// Parameters for formatting a fresh file system.
#[derive(Debug, Clone, Copy)]
pub struct MkfsOptions {
    /// Total number of blocks the device should have, superblock copies
    /// included.
    pub nblocks: u64,
    /// Which superblock publication scheme to use.
    pub commit_mode: CommitMode,
}

/// Point-in-time occupancy, for `statvfs`-style reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    /// Total blocks available for allocation (excludes the reserved
    /// region).
    pub total_blocks: u64,
    /// Blocks currently allocated.
    pub used_blocks: u64,
    /// Total inode slots the inode tree currently spans.
    pub total_inodes: u64,
    /// Inode slots currently in use.
    pub used_inodes: u64,
}

/// A mounted, ready-to-use file system.
pub struct Fs {
    device: Device,
    superblock: SuperBlock,
    block_alloc: BitmapAllocator,
    inode_alloc: BitmapAllocator,
    parent_of: HashMap<u64, u64>,
}

impl Fs {
    /// Format a fresh image at `path` and mount it.
    pub fn mkfs<P: AsRef<Path>>(path: P, opts: &MkfsOptions) -> Result<Fs> {
        let mut device = Device::new(path, BLOCK_SIZE, opts.nblocks)?;
        let mut block_alloc = BitmapAllocator::new(opts.nblocks.saturating_sub(bpfs_api::types::FIRST_ALLOCATABLE_BLOCK));
        let mut inode_alloc = BitmapAllocator::new(0);
        inode_alloc.resize(INODES_PER_LEAF)?;
        inode_alloc.alloc()?; // reserve slot 0 (ROOT_INUM) up front
        inode_alloc.commit();

        let root_disk = DInode {
            generation: 1,
            mode: FileType::Directory.mode_bits() | 0o755,
            nlinks: 2,
            ..DInode::default()
        };

        let mut sb = SuperBlock {
            nblocks: opts.nblocks,
            commit_mode: opts.commit_mode as u8,
            ephemeral_valid: true,
            next_generation: 2,
            ..SuperBlock::default()
        };

        let mut txn = Txn::begin(&mut device, &mut block_alloc, &mut inode_alloc);
        let inode_root = write_inode(txn.device(), txn.block_alloc(), TreeRoot::empty(), ROOT_INUM, &root_disk, CrawlMode::Copy)?;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;

        info!("formatted {} blocks, root inode at generation 1", opts.nblocks);
        Ok(Fs {
            device,
            superblock: sb,
            block_alloc,
            inode_alloc,
            parent_of: HashMap::from([(ROOT_INUM, ROOT_INUM)]),
        })
    }

    /// Mount an existing image at `path`.
    pub fn mountfs<P: AsRef<Path>>(path: P, nblocks: u64) -> Result<Fs> {
        let mut device = Device::load(path, BLOCK_SIZE, nblocks)?;
        let superblock = read_superblock(&device)?;
        let (superblock, state) = mount::mount(&mut device, superblock)?;
        Ok(Fs {
            device,
            superblock,
            block_alloc: state.block_alloc,
            inode_alloc: state.inode_alloc,
            parent_of: state.parent_of,
        })
    }

    /// Unmount, flushing outstanding writes (done implicitly by `Device`'s
    /// `Drop`).
    pub fn unmountfs(self) {}

    /// Re-derive bitmaps and compare them against what this session has
    /// been tracking, without mutating anything.
    pub fn rescan(&self) -> Result<()> {
        mount::rescan(&self.device, &self.superblock, self.block_alloc.in_use(), self.inode_alloc.in_use())
    }

    /// Occupancy snapshot.
    pub fn statvfs(&self) -> FsStats {
        FsStats {
            total_blocks: self.block_alloc.total(),
            used_blocks: self.block_alloc.in_use(),
            total_inodes: self.inode_alloc.total(),
            used_inodes: self.inode_alloc.in_use(),
        }
    }

    /// Fetch an inode's record.
    pub fn getattr(&self, inum: u64) -> Result<Inode> {
        Ok(read_inode(&self.device, self.superblock.inode_root, inum)?)
    }

    fn require_dir(&self, inum: u64) -> Result<Inode> {
        let inode = self.getattr(inum)?;
        if inode.file_type() != FileType::Directory {
            return Err(FsError::NotADirectory);
        }
        Ok(inode)
    }

    /// Resolve `name` within `dir_inum`, including the synthetic `.` and
    /// `..` names.
    pub fn lookup(&self, dir_inum: u64, name: &[u8]) -> Result<u64> {
        let dir = self.require_dir(dir_inum)?;
        if name == b"." {
            return Ok(dir_inum);
        }
        if name == b".." {
            return Ok(self.parent_of.get(&dir_inum).copied().unwrap_or(dir_inum));
        }
        dirent::find(&self.device, dir.disk.tree_root, name)?.map(|(ino, _)| ino).ok_or(FsError::NotFound)
    }

    /// List every entry in a directory, including the synthetic `.` and
    /// `..` back-references that are never stored on media.
    pub fn readdir(&self, dir_inum: u64) -> Result<Vec<DirEntry>> {
        let dir = self.require_dir(dir_inum)?;
        let parent_inum = self.parent_of.get(&dir_inum).copied().unwrap_or(dir_inum);
        let mut out = vec![
            DirEntry {
                name: b".".to_vec(),
                ino: dir_inum,
                file_type: FileType::Directory,
            },
            DirEntry {
                name: b"..".to_vec(),
                ino: parent_inum,
                file_type: FileType::Directory,
            },
        ];
        out.extend(dirent::list(&self.device, dir.disk.tree_root)?);
        Ok(out)
    }

    /// Read up to `buf.len()` bytes at `off`, clamped to the file's size.
    pub fn read(&self, inum: u64, off: u64, buf: &mut [u8]) -> Result<u64> {
        let inode = self.getattr(inum)?;
        if inode.file_type() == FileType::Directory {
            return Err(FsError::InvalidArgument("cannot read a directory as a file"));
        }
        Ok(crawl_data_read(&self.device, inode.disk.tree_root, off, buf)?)
    }

    /// Write `data` at `off`, extending the file if needed.
    pub fn write(&mut self, inum: u64, off: u64, data: &[u8]) -> Result<u64> {
        let inode = self.getattr(inum)?;
        if inode.file_type() == FileType::Directory {
            return Err(FsError::InvalidArgument("cannot write to a directory as a file"));
        }
        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let new_tree = crawl_data_write(txn.device(), txn.block_alloc(), inode.disk.tree_root, off, data, CrawlMode::Copy)?;
        let mut disk = inode.disk;
        disk.tree_root = new_tree;
        disk.mtime = now_secs();
        disk.ctime = disk.mtime;
        let inode_root = write_inode(txn.device(), txn.block_alloc(), self.superblock.inode_root, inum, &disk, CrawlMode::Copy)?;
        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;
        self.superblock = sb;
        Ok(data.len() as u64)
    }

    /// Shrink or (lazily) grow a file to `new_size` bytes.
    pub fn truncate(&mut self, inum: u64, new_size: u64) -> Result<()> {
        let inode = self.getattr(inum)?;
        if inode.file_type() == FileType::Directory {
            return Err(FsError::InvalidArgument("cannot truncate a directory"));
        }
        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let new_tree = crawl::crawl_truncate(txn.device(), txn.block_alloc(), inode.disk.tree_root, new_size)?;
        let mut disk = inode.disk;
        disk.tree_root = new_tree;
        disk.ctime = now_secs();
        let inode_root = write_inode(txn.device(), txn.block_alloc(), self.superblock.inode_root, inum, &disk, CrawlMode::Copy)?;
        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;
        self.superblock = sb;
        Ok(())
    }

    /// Update mode/uid/gid in place.
    pub fn setattr(&mut self, inum: u64, mode: Option<u32>, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let inode = self.getattr(inum)?;
        let mut disk = inode.disk;
        if let Some(m) = mode {
            disk.mode = m;
        }
        if let Some(u) = uid {
            disk.uid = u;
        }
        if let Some(g) = gid {
            disk.gid = g;
        }
        disk.ctime = now_secs();
        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let inode_root = write_inode(txn.device(), txn.block_alloc(), self.superblock.inode_root, inum, &disk, CrawlMode::Copy)?;
        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;
        self.superblock = sb;
        Ok(())
    }

    fn alloc_inode(&mut self) -> Result<u64> {
        match self.inode_alloc.alloc() {
            Ok(id) => Ok(id + 1),
            Err(AllocError::NoSpace) => {
                let new_total = self.inode_alloc.total() + INODES_PER_LEAF;
                self.inode_alloc.resize(new_total)?;
                Ok(self.inode_alloc.alloc()? + 1)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a new entry of any type named by `mode`'s type bits (regular
    /// file, device node, fifo, socket — not a directory; see `mkdir`) in
    /// `dir_inum`.
    pub fn create(&mut self, dir_inum: u64, name: &[u8], mode: u32) -> Result<u64> {
        if name.len() as u64 > dirent_max_name_len() {
            return Err(FsError::NameTooLong);
        }
        let ft = FileType::from_mode(mode).ok_or(FsError::InvalidArgument("mode has no recognized file-type bits"))?;
        if ft == FileType::Directory {
            return Err(FsError::InvalidArgument("use mkdir to create a directory"));
        }
        let dir = self.require_dir(dir_inum)?;
        if dirent::find(&self.device, dir.disk.tree_root, name)?.is_some() {
            return Err(FsError::Exists);
        }

        let inum = self.alloc_inode()?;
        let generation = self.superblock.next_generation;
        let now = now_secs();
        let new_disk = DInode {
            generation,
            mode,
            nlinks: 1,
            atime: now,
            mtime: now,
            ctime: now,
            ..DInode::default()
        };

        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let new_dir_tree = dirent::insert(txn.device(), txn.block_alloc(), dir.disk.tree_root, name, inum, ft, CrawlMode::Copy)?;
        let mut dir_disk = dir.disk;
        dir_disk.tree_root = new_dir_tree;
        dir_disk.mtime = now;
        dir_disk.ctime = now;
        let inode_root = write_inodes_2(txn.device(), txn.block_alloc(), self.superblock.inode_root, dir_inum, &dir_disk, inum, &new_disk, CrawlMode::Copy)?;

        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        sb.next_generation += 1;
        txn.commit(&sb)?;
        self.superblock = sb;
        self.parent_of.insert(inum, dir_inum);
        Ok(inum)
    }

    /// Create a directory named `name` in `dir_inum`.
    pub fn mkdir(&mut self, dir_inum: u64, name: &[u8], perm: u32) -> Result<u64> {
        if name.len() as u64 > dirent_max_name_len() {
            return Err(FsError::NameTooLong);
        }
        let dir = self.require_dir(dir_inum)?;
        if dirent::find(&self.device, dir.disk.tree_root, name)?.is_some() {
            return Err(FsError::Exists);
        }

        let inum = self.alloc_inode()?;
        let generation = self.superblock.next_generation;
        let now = now_secs();
        let new_disk = DInode {
            generation,
            mode: FileType::Directory.mode_bits() | (perm & 0o7777),
            nlinks: 2,
            atime: now,
            mtime: now,
            ctime: now,
            ..DInode::default()
        };

        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let new_dir_tree = dirent::insert(txn.device(), txn.block_alloc(), dir.disk.tree_root, name, inum, FileType::Directory, CrawlMode::Copy)?;
        let mut dir_disk = dir.disk;
        dir_disk.tree_root = new_dir_tree;
        dir_disk.nlinks += 1; // the new subdirectory's unstored ".." entry
        dir_disk.mtime = now;
        dir_disk.ctime = now;
        let inode_root = write_inodes_2(txn.device(), txn.block_alloc(), self.superblock.inode_root, dir_inum, &dir_disk, inum, &new_disk, CrawlMode::Copy)?;

        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        sb.next_generation += 1;
        txn.commit(&sb)?;
        self.superblock = sb;
        self.parent_of.insert(inum, dir_inum);
        Ok(inum)
    }

    /// Create a symbolic link named `name` in `dir_inum`, pointing at
    /// `target`.
    pub fn symlink(&mut self, dir_inum: u64, name: &[u8], target: &[u8]) -> Result<u64> {
        let inum = self.create(dir_inum, name, FileType::Symlink.mode_bits() | 0o777)?;
        self.write(inum, 0, target)?;
        Ok(inum)
    }

    /// Read a symbolic link's target.
    pub fn readlink(&self, inum: u64) -> Result<Vec<u8>> {
        let inode = self.getattr(inum)?;
        if inode.file_type() != FileType::Symlink {
            return Err(FsError::InvalidArgument("not a symbolic link"));
        }
        let mut buf = vec![0u8; inode.size() as usize];
        self.read(inum, 0, &mut buf)?;
        Ok(buf)
    }

    /// Add a new name for an existing (non-directory) inode.
    pub fn link(&mut self, dir_inum: u64, name: &[u8], target_inum: u64) -> Result<()> {
        if name.len() as u64 > dirent_max_name_len() {
            return Err(FsError::NameTooLong);
        }
        let dir = self.require_dir(dir_inum)?;
        if dirent::find(&self.device, dir.disk.tree_root, name)?.is_some() {
            return Err(FsError::Exists);
        }
        let target = self.getattr(target_inum)?;
        if target.file_type() == FileType::Directory {
            return Err(FsError::InvalidArgument("cannot hard-link a directory"));
        }
        if target.disk.nlinks == u32::MAX {
            return Err(FsError::LinkMax);
        }

        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let new_dir_tree = dirent::insert(txn.device(), txn.block_alloc(), dir.disk.tree_root, name, target_inum, target.file_type(), CrawlMode::Copy)?;
        let mut dir_disk = dir.disk;
        dir_disk.tree_root = new_dir_tree;
        let mut target_disk = target.disk;
        target_disk.nlinks += 1;
        target_disk.ctime = now_secs();
        let inode_root = write_inodes_2(
            txn.device(),
            txn.block_alloc(),
            self.superblock.inode_root,
            dir_inum,
            &dir_disk,
            target_inum,
            &target_disk,
            CrawlMode::Copy,
        )?;

        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;
        self.superblock = sb;
        Ok(())
    }

    /// Remove the name `name` from `dir_inum`, freeing the target if this
    /// was its last link. Refuses directories; use `rmdir`.
    pub fn unlink(&mut self, dir_inum: u64, name: &[u8]) -> Result<()> {
        let dir = self.require_dir(dir_inum)?;
        let (target_inum, ft) = dirent::find(&self.device, dir.disk.tree_root, name)?.ok_or(FsError::NotFound)?;
        if ft == FileType::Directory {
            return Err(FsError::InvalidArgument("use rmdir to remove a directory"));
        }
        let target = self.getattr(target_inum)?;

        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let (new_dir_tree, _) = dirent::clear_ino(txn.device(), txn.block_alloc(), dir.disk.tree_root, name, CrawlMode::Atomic)?;
        let mut dir_disk = dir.disk;
        dir_disk.tree_root = new_dir_tree;
        let mut target_disk = target.disk;
        target_disk.nlinks -= 1;
        let last_link = target_disk.nlinks == 0;
        if last_link {
            crawl::crawl_free_all(txn.device(), txn.block_alloc(), target_disk.tree_root)?;
            target_disk = DInode::default();
        }
        let inode_root = write_inodes_2(
            txn.device(),
            txn.block_alloc(),
            self.superblock.inode_root,
            dir_inum,
            &dir_disk,
            target_inum,
            &target_disk,
            CrawlMode::Copy,
        )?;

        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;
        self.superblock = sb;
        if last_link {
            self.inode_alloc.free(target_inum - 1)?;
            self.parent_of.remove(&target_inum);
        }
        Ok(())
    }

    /// Remove the empty directory named `name` from `dir_inum`.
    pub fn rmdir(&mut self, dir_inum: u64, name: &[u8]) -> Result<()> {
        let dir = self.require_dir(dir_inum)?;
        let (target_inum, ft) = dirent::find(&self.device, dir.disk.tree_root, name)?.ok_or(FsError::NotFound)?;
        if ft != FileType::Directory {
            return Err(FsError::NotADirectory);
        }
        let target = self.getattr(target_inum)?;
        if !dirent::list(&self.device, target.disk.tree_root)?.is_empty() {
            return Err(FsError::NotEmpty);
        }

        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let (new_dir_tree, _) = dirent::clear_ino(txn.device(), txn.block_alloc(), dir.disk.tree_root, name, CrawlMode::Atomic)?;
        let mut dir_disk = dir.disk;
        dir_disk.tree_root = new_dir_tree;
        dir_disk.nlinks -= 1; // the removed subdirectory's unstored ".."
        crawl::crawl_free_all(txn.device(), txn.block_alloc(), target.disk.tree_root)?;
        let inode_root = write_inodes_2(
            txn.device(),
            txn.block_alloc(),
            self.superblock.inode_root,
            dir_inum,
            &dir_disk,
            target_inum,
            &DInode::default(),
            CrawlMode::Copy,
        )?;

        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;
        self.superblock = sb;
        self.inode_alloc.free(target_inum - 1)?;
        self.parent_of.remove(&target_inum);
        Ok(())
    }

    /// Move `src_name` out of `src_dir_inum` and into `dst_dir_inum` as
    /// `dst_name`. Refuses if an entry already exists at the destination
    /// (this implementation does not support rename's atomic-replace
    /// form).
    pub fn rename(&mut self, src_dir_inum: u64, src_name: &[u8], dst_dir_inum: u64, dst_name: &[u8]) -> Result<()> {
        if dst_name.len() as u64 > dirent_max_name_len() {
            return Err(FsError::NameTooLong);
        }
        let src_dir = self.require_dir(src_dir_inum)?;
        let dst_dir = self.require_dir(dst_dir_inum)?;
        let (moved_inum, moved_ft) = dirent::find(&self.device, src_dir.disk.tree_root, src_name)?.ok_or(FsError::NotFound)?;

        // Renaming an entry onto itself is a no-op but for a ctime bump: the
        // directory entry already points where it should, so just repoint it
        // at itself through the same atomic point write a real repoint would
        // use, rather than falling into the clear+insert path below (which
        // would see the "existing" entry as a destination collision).
        if src_dir_inum == dst_dir_inum && src_name == dst_name {
            let mut moved_disk = self.getattr(moved_inum)?.disk;
            moved_disk.ctime = now_secs();
            let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
            let (repointed_tree, found) = dirent::set_ino(txn.device(), txn.block_alloc(), src_dir.disk.tree_root, src_name, moved_inum, CrawlMode::Atomic)?;
            debug_assert!(found);
            // A single 8-byte entry repoint never spans more than one child
            // slot at any tree level, so this always stays on the atomic
            // in-place path and the tree's root address never moves.
            debug_assert_eq!(repointed_tree.addr(), src_dir.disk.tree_root.addr());
            let inode_root = write_inode(txn.device(), txn.block_alloc(), self.superblock.inode_root, moved_inum, &moved_disk, CrawlMode::Copy)?;
            let mut sb = self.superblock;
            sb.inode_root = inode_root;
            txn.commit(&sb)?;
            self.superblock = sb;
            return Ok(());
        }

        if dirent::find(&self.device, dst_dir.disk.tree_root, dst_name)?.is_some() {
            return Err(FsError::Exists);
        }
        let mut moved_disk = self.getattr(moved_inum)?.disk;
        moved_disk.ctime = now_secs();

        let mut txn = Txn::begin(&mut self.device, &mut self.block_alloc, &mut self.inode_alloc);
        let inode_root = if src_dir_inum == dst_dir_inum {
            let (tree, _) = dirent::clear_ino(txn.device(), txn.block_alloc(), src_dir.disk.tree_root, src_name, CrawlMode::Atomic)?;
            let tree = dirent::insert(txn.device(), txn.block_alloc(), tree, dst_name, moved_inum, moved_ft, CrawlMode::Copy)?;
            let mut dir_disk = src_dir.disk;
            dir_disk.tree_root = tree;
            write_inodes_2(
                txn.device(),
                txn.block_alloc(),
                self.superblock.inode_root,
                src_dir_inum,
                &dir_disk,
                moved_inum,
                &moved_disk,
                CrawlMode::Copy,
            )?
        } else {
            let (new_src_tree, _) = dirent::clear_ino(txn.device(), txn.block_alloc(), src_dir.disk.tree_root, src_name, CrawlMode::Atomic)?;
            let new_dst_tree = dirent::insert(txn.device(), txn.block_alloc(), dst_dir.disk.tree_root, dst_name, moved_inum, moved_ft, CrawlMode::Copy)?;
            let mut src_disk = src_dir.disk;
            src_disk.tree_root = new_src_tree;
            let mut dst_disk = dst_dir.disk;
            dst_disk.tree_root = new_dst_tree;
            let root = write_inodes_2(
                txn.device(),
                txn.block_alloc(),
                self.superblock.inode_root,
                src_dir_inum,
                &src_disk,
                dst_dir_inum,
                &dst_disk,
                CrawlMode::Copy,
            )?;
            write_inode(txn.device(), txn.block_alloc(), root, moved_inum, &moved_disk, CrawlMode::Copy)?
        };

        let mut sb = self.superblock;
        sb.inode_root = inode_root;
        txn.commit(&sb)?;
        self.superblock = sb;
        self.parent_of.insert(moved_inum, dst_dir_inum);
        Ok(())
    }

    /// Inode number this child's parent was last recorded as, from the
    /// in-memory parent map (`..` is never stored on media).
    pub fn parent_of(&self, child_inum: u64) -> Option<u64> {
        self.parent_of.get(&child_inum).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpfs_api::types::mode_bits::S_IFREG;
    use tempfile::tempdir;

    fn fresh(nblocks: u64) -> (tempfile::TempDir, Fs) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img");
        let fs = Fs::mkfs(
            &path,
            &MkfsOptions {
                nblocks,
                commit_mode: CommitMode::ShortCircuit,
            },
        )
        .unwrap();
        (dir, fs)
    }

    #[test]
    fn mkfs_creates_empty_root_directory() {
        let (_dir, fs) = fresh(256);
        let entries = fs.readdir(ROOT_INUM).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.ino == ROOT_INUM));
        assert_eq!(entries[0].name, b".");
        assert_eq!(entries[1].name, b"..");
        let root = fs.getattr(ROOT_INUM).unwrap();
        assert_eq!(root.file_type(), FileType::Directory);
        assert_eq!(root.disk.nlinks, 2);
    }

    #[test]
    fn create_write_read_roundtrip() {
        let (_dir, mut fs) = fresh(256);
        let inum = fs.create(ROOT_INUM, b"hello.txt", S_IFREG | 0o644).unwrap();
        fs.write(inum, 0, b"hello world").unwrap();
        let mut buf = [0u8; 11];
        let n = fs.read(inum, 0, &mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
        assert_eq!(fs.lookup(ROOT_INUM, b"hello.txt").unwrap(), inum);
    }

    #[test]
    fn mkdir_rmdir_updates_parent_nlinks() {
        let (_dir, mut fs) = fresh(256);
        let sub = fs.mkdir(ROOT_INUM, b"sub", 0o755).unwrap();
        assert_eq!(fs.getattr(ROOT_INUM).unwrap().disk.nlinks, 3);
        fs.rmdir(ROOT_INUM, b"sub").unwrap();
        assert_eq!(fs.getattr(ROOT_INUM).unwrap().disk.nlinks, 2);
        assert_eq!(fs.lookup(ROOT_INUM, b"sub").unwrap_err().to_string(), FsError::NotFound.to_string());
        let _ = sub;
    }

    #[test]
    fn unlink_frees_inode_after_last_link() {
        let (_dir, mut fs) = fresh(256);
        let inum = fs.create(ROOT_INUM, b"a", S_IFREG | 0o644).unwrap();
        fs.link(ROOT_INUM, b"b", inum).unwrap();
        assert_eq!(fs.getattr(inum).unwrap().disk.nlinks, 2);
        fs.unlink(ROOT_INUM, b"a").unwrap();
        assert_eq!(fs.getattr(inum).unwrap().disk.nlinks, 1);
        fs.unlink(ROOT_INUM, b"b").unwrap();
        assert!(fs.lookup(ROOT_INUM, b"b").is_err());
    }

    #[test]
    fn rename_within_same_directory() {
        let (_dir, mut fs) = fresh(256);
        let inum = fs.create(ROOT_INUM, b"old", S_IFREG | 0o644).unwrap();
        fs.rename(ROOT_INUM, b"old", ROOT_INUM, b"new").unwrap();
        assert!(fs.lookup(ROOT_INUM, b"old").is_err());
        assert_eq!(fs.lookup(ROOT_INUM, b"new").unwrap(), inum);
    }

    #[test]
    fn rename_onto_itself_is_a_ctime_only_no_op() {
        let (_dir, mut fs) = fresh(256);
        let inum = fs.create(ROOT_INUM, b"old", S_IFREG | 0o644).unwrap();
        let ctime_before = fs.getattr(inum).unwrap().disk.ctime;
        std::thread::sleep(std::time::Duration::from_secs(1));
        fs.rename(ROOT_INUM, b"old", ROOT_INUM, b"old").unwrap();
        assert_eq!(fs.lookup(ROOT_INUM, b"old").unwrap(), inum);
        assert_eq!(fs.readdir(ROOT_INUM).unwrap().iter().filter(|e| e.name == b"old").count(), 1);
        assert!(fs.getattr(inum).unwrap().disk.ctime >= ctime_before);
    }

    #[test]
    fn rename_across_directories() {
        let (_dir, mut fs) = fresh(256);
        let sub = fs.mkdir(ROOT_INUM, b"sub", 0o755).unwrap();
        let inum = fs.create(ROOT_INUM, b"f", S_IFREG | 0o644).unwrap();
        fs.rename(ROOT_INUM, b"f", sub, b"f2").unwrap();
        assert!(fs.lookup(ROOT_INUM, b"f").is_err());
        assert_eq!(fs.lookup(sub, b"f2").unwrap(), inum);
    }

    #[test]
    fn symlink_roundtrip() {
        let (_dir, mut fs) = fresh(256);
        let inum = fs.symlink(ROOT_INUM, b"link", b"/target/path").unwrap();
        assert_eq!(fs.readlink(inum).unwrap(), b"/target/path");
    }
}
