//! Adapters that point the generic tree crawler at the two concrete trees
//! the engine actually has: the inode tree (rooted at the superblock) and a
//! single file's data tree (rooted at its inode).

use crate::alloc::BitmapAllocator;
use crate::crawl::{self, CrawlMode};
use crate::error::CrawlError;
use bpfs_api::controller::Device;
use bpfs_api::types::{DInode, Inode, TreeRoot, INODE_SIZE};

fn inode_offset(inum: u64) -> u64 {
    (inum - 1) * INODE_SIZE
}

/// Read the inode record for `inum` out of the inode tree rooted at
/// `inode_root`. An `inum` beyond the tree's current extent reads as a
/// freshly-defaulted (unallocated) inode, the same way any other hole does.
pub fn read_inode(device: &Device, inode_root: TreeRoot, inum: u64) -> Result<Inode, CrawlError> {
    let mut buf = vec![0u8; INODE_SIZE as usize];
    let off = inode_offset(inum);
    if off < inode_root.nbytes {
        crawl::crawl_read(device, inode_root, off, INODE_SIZE.min(inode_root.nbytes - off), &mut buf[..(INODE_SIZE.min(inode_root.nbytes - off)) as usize])?;
    }
    let disk: DInode = bincode::deserialize(&buf).map_err(bpfs_api::error::APIError::from)?;
    Ok(Inode::new(inum, disk))
}

/// Write `disk` as the record for `inum`, returning the inode tree's new
/// root. The caller is responsible for publishing the new root into the
/// superblock.
pub fn write_inode(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    inode_root: TreeRoot,
    inum: u64,
    disk: &DInode,
    mode: CrawlMode,
) -> Result<TreeRoot, CrawlError> {
    let bytes = bincode::serialize(disk).map_err(bpfs_api::error::APIError::from)?;
    debug_assert_eq!(bytes.len() as u64, INODE_SIZE);
    let off = inode_offset(inum);
    crawl::crawl_write(device, balloc, inode_root, off, INODE_SIZE, &bytes, mode)
}

/// Every inode slot the inode tree currently spans, in inode-number order.
/// Used by mount discovery, which has no other way to enumerate inodes.
pub fn crawl_inodes(device: &Device, inode_root: TreeRoot) -> Result<Vec<Inode>, CrawlError> {
    let count = inode_root.nbytes / INODE_SIZE;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        out.push(read_inode(device, inode_root, i + 1)?);
    }
    Ok(out)
}

/// Read up to `buf.len()` bytes at `off` from a file's data tree, clamped to
/// the file's logical size. Returns the number of bytes actually read.
pub fn crawl_data_read(device: &Device, tree_root: TreeRoot, off: u64, buf: &mut [u8]) -> Result<u64, CrawlError> {
    if off >= tree_root.nbytes {
        return Ok(0);
    }
    let avail = (tree_root.nbytes - off).min(buf.len() as u64);
    crawl::crawl_read(device, tree_root, off, avail, &mut buf[..avail as usize])?;
    Ok(avail)
}

/// Write `data` at `off` into a file's data tree, extending it if needed.
pub fn crawl_data_write(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    tree_root: TreeRoot,
    off: u64,
    data: &[u8],
    mode: CrawlMode,
) -> Result<TreeRoot, CrawlError> {
    crawl::crawl_write(device, balloc, tree_root, off, data.len() as u64, data, mode)
}

/// Write to two byte ranges as a single crawl, used by rename to update a
/// source and destination directory (which may be the same directory) in
/// one step. Errors if both sites name the same tree and their byte ranges
/// overlap — such a rename must be expressed as two sequential writes
/// instead, since this crawl has no way to merge them.
///
/// The returned roots still need to be published into their owning inodes
/// by the caller (normally [`crate::txn`]), which is what actually makes
/// the combined update atomic.
pub fn crawl_data_2(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    root_a: TreeRoot,
    off_a: u64,
    data_a: &[u8],
    root_b: TreeRoot,
    off_b: u64,
    data_b: &[u8],
    mode: CrawlMode,
) -> Result<(TreeRoot, TreeRoot), CrawlError> {
    if root_a.addr() == root_b.addr() && !root_a.is_empty() {
        let (lo_a, hi_a) = (off_a, off_a + data_a.len() as u64);
        let (lo_b, hi_b) = (off_b, off_b + data_b.len() as u64);
        if lo_a < hi_b && lo_b < hi_a {
            return Err(CrawlError::OverlappingRanges);
        }
    }
    let same_tree = root_a.addr() == root_b.addr();
    let new_a = crawl::crawl_write(device, balloc, root_a, off_a, data_a.len() as u64, data_a, mode)?;
    let base_b = if same_tree { new_a } else { root_b };
    let new_b = crawl::crawl_write(device, balloc, base_b, off_b, data_b.len() as u64, data_b, mode)?;
    Ok((new_a, new_b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_device(nblocks: u64) -> (tempfile::TempDir, Device) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img");
        let dev = Device::new(path, bpfs_api::types::BLOCK_SIZE, nblocks).unwrap();
        (dir, dev)
    }

    #[test]
    fn write_then_read_inode() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();

        let di = DInode {
            uid: 42,
            nlinks: 1,
            ..DInode::default()
        };
        let root = write_inode(&mut dev, &mut balloc, root, 1, &di, CrawlMode::Copy).unwrap();
        let back = read_inode(&dev, root, 1).unwrap();
        assert_eq!(back.disk.uid, 42);
        assert_eq!(back.inum, 1);

        let missing = read_inode(&dev, root, 2).unwrap();
        assert_eq!(missing.disk, DInode::default());
    }

    #[test]
    fn data_read_clamps_to_file_size() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let root = crawl_data_write(&mut dev, &mut balloc, root, 0, b"hi", CrawlMode::Copy).unwrap();

        let mut buf = [0u8; 10];
        let n = crawl_data_read(&dev, root, 0, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], b"hi");
    }

    #[test]
    fn data_2_rejects_overlapping_same_tree_writes() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let root = crawl_data_write(&mut dev, &mut balloc, root, 0, &[0u8; 16], CrawlMode::Copy).unwrap();

        let err = crawl_data_2(&mut dev, &mut balloc, root, 0, b"aaaa", root, 2, b"bbbb", CrawlMode::Copy).unwrap_err();
        assert!(matches!(err, CrawlError::OverlappingRanges));
    }
}
