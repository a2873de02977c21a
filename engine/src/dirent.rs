//! Directory-entry operations over a directory inode's own data tree.
//!
//! A directory's data tree is just bytes to the crawler; this module is
//! what gives those bytes meaning. Entries never span a block boundary: a
//! block's entries tile it exactly, with the last entry's `rec_len`
//! stretched to reach the block's end, ext2-style, so deletion only ever
//! has to widen a record rather than shift everything after it.
//!
//! Link-count bookkeeping (incrementing/decrementing an inode's `nlinks`)
//! is not this module's job — callers update the target inode themselves
//! after a structural change here succeeds.

use crate::alloc::BitmapAllocator;
use crate::crawl::CrawlMode;
use crate::crawl_adapters::{crawl_data_read, crawl_data_write};
use crate::error::CrawlError;
use bpfs_api::controller::Device;
use bpfs_api::types::{dirent_rec_len, Buffer, DirEntryHeader, FileType, TreeRoot, BLOCK_SIZE, DIRENT_HEADER_SIZE, INVALID_ADDR};

/// One directory entry as returned by [`list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Name of this entry (not null-terminated; no embedded NUL either).
    pub name: Vec<u8>,
    /// Inode this entry names.
    pub ino: u64,
    /// File type of the referenced inode.
    pub file_type: FileType,
}

fn read_whole(device: &Device, tree_root: TreeRoot) -> Result<Buffer, CrawlError> {
    let mut buf = Buffer::new_zero(tree_root.nbytes);
    crawl_data_read(device, tree_root, 0, buf.contents_as_mut())?;
    Ok(buf)
}

/// Look up `name` in the directory, returning its inode and file type.
pub fn find(device: &Device, tree_root: TreeRoot, name: &[u8]) -> Result<Option<(u64, FileType)>, CrawlError> {
    if tree_root.is_empty() {
        return Ok(None);
    }
    let buf = read_whole(device, tree_root)?;
    let nblocks = tree_root.nbytes / BLOCK_SIZE;
    for b in 0..nblocks {
        let block_start = b * BLOCK_SIZE;
        let mut pos = 0u64;
        while pos < BLOCK_SIZE {
            let header: DirEntryHeader = buf.deserialize_from(block_start + pos)?;
            if header.rec_len == 0 {
                break;
            }
            if header.ino != INVALID_ADDR {
                let mut nb = vec![0u8; header.name_len as usize];
                buf.read_data(&mut nb, block_start + pos + DIRENT_HEADER_SIZE)?;
                if nb == name {
                    return Ok(Some((header.ino, FileType::from_u8(header.file_type).expect("corrupt directory entry file type"))));
                }
            }
            pos += header.rec_len as u64;
        }
    }
    Ok(None)
}

/// Enumerate every live entry in the directory, in on-disk order.
pub fn list(device: &Device, tree_root: TreeRoot) -> Result<Vec<DirEntry>, CrawlError> {
    if tree_root.is_empty() {
        return Ok(Vec::new());
    }
    let buf = read_whole(device, tree_root)?;
    let nblocks = tree_root.nbytes / BLOCK_SIZE;
    let mut out = Vec::new();
    for b in 0..nblocks {
        let block_start = b * BLOCK_SIZE;
        let mut pos = 0u64;
        while pos < BLOCK_SIZE {
            let header: DirEntryHeader = buf.deserialize_from(block_start + pos)?;
            if header.rec_len == 0 {
                break;
            }
            if header.ino != INVALID_ADDR {
                let mut name = vec![0u8; header.name_len as usize];
                buf.read_data(&mut name, block_start + pos + DIRENT_HEADER_SIZE)?;
                out.push(DirEntry {
                    name,
                    ino: header.ino,
                    file_type: FileType::from_u8(header.file_type).expect("corrupt directory entry file type"),
                });
            }
            pos += header.rec_len as u64;
        }
    }
    Ok(out)
}

fn write_entry(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    tree_root: TreeRoot,
    offset: u64,
    header: &DirEntryHeader,
    name: &[u8],
    mode: CrawlMode,
) -> Result<TreeRoot, CrawlError> {
    let mut rec = Buffer::new_zero(header.rec_len as u64);
    rec.serialize_into(header, 0)?;
    rec.write_data(name, DIRENT_HEADER_SIZE)?;
    crawl_data_write(device, balloc, tree_root, offset, rec.contents_as_ref(), mode)
}

/// Write only the 8-byte `ino` field at `offset` (the first field of a
/// `DirEntryHeader`, so this never touches `rec_len`/`file_type`/`name_len`
/// or the name bytes that follow). This is the point write `set_ino` and
/// `clear_ino` are named for: at 8 bytes and an 8-byte-aligned offset it
/// satisfies `crawl`'s single-atomic-store fast path.
fn write_ino_field(device: &mut Device, balloc: &mut BitmapAllocator, tree_root: TreeRoot, offset: u64, ino: u64, mode: CrawlMode) -> Result<TreeRoot, CrawlError> {
    crawl_data_write(device, balloc, tree_root, offset, &ino.to_le_bytes(), mode)
}

/// Insert `name -> (ino, file_type)`, reusing a tombstoned slot if one is
/// large enough, splitting a free slot's tail if it is larger than needed,
/// or appending a fresh block if the directory has no room.
///
/// Does not check for an existing entry with the same name; callers must
/// `find` first if that matters.
pub fn insert(
    device: &mut Device,
    balloc: &mut BitmapAllocator,
    tree_root: TreeRoot,
    name: &[u8],
    ino: u64,
    file_type: FileType,
    mode: CrawlMode,
) -> Result<TreeRoot, CrawlError> {
    let needed = dirent_rec_len(name.len() as u64);
    let header = DirEntryHeader {
        ino,
        rec_len: needed as u16,
        file_type: file_type as u8,
        name_len: name.len() as u8,
    };

    if !tree_root.is_empty() {
        let buf = read_whole(device, tree_root)?;
        let nblocks = tree_root.nbytes / BLOCK_SIZE;
        for b in 0..nblocks {
            let block_start = b * BLOCK_SIZE;
            let mut pos = 0u64;
            while pos < BLOCK_SIZE {
                let slot: DirEntryHeader = buf.deserialize_from(block_start + pos)?;
                if slot.rec_len == 0 {
                    break;
                }
                if slot.ino == INVALID_ADDR && (slot.rec_len as u64) >= needed {
                    let slack = slot.rec_len as u64 - needed;
                    let root = write_entry(device, balloc, tree_root, block_start + pos, &header, name, mode)?;
                    if slack > 0 {
                        let tomb = DirEntryHeader {
                            ino: INVALID_ADDR,
                            rec_len: slack as u16,
                            file_type: 0,
                            name_len: 0,
                        };
                        return write_entry(device, balloc, root, block_start + pos + needed, &tomb, &[], mode);
                    }
                    return Ok(root);
                }
                pos += slot.rec_len as u64;
            }
        }
    }

    // No room in any existing block: append a fresh, block-sized tombstone
    // tiled with the new entry at its head.
    let block_off = tree_root.nbytes;
    let mut root = write_entry(device, balloc, tree_root, block_off, &header, name, mode)?;
    let slack = BLOCK_SIZE - needed;
    if slack > 0 {
        let tomb = DirEntryHeader {
            ino: INVALID_ADDR,
            rec_len: slack as u16,
            file_type: 0,
            name_len: 0,
        };
        root = write_entry(device, balloc, root, block_off + needed, &tomb, &[], mode)?;
    }
    Ok(root)
}

/// Clear the entry named `name`, turning its slot into a reusable
/// tombstone. Returns whether an entry was found and cleared.
pub fn clear_ino(device: &mut Device, balloc: &mut BitmapAllocator, tree_root: TreeRoot, name: &[u8], mode: CrawlMode) -> Result<(TreeRoot, bool), CrawlError> {
    if tree_root.is_empty() {
        return Ok((tree_root, false));
    }
    let buf = read_whole(device, tree_root)?;
    let nblocks = tree_root.nbytes / BLOCK_SIZE;
    for b in 0..nblocks {
        let block_start = b * BLOCK_SIZE;
        let mut pos = 0u64;
        while pos < BLOCK_SIZE {
            let slot: DirEntryHeader = buf.deserialize_from(block_start + pos)?;
            if slot.rec_len == 0 {
                break;
            }
            if slot.ino != INVALID_ADDR {
                let mut nb = vec![0u8; slot.name_len as usize];
                buf.read_data(&mut nb, block_start + pos + DIRENT_HEADER_SIZE)?;
                if nb == name {
                    let root = write_ino_field(device, balloc, tree_root, block_start + pos, INVALID_ADDR, mode)?;
                    return Ok((root, true));
                }
            }
            pos += slot.rec_len as u64;
        }
    }
    Ok((tree_root, false))
}

/// Repoint the entry named `name` at a different inode, in place, as a
/// single 8-byte point write of the `ino` field. The entry's file type
/// does not change; a name repointed to an inode of a different type is
/// the caller's bug, not this function's concern. Used by rename onto an
/// already-existing entry at the same name. Returns whether an entry was
/// found.
pub fn set_ino(device: &mut Device, balloc: &mut BitmapAllocator, tree_root: TreeRoot, name: &[u8], ino: u64, mode: CrawlMode) -> Result<(TreeRoot, bool), CrawlError> {
    if tree_root.is_empty() {
        return Ok((tree_root, false));
    }
    let buf = read_whole(device, tree_root)?;
    let nblocks = tree_root.nbytes / BLOCK_SIZE;
    for b in 0..nblocks {
        let block_start = b * BLOCK_SIZE;
        let mut pos = 0u64;
        while pos < BLOCK_SIZE {
            let slot: DirEntryHeader = buf.deserialize_from(block_start + pos)?;
            if slot.rec_len == 0 {
                break;
            }
            if slot.ino != INVALID_ADDR {
                let mut nb = vec![0u8; slot.name_len as usize];
                buf.read_data(&mut nb, block_start + pos + DIRENT_HEADER_SIZE)?;
                if nb == name {
                    let root = write_ino_field(device, balloc, tree_root, block_start + pos, ino, mode)?;
                    return Ok((root, true));
                }
            }
            pos += slot.rec_len as u64;
        }
    }
    Ok((tree_root, false))
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
    fn insert_find_and_list_roundtrip() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();

        let root = insert(&mut dev, &mut balloc, root, b"foo", 5, FileType::Regular, CrawlMode::Copy).unwrap();
        let root = insert(&mut dev, &mut balloc, root, b"bar", 6, FileType::Directory, CrawlMode::Copy).unwrap();

        assert_eq!(find(&dev, root, b"foo").unwrap(), Some((5, FileType::Regular)));
        assert_eq!(find(&dev, root, b"bar").unwrap(), Some((6, FileType::Directory)));
        assert_eq!(find(&dev, root, b"missing").unwrap(), None);

        let mut names: Vec<_> = list(&dev, root).unwrap().into_iter().map(|e| e.name).collect();
        names.sort();
        assert_eq!(names, vec![b"bar".to_vec(), b"foo".to_vec()]);
    }

    #[test]
    fn clear_then_reinsert_reuses_slot() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let root = insert(&mut dev, &mut balloc, root, b"foo", 5, FileType::Regular, CrawlMode::Copy).unwrap();
        let size_before = root.nbytes;

        let (root, found) = clear_ino(&mut dev, &mut balloc, root, b"foo", CrawlMode::Copy).unwrap();
        assert!(found);
        assert_eq!(find(&dev, root, b"foo").unwrap(), None);

        let root = insert(&mut dev, &mut balloc, root, b"baz", 9, FileType::Regular, CrawlMode::Copy).unwrap();
        assert_eq!(root.nbytes, size_before);
        assert_eq!(find(&dev, root, b"baz").unwrap(), Some((9, FileType::Regular)));
    }

    #[test]
    fn set_ino_repoints_existing_entry() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let root = insert(&mut dev, &mut balloc, root, b"foo", 5, FileType::Regular, CrawlMode::Copy).unwrap();
        let (root, found) = set_ino(&mut dev, &mut balloc, root, b"foo", 42, CrawlMode::Copy).unwrap();
        assert!(found);
        // file type is untouched by a pure ino repoint
        assert_eq!(find(&dev, root, b"foo").unwrap(), Some((42, FileType::Regular)));
    }

    #[test]
    fn set_ino_is_atomic_point_write() {
        let (_dir, mut dev) = new_device(64);
        let mut balloc = BitmapAllocator::new(32);
        let root = TreeRoot::empty();
        let root = insert(&mut dev, &mut balloc, root, b"foo", 5, FileType::Regular, CrawlMode::Copy).unwrap();
        let (root, found) = set_ino(&mut dev, &mut balloc, root, b"foo", 99, CrawlMode::Atomic).unwrap();
        assert!(found);
        assert_eq!(find(&dev, root, b"foo").unwrap(), Some((99, FileType::Regular)));
    }
}
