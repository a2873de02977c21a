//! On-media types shared by the BPRAM persistence engine.
//!
//! Everything in this module is little-endian, fixed-width, and laid out the
//! way the external interface section of the design fixes it: a `SuperBlock`
//! at block 1 (with a duplicate at block 2), a height-variable block tree
//! rooted at the superblock's inode-tree root, inodes as 128-byte records
//! inside that tree, and directory entries as packed, variable-length
//! records inside a directory inode's own data tree.
//!
//! `Buffer`/`Block` are kept close to the device layer: they know how to
//! read and write raw bytes and how to (de)serialize fixed-width records
//! through `bincode`, and nothing else. Higher layers (allocator, tree,
//! crawler) build their meaning on top of these primitives.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::prelude::*;
use std::io::{Cursor, SeekFrom};

use crate::error::{APIError, Result};

/// Size of a block, in bytes. Fixed; this design does not support variable
/// block sizes.
pub const BLOCK_SIZE: u64 = 4096;

/// Number of child pointers an indirect block holds (`BLOCK_SIZE / 8`).
pub const CHILDREN_PER_INDIR: u64 = BLOCK_SIZE / 8;

/// Maximum tree height a packed `(height, addr)` word can express.
pub const MAX_HEIGHT: u8 = 7;

/// Size of an on-disk inode record, in bytes.
pub const INODE_SIZE: u64 = 128;

/// Number of inode records packed into a single inode-tree leaf.
pub const INODES_PER_LEAF: u64 = BLOCK_SIZE / INODE_SIZE;

/// Inode number of the root directory.
pub const ROOT_INUM: u64 = 1;

/// Sentinel address denoting "no block" / "hole" / "invalid".
pub const INVALID_ADDR: u64 = 0;

/// Size of the fixed part of a directory entry (everything but the name).
pub const DIRENT_HEADER_SIZE: u64 = 8 + 2 + 1 + 1;

/// Directory entry records are kept 8-byte aligned.
pub const DIRENT_ALIGN: u64 = 8;

/// Block index of the primary superblock.
pub const SUPERBLOCK_PRIMARY: u64 = 1;

/// Block index of the secondary (shadow/duplicate) superblock.
pub const SUPERBLOCK_SECONDARY: u64 = 2;

/// Block index at which ordinary allocation may begin; blocks 0-2 are
/// reserved (0 is the invalid sentinel, 1-2 are the superblock copies).
pub const FIRST_ALLOCATABLE_BLOCK: u64 = 3;

/// Format magic number.
pub const MAGIC: u32 = 0xB9F5;

/// Format version understood by this crate.
pub const FORMAT_VERSION: u32 = 1;

/// Buffer abstraction representing some data on the heap.
///
/// Supports raw byte read/write, as well as (de)serialization of structures
/// implementing the appropriate `serde` traits.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Buffer {
    contents: Box<[u8]>,
}

impl Buffer {
    /// Create a new buffer with the given contents.
    pub fn new(data: Box<[u8]>) -> Buffer {
        Buffer { contents: data }
    }

    /// Create an all-zero buffer of the given length.
    pub fn new_zero(len: u64) -> Buffer {
        Buffer {
            contents: vec![0; len as usize].into_boxed_slice(),
        }
    }

    /// Length of this buffer, in bytes.
    pub fn len(&self) -> u64 {
        self.contents.len() as u64
    }

    /// True if this buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Borrow this buffer's contents.
    pub fn contents_as_ref(&self) -> &[u8] {
        &self.contents
    }

    /// Mutably borrow this buffer's contents.
    pub fn contents_as_mut(&mut self) -> &mut [u8] {
        &mut self.contents
    }

    /// Read `data.len()` bytes starting at `offset`.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::BlockInput("read past the end of the buffer"));
        }
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        c.read_exact(data).map_err(|e| e.into())
    }

    /// Write `data` starting at `offset`.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        if offset + data.len() as u64 > self.len() {
            return Err(APIError::BlockInput("write past the end of the buffer"));
        }
        let mut c = Cursor::new(&mut self.contents[..]);
        c.seek(SeekFrom::Start(offset))?;
        c.write_all(data).map_err(|e| e.into())
    }

    /// Read a little-endian `u64` at `offset`.
    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        let mut raw = [0u8; 8];
        self.read_data(&mut raw, offset)?;
        Ok(u64::from_le_bytes(raw))
    }

    /// Write a little-endian `u64` at `offset`.
    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.write_data(&value.to_le_bytes(), offset)
    }

    /// Deserialize a fixed-width record starting at `offset`.
    pub fn deserialize_from<S: DeserializeOwned>(&self, offset: u64) -> Result<S> {
        let mut c = Cursor::new(&self.contents);
        c.seek(SeekFrom::Start(offset))?;
        Ok(bincode::deserialize_from(c)?)
    }

    /// Serialize a fixed-width record to `offset`.
    pub fn serialize_into<S: Serialize>(&mut self, value: &S, offset: u64) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.write_data(&bytes, offset)
    }
}

/// A block of data read from, or to be written to, the BPRAM-backed device.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Block {
    /// Index of this block on the device.
    pub block_no: u64,
    buf: Buffer,
}

impl Block {
    /// Create a block with the given contents.
    pub fn new(block_no: u64, data: Box<[u8]>) -> Block {
        Block {
            block_no,
            buf: Buffer::new(data),
        }
    }

    /// Create an all-zero block.
    pub fn new_zero(block_no: u64, len: u64) -> Block {
        Block {
            block_no,
            buf: Buffer::new_zero(len),
        }
    }

    /// Length of this block's contents, in bytes (normally `BLOCK_SIZE`).
    pub fn len(&self) -> u64 {
        self.buf.len()
    }

    /// True if this block holds no bytes (never true for a real disk block).
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow this block's contents.
    pub fn contents_as_ref(&self) -> &[u8] {
        self.buf.contents_as_ref()
    }

    /// Mutably borrow this block's contents.
    pub fn contents_as_mut(&mut self) -> &mut [u8] {
        self.buf.contents_as_mut()
    }

    /// Read raw bytes at `offset`.
    pub fn read_data(&self, data: &mut [u8], offset: u64) -> Result<()> {
        self.buf.read_data(data, offset)
    }

    /// Write raw bytes at `offset`.
    pub fn write_data(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.buf.write_data(data, offset)
    }

    /// Read a little-endian `u64` at `offset`. Indirect-block child pointers
    /// and the packed tree-root word are read this way rather than through
    /// `bincode`, since the on-media format fixes their byte layout
    /// directly.
    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        self.buf.read_u64(offset)
    }

    /// Write a little-endian `u64` at `offset`.
    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.buf.write_u64(offset, value)
    }

    /// Deserialize a fixed-width record at `offset`.
    pub fn deserialize_from<S: DeserializeOwned>(&self, offset: u64) -> Result<S> {
        self.buf.deserialize_from(offset)
    }

    /// Serialize a fixed-width record to `offset`.
    pub fn serialize_into<S: Serialize>(&mut self, value: &S, offset: u64) -> Result<()> {
        self.buf.serialize_into(value, offset)
    }
}

/// A packed `(height, addr)` word: 3 bits of height, 61 bits of address,
/// stored in a single `u64` so it can be published with one atomic store.
///
/// Never split this into two separate fields; the entire point of packing it
/// is that a single 8-byte store both changes the tree's shape and its root
/// pointer atomically.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HeightAddr(u64);

const HEIGHT_SHIFT: u32 = 61;
const ADDR_MASK: u64 = (1u64 << HEIGHT_SHIFT) - 1;

impl HeightAddr {
    /// Pack a height and address into one word.
    ///
    /// # Panics
    /// Panics if `height` exceeds `MAX_HEIGHT` or `addr` does not fit in 61
    /// bits; both are programming errors, not recoverable runtime states.
    pub fn new(height: u8, addr: u64) -> HeightAddr {
        assert!(height <= MAX_HEIGHT, "tree height {} exceeds MAX_HEIGHT", height);
        assert!(addr <= ADDR_MASK, "block address {} does not fit in 61 bits", addr);
        HeightAddr(((height as u64) << HEIGHT_SHIFT) | addr)
    }

    /// The height component.
    pub fn height(self) -> u8 {
        (self.0 >> HEIGHT_SHIFT) as u8
    }

    /// The address component.
    pub fn addr(self) -> u64 {
        self.0 & ADDR_MASK
    }

    /// Raw packed word, as stored on media.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Reconstruct a packed word from its raw on-media representation.
    pub fn from_raw(raw: u64) -> HeightAddr {
        HeightAddr(raw)
    }
}

/// A tree root: the `(height, addr, nbytes)` descriptor that names either the
/// inode tree or a file's data tree.
///
/// `nbytes == 0` iff `addr` is meaningless (the tree is logically empty).
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeRoot {
    ha: HeightAddr,
    /// Logical size of the tree, in bytes.
    pub nbytes: u64,
}

impl TreeRoot {
    /// An empty tree root (no blocks allocated, zero logical bytes).
    pub fn empty() -> TreeRoot {
        TreeRoot {
            ha: HeightAddr::new(0, INVALID_ADDR),
            nbytes: 0,
        }
    }

    /// Build a tree root from its parts.
    pub fn new(height: u8, addr: u64, nbytes: u64) -> TreeRoot {
        TreeRoot {
            ha: HeightAddr::new(height, addr),
            nbytes,
        }
    }

    /// The tree's height (0 = a single leaf).
    pub fn height(self) -> u8 {
        self.ha.height()
    }

    /// The address of the root block (a leaf if `height() == 0`, else an
    /// indirect block).
    pub fn addr(self) -> u64 {
        self.ha.addr()
    }

    /// The packed `(height, addr)` word, for atomic publication.
    pub fn height_addr(self) -> HeightAddr {
        self.ha
    }

    /// True if this tree currently holds no bytes.
    pub fn is_empty(self) -> bool {
        self.nbytes == 0
    }

    /// Replace the `(height, addr)` pair, keeping `nbytes`.
    pub fn with_height_addr(self, height: u8, addr: u64) -> TreeRoot {
        TreeRoot {
            ha: HeightAddr::new(height, addr),
            nbytes: self.nbytes,
        }
    }

    /// Replace `nbytes`, keeping the `(height, addr)` pair.
    pub fn with_nbytes(self, nbytes: u64) -> TreeRoot {
        TreeRoot { ha: self.ha, nbytes }
    }
}

/// POSIX-style file type bits, mirrored at the format level.
pub mod mode_bits {
    /// Socket.
    pub const S_IFSOCK: u32 = 0xC000;
    /// Symbolic link.
    pub const S_IFLNK: u32 = 0xA000;
    /// Regular file.
    pub const S_IFREG: u32 = 0x8000;
    /// Block device.
    pub const S_IFBLK: u32 = 0x6000;
    /// Directory.
    pub const S_IFDIR: u32 = 0x4000;
    /// Character device.
    pub const S_IFCHR: u32 = 0x2000;
    /// FIFO / named pipe.
    pub const S_IFIFO: u32 = 0x1000;
    /// Mask selecting the file-type bits out of a mode word.
    pub const S_IFMT: u32 = 0xF000;
}

/// File type, as recorded in directory entries and derived from an inode's
/// mode bits.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    /// Regular file.
    Regular = 1,
    /// Directory.
    Directory = 2,
    /// Character device.
    CharDevice = 3,
    /// Block device.
    BlockDevice = 4,
    /// FIFO / named pipe.
    Fifo = 5,
    /// Unix domain socket.
    Socket = 6,
    /// Symbolic link.
    Symlink = 7,
}

impl FileType {
    /// Decode a file type from a raw directory-entry byte.
    pub fn from_u8(v: u8) -> Option<FileType> {
        Some(match v {
            1 => FileType::Regular,
            2 => FileType::Directory,
            3 => FileType::CharDevice,
            4 => FileType::BlockDevice,
            5 => FileType::Fifo,
            6 => FileType::Socket,
            7 => FileType::Symlink,
            _ => return None,
        })
    }

    /// The mode-bits `S_IF*` constant corresponding to this file type.
    pub fn mode_bits(self) -> u32 {
        use mode_bits::*;
        match self {
            FileType::Regular => S_IFREG,
            FileType::Directory => S_IFDIR,
            FileType::CharDevice => S_IFCHR,
            FileType::BlockDevice => S_IFBLK,
            FileType::Fifo => S_IFIFO,
            FileType::Socket => S_IFSOCK,
            FileType::Symlink => S_IFLNK,
        }
    }

    /// Derive a file type from a full inode mode word.
    pub fn from_mode(mode: u32) -> Option<FileType> {
        use mode_bits::*;
        match mode & S_IFMT {
            S_IFREG => Some(FileType::Regular),
            S_IFDIR => Some(FileType::Directory),
            S_IFCHR => Some(FileType::CharDevice),
            S_IFBLK => Some(FileType::BlockDevice),
            S_IFIFO => Some(FileType::Fifo),
            S_IFSOCK => Some(FileType::Socket),
            S_IFLNK => Some(FileType::Symlink),
            _ => None,
        }
    }
}

/// Fixed-width, 128-byte on-disk inode record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DInode {
    /// Monotonic generation counter; `> 0` once the inode has ever been
    /// allocated.
    pub generation: u64,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Mode word (file-type bits + permission bits).
    pub mode: u32,
    /// Link count.
    pub nlinks: u32,
    /// Flags, opaque to the core; reserved for callers.
    pub flags: u64,
    /// This file's data tree.
    pub tree_root: TreeRoot,
    /// Last access time, seconds since epoch.
    pub atime: u32,
    /// Last modification time, seconds since epoch.
    pub mtime: u32,
    /// Last status-change time, seconds since epoch.
    pub ctime: u32,
    reserved: [u8; 68],
}

impl Default for DInode {
    fn default() -> DInode {
        DInode {
            generation: 0,
            uid: 0,
            gid: 0,
            mode: 0,
            nlinks: 0,
            flags: 0,
            tree_root: TreeRoot::empty(),
            atime: 0,
            mtime: 0,
            ctime: 0,
            reserved: [0; 68],
        }
    }
}

lazy_static::lazy_static! {
    /// Serialized size of a `DInode`. Must equal `INODE_SIZE`; verified by
    /// `inode_layout_matches_budget` in this module's tests.
    pub static ref DINODE_SIZE: u64 = bincode::serialize(&DInode::default()).unwrap().len() as u64;
}

/// An in-memory inode: the disk record plus the inode number it came from
/// (implicit from its position on disk, but convenient to carry around).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    /// Inode number.
    pub inum: u64,
    /// The on-disk record.
    pub disk: DInode,
}

impl Inode {
    /// Wrap a disk inode with its inode number.
    pub fn new(inum: u64, disk: DInode) -> Inode {
        Inode { inum, disk }
    }

    /// File type, derived from the mode word.
    ///
    /// # Panics
    /// Panics if the mode word does not encode a recognized file type; this
    /// can only happen if the inode was never properly initialized by the
    /// allocator, which is a programming error, not a recoverable one.
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.disk.mode).expect("inode has no valid file type bits")
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.disk.tree_root.nbytes
    }
}

/// Fixed-width header of a directory entry; the variable-length name follows
/// immediately after it in the block. `rec_len` is 8-byte aligned; a nonzero
/// `rec_len` together with `ino == INVALID_ADDR` marks a reusable empty slot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntryHeader {
    /// Inode this entry names, or `INVALID_ADDR` for an empty/terminator
    /// slot.
    pub ino: u64,
    /// Total size of this record (header + name), 8-byte aligned.
    pub rec_len: u16,
    /// File type of the referenced inode, mirrored here so readdir does not
    /// need to fetch every inode.
    pub file_type: u8,
    /// Length of the name that follows this header.
    pub name_len: u8,
}

/// Round `n` up to the next multiple of `DIRENT_ALIGN`.
pub fn dirent_align(n: u64) -> u64 {
    (n + DIRENT_ALIGN - 1) / DIRENT_ALIGN * DIRENT_ALIGN
}

/// Total record length needed to store a name of the given length.
pub fn dirent_rec_len(name_len: u64) -> u64 {
    dirent_align(DIRENT_HEADER_SIZE + name_len)
}

/// Maximum name length that still fits in a single block as one entry.
///
/// Bounded by both the block budget and by `name_len` itself being a `u8`.
pub fn dirent_max_name_len() -> u64 {
    (BLOCK_SIZE - DIRENT_HEADER_SIZE).min(u8::MAX as u64)
}

/// Commit-mode of the superblock duplication scheme.
///
/// Stored on disk as a plain `u8` (see `SuperBlock::commit_mode`), not as a
/// derive-serialized enum: bincode's default enum encoding tags a value
/// with a 4-byte discriminant regardless of `#[repr(u8)]`, which would blow
/// the single-byte field the on-disk layout fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommitMode {
    /// Classic shadow paging: the two superblock copies are updated
    /// sequentially, with a persistence barrier between them.
    ShadowPaging = 0,
    /// Short-circuit shadow paging: a single atomic store publishes the new
    /// root whenever the change can be expressed that way.
    ShortCircuit = 1,
}

impl CommitMode {
    /// Decode a commit mode from a raw superblock byte.
    pub fn from_u8(v: u8) -> Option<CommitMode> {
        Some(match v {
            0 => CommitMode::ShadowPaging,
            1 => CommitMode::ShortCircuit,
            _ => return None,
        })
    }
}

/// The superblock: the root of all file system metadata.
///
/// The two on-media copies are expected to be byte-identical in SCSP mode;
/// in SP mode they are written sequentially with a barrier in between so a
/// crash leaves at least one of them consistent.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    /// Format magic number.
    pub magic: u32,
    /// Format version.
    pub version: u32,
    /// Filesystem instance identifier.
    pub uuid: [u8; 16],
    /// Total number of blocks on the device, including the superblock
    /// copies.
    pub nblocks: u64,
    /// Root of the inode tree (primary copy).
    pub inode_root: TreeRoot,
    /// Root of the inode tree (secondary copy).
    pub inode_root_2: TreeRoot,
    /// Commit mode: SP (dual superblock, sequential update) or SCSP
    /// (short-circuit shadow paging, single atomic pointer swing). Stored
    /// as a raw byte (0 = SP, 1 = SCSP); decode with
    /// `CommitMode::from_u8`.
    pub commit_mode: u8,
    /// Whether the ephemeral (in-memory-only) link-count state is known to
    /// be valid, i.e. whether mount discovery has run since the last time it
    /// could have been invalidated.
    pub ephemeral_valid: bool,
    /// Monotonically increasing counter handed out as the `generation` field
    /// of newly allocated inodes.
    pub next_generation: u64,
}

impl Default for SuperBlock {
    fn default() -> SuperBlock {
        SuperBlock {
            magic: MAGIC,
            version: FORMAT_VERSION,
            uuid: [0; 16],
            nblocks: 0,
            inode_root: TreeRoot::empty(),
            inode_root_2: TreeRoot::empty(),
            commit_mode: CommitMode::ShortCircuit as u8,
            ephemeral_valid: false,
            next_generation: 0,
        }
    }
}

lazy_static::lazy_static! {
    /// Serialized size of a `SuperBlock`. Used only to assert it fits within
    /// one block; the rest of the block is simply left unused.
    pub static ref SUPERBLOCK_SIZE: u64 = bincode::serialize(&SuperBlock::default()).unwrap().len() as u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_addr_roundtrips() {
        let ha = HeightAddr::new(5, 12345);
        assert_eq!(ha.height(), 5);
        assert_eq!(ha.addr(), 12345);
        let back = HeightAddr::from_raw(ha.raw());
        assert_eq!(back, ha);
    }

    #[test]
    #[should_panic]
    fn height_addr_rejects_oversized_height() {
        HeightAddr::new(MAX_HEIGHT + 1, 0);
    }

    #[test]
    #[should_panic]
    fn height_addr_rejects_oversized_addr() {
        HeightAddr::new(0, 1u64 << 61);
    }

    #[test]
    fn tree_root_empty_has_zero_nbytes() {
        let t = TreeRoot::empty();
        assert!(t.is_empty());
        assert_eq!(t.addr(), INVALID_ADDR);
    }

    #[test]
    fn inode_layout_matches_budget() {
        assert_eq!(*DINODE_SIZE, INODE_SIZE);
    }

    #[test]
    fn superblock_fits_in_one_block() {
        assert!(*SUPERBLOCK_SIZE <= BLOCK_SIZE);
    }

    #[test]
    fn dirent_rec_len_is_aligned_and_fits_header() {
        for name_len in [0u64, 1, 7, 8, 9, 255] {
            let rl = dirent_rec_len(name_len);
            assert_eq!(rl % DIRENT_ALIGN, 0);
            assert!(rl >= DIRENT_HEADER_SIZE + name_len);
        }
    }

    #[test]
    fn file_type_mode_roundtrips() {
        for ft in [
            FileType::Regular,
            FileType::Directory,
            FileType::CharDevice,
            FileType::BlockDevice,
            FileType::Fifo,
            FileType::Socket,
            FileType::Symlink,
        ] {
            assert_eq!(FileType::from_mode(ft.mode_bits()), Some(ft));
            assert_eq!(FileType::from_u8(ft as u8), Some(ft));
        }
    }

    #[test]
    fn commit_mode_byte_roundtrips() {
        for cm in [CommitMode::ShadowPaging, CommitMode::ShortCircuit] {
            assert_eq!(CommitMode::from_u8(cm as u8), Some(cm));
        }
        assert_eq!(CommitMode::from_u8(2), None);
    }

    #[test]
    fn superblock_commit_mode_is_a_single_byte_on_the_wire() {
        let sb = SuperBlock {
            commit_mode: CommitMode::ShortCircuit as u8,
            ..SuperBlock::default()
        };
        let bytes = bincode::serialize(&sb).unwrap();
        let back: SuperBlock = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.commit_mode, sb.commit_mode);
    }

    #[test]
    fn buffer_rw_bounds() {
        let mut b = Buffer::new_zero(16);
        b.write_u64(0, 0xdead_beef).unwrap();
        assert_eq!(b.read_u64(0).unwrap(), 0xdead_beef);
        assert!(b.write_u64(9, 1).is_err());
        assert!(b.read_u64(9).is_err());
    }

    #[test]
    fn block_rw_out_of_bounds() {
        let mut b = Block::new_zero(12, 1000);
        assert_eq!(b.contents_as_ref(), vec![0u8; 1000].as_slice());
        let data = vec![5u8; 5];
        b.write_data(&data, 10).unwrap();
        let mut readback = vec![0u8; 5];
        b.read_data(&mut readback, 8).unwrap();
        assert_eq!(readback, vec![0, 0, 5, 5, 5]);

        let empty: Vec<u8> = vec![];
        assert!(b.write_data(&empty, 1000).is_ok());
        assert!(b.write_data(&empty, 1001).is_err());
        assert!(b.read_data(&mut [], 1001).is_err());

        let one = vec![1u8];
        assert!(b.write_data(&one, 1000).is_err());
    }

    #[test]
    fn block_serialization_roundtrip() {
        let di = DInode {
            uid: 7,
            gid: 9,
            nlinks: 2,
            ..DInode::default()
        };
        let mut b = Block::new(0, vec![0u8; BLOCK_SIZE as usize].into_boxed_slice());
        b.serialize_into(&di, 0).unwrap();
        let back: DInode = b.deserialize_from(0).unwrap();
        assert_eq!(back, di);
    }
}
