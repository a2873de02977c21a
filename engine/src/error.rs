//! Layered error hierarchy for the persistence engine.
//!
//! Each layer wraps the layer below it with `#[from]`, so `?` composes all
//! the way from a raw device error up through the crawler and the
//! transaction wrapper to the file system facade, the same way the device
//! layer's `APIError` composes `io::Error` and `bincode::Error`.

use bpfs_api::error::APIError;
use thiserror::Error;

/// Errors raised by the block/inode bitmap allocators.
#[derive(Error, Debug)]
pub enum AllocError {
    /// No free id remains in this bitmap.
    #[error("allocator exhausted: no free id available")]
    NoSpace,
    /// Attempted to free an id that was not allocated.
    #[error("double free or free of unallocated id {0}")]
    DoubleFree(u64),
    /// A resize request shrank the bitmap through ids still in use.
    #[error("cannot shrink bitmap: id {0} is still allocated")]
    ShrinkInUse(u64),
    /// Underlying device/record error.
    #[error(transparent)]
    Api(#[from] APIError),
}

/// Errors raised by the tree-layout primitives (height changes, truncation).
#[derive(Error, Debug)]
pub enum TreeError {
    /// The tree would need to grow past the maximum representable height.
    #[error("tree height overflow: byte range does not fit under MAX_HEIGHT")]
    HeightOverflow,
    /// An invariant of a height-variable tree was violated.
    #[error("tree invariant violated: {0}")]
    Invariant(&'static str),
    /// Wraps an allocator failure encountered while growing/shrinking a tree.
    #[error(transparent)]
    Alloc(#[from] AllocError),
    /// Underlying device/record error.
    #[error(transparent)]
    Api(#[from] APIError),
}

/// Errors raised while crawling a tree.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// Wraps a tree-layout failure.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// Wraps an allocator failure.
    #[error(transparent)]
    Alloc(#[from] AllocError),
    /// The two ranges given to a two-site atomic crawl overlap.
    #[error("crawl_data_2 ranges overlap")]
    OverlappingRanges,
    /// A single leaf write exceeded one block.
    #[error("leaf write of {0} bytes exceeds the block size")]
    OversizedLeafWrite(u64),
    /// Underlying device/record error.
    #[error(transparent)]
    Api(#[from] APIError),
}

/// Errors raised by the SCSP transaction wrapper. Adds nothing of its own;
/// it exists so every `Fs` method can return a single type that `?`
/// composes into, mirroring how the lower layers each add one link to the
/// chain.
#[derive(Error, Debug)]
pub enum TxnError {
    /// Wraps a crawl failure.
    #[error(transparent)]
    Crawl(#[from] CrawlError),
}

/// Errors surfaced by the `Fs` operation surface.
#[derive(Error, Debug)]
pub enum FsError {
    /// No such entry.
    #[error("no such file or directory")]
    NotFound,
    /// Name collision.
    #[error("entry already exists")]
    Exists,
    /// `rmdir` on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,
    /// A name would not fit in a directory-entry record.
    #[error("name too long")]
    NameTooLong,
    /// A link count would overflow.
    #[error("too many links")]
    LinkMax,
    /// An inode/offset/mode argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The target of an operation is not a directory where one was required
    /// (or vice versa).
    #[error("not a directory")]
    NotADirectory,
    /// A consistency check (at mount, or during an online re-scan) failed.
    #[error("file system is inconsistent: {0}")]
    Inconsistent(&'static str),
    /// Wraps a transaction-layer failure.
    #[error(transparent)]
    Txn(#[from] TxnError),
    /// Wraps a crawl failure directly, for operations that crawl without an
    /// intermediate transaction-specific error case.
    #[error(transparent)]
    Crawl(#[from] CrawlError),
    /// Underlying device/record error.
    #[error(transparent)]
    Api(#[from] APIError),
}

/// Shorthand for a `Result` with the error type [`FsError`].
pub type Result<T> = std::result::Result<T, FsError>;
