//! Engine for a byte-persistent-RAM file system built on short-circuit
//! shadow paging: the allocator, the block tree crawler, directory entry
//! storage, mount-time discovery, the transaction wrapper, and the `Fs`
//! operation surface built on top of them.
//!
//! `bpfs-api` defines the on-disk layout and the memory-mapped device;
//! this crate is where that layout turns into a working file system. Start
//! at [`fs::Fs`] for the operation surface, or at [`crawl`] for the
//! shadow-paging tree crawl itself.

#![deny(missing_docs)]

pub mod error;

pub mod alloc;
pub mod block;
pub mod tree;

pub mod crawl;
pub mod crawl_adapters;
pub mod dirent;

pub mod mount;
pub mod txn;

pub mod fs;
