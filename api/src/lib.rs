//! Stable, on-media types and the BPRAM device abstraction.
//!
//! This crate is deliberately thin: it defines the byte layout every other
//! crate agrees on (`types`), the memory-mapped device that stands in for
//! the BPRAM region (`controller`), and the error type both raise
//! (`error`). The persistence engine itself — allocator, tree, crawler,
//! transaction wrapper — lives in `bpfs-core`.

#![deny(missing_docs)]

pub mod controller;
pub mod error;
pub mod types;
