#![allow(dead_code)]

//! Shared scenario-setup helpers for the integration tests, analogous to the
//! teacher project's `fs-tests/utils.rs`: a fresh temporary image per test so
//! scenarios never interfere with each other, with the temp directory kept
//! alive (and so cleaned up on drop) alongside the `Fs` it backs.

use bpfs_core::fs::{Fs, MkfsOptions};
use bpfs_api::types::CommitMode;
use tempfile::TempDir;

/// Format a fresh image of `nblocks` blocks using short-circuit commits.
pub fn fresh(nblocks: u64) -> (TempDir, Fs) {
    fresh_with_mode(nblocks, CommitMode::ShortCircuit)
}

/// Format a fresh image with an explicit commit mode.
pub fn fresh_with_mode(nblocks: u64, commit_mode: CommitMode) -> (TempDir, Fs) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("img");
    let fs = Fs::mkfs(&path, &MkfsOptions { nblocks, commit_mode }).unwrap();
    (dir, fs)
}

/// The image path a `TempDir` produced by [`fresh`] formatted its device at.
pub fn image_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("img")
}
