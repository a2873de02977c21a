//! Bitmapped allocator with staged allocate/free lists.
//!
//! One instance of this type backs the block allocator and another backs
//! the inode allocator; both bitmaps are purely ephemeral — reconstructed at
//! mount time by [`crate::mount`] rather than stored on media — so this type
//! owns its bitmap directly rather than paging it through the device.

use crate::error::AllocError;
use log::debug;

/// A bitmapped id allocator with staged alloc/free lists.
///
/// Bit `i` set means id `i` is currently allocated. `alloc`/`free` only
/// stage their effect; `commit` makes it permanent and `abort` rolls it
/// back, so a transaction that touches several ids can still unwind
/// cleanly on failure.
#[derive(Debug, Clone)]
pub struct BitmapAllocator {
    bits: Vec<u8>,
    total: u64,
    staged_alloc: Vec<u64>,
    staged_free: Vec<u64>,
    pre_resize_total: Option<u64>,
}

impl BitmapAllocator {
    /// Create an allocator for `total` ids, all initially free.
    pub fn new(total: u64) -> BitmapAllocator {
        BitmapAllocator {
            bits: vec![0u8; Self::byte_len(total)],
            total,
            staged_alloc: Vec::new(),
            staged_free: Vec::new(),
            pre_resize_total: None,
        }
    }

    fn byte_len(total: u64) -> usize {
        ((total + 7) / 8) as usize
    }

    /// Total number of ids this allocator covers.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of ids currently allocated (net of any staged changes).
    pub fn in_use(&self) -> u64 {
        (0..self.total).filter(|&i| self.is_set(i)).count() as u64
    }

    fn is_set(&self, i: u64) -> bool {
        let byte = self.bits[(i / 8) as usize];
        (byte >> (i % 8)) & 1 == 1
    }

    fn set_bit(&mut self, i: u64) {
        self.bits[(i / 8) as usize] |= 1 << (i % 8);
    }

    fn clear_bit(&mut self, i: u64) {
        self.bits[(i / 8) as usize] &= !(1 << (i % 8));
    }

    /// Allocate the first free id, marking it used immediately and staging
    /// it so `abort` can undo it.
    pub fn alloc(&mut self) -> Result<u64, AllocError> {
        for i in 0..self.total {
            if !self.is_set(i) {
                self.set_bit(i);
                self.staged_alloc.push(i);
                debug!("alloc: staged id {} ({} staged so far)", i, self.staged_alloc.len());
                return Ok(i);
            }
        }
        Err(AllocError::NoSpace)
    }

    /// Stage the free of `id`. The bit is not actually cleared until
    /// `commit`.
    ///
    /// # Errors
    /// Errors if `id` is not currently allocated, or was itself allocated in
    /// this same transaction (freeing within the same transaction that
    /// allocated it is simply not staging a free at all — the caller should
    /// not call `free` on its own staged allocation).
    pub fn free(&mut self, id: u64) -> Result<(), AllocError> {
        if !self.is_set(id) {
            return Err(AllocError::DoubleFree(id));
        }
        if self.staged_alloc.contains(&id) {
            return Err(AllocError::DoubleFree(id));
        }
        self.staged_free.push(id);
        debug!("free: staged id {} ({} staged so far)", id, self.staged_free.len());
        Ok(())
    }

    /// Force `id` to be marked allocated, used by mount discovery to
    /// reconstruct the bitmap. Returns whether the bit was already set
    /// (used to detect double references, e.g. a directory entry visited
    /// twice).
    pub fn ensure_set(&mut self, id: u64) -> bool {
        let was_set = self.is_set(id);
        self.set_bit(id);
        was_set
    }

    /// Discard staged changes, restoring the bitmap to its state at the
    /// start of the transaction.
    pub fn abort(&mut self) {
        for id in self.staged_alloc.drain(..) {
            self.clear_bit(id);
        }
        self.staged_free.clear();
        if let Some(total) = self.pre_resize_total.take() {
            self.bits.truncate(Self::byte_len(total));
            self.total = total;
        }
    }

    /// Make staged changes permanent.
    pub fn commit(&mut self) {
        self.staged_alloc.clear();
        for id in self.staged_free.drain(..) {
            self.clear_bit(id);
        }
        self.pre_resize_total = None;
    }

    /// Grow or shrink the id space to `new_total`.
    ///
    /// Shrinking requires every id at or beyond `new_total` to be free;
    /// growing zero-extends the bitmap. Records the previous total so
    /// `abort` can undo the change.
    pub fn resize(&mut self, new_total: u64) -> Result<(), AllocError> {
        if new_total < self.total {
            for i in new_total..self.total {
                if self.is_set(i) {
                    return Err(AllocError::ShrinkInUse(i));
                }
            }
        }
        if self.pre_resize_total.is_none() {
            self.pre_resize_total = Some(self.total);
        }
        self.bits.resize(Self::byte_len(new_total), 0);
        self.total = new_total;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_abort_restores_state() {
        let mut a = BitmapAllocator::new(8);
        let id = a.alloc().unwrap();
        assert_eq!(a.in_use(), 1);
        a.abort();
        assert_eq!(a.in_use(), 0);
        assert_eq!(a.alloc().unwrap(), id);
    }

    #[test]
    fn free_then_commit_clears_bit() {
        let mut a = BitmapAllocator::new(8);
        a.commit();
        let id = a.alloc().unwrap();
        a.commit();
        a.free(id).unwrap();
        assert_eq!(a.in_use(), 1);
        a.commit();
        assert_eq!(a.in_use(), 0);
    }

    #[test]
    fn double_free_errors() {
        let mut a = BitmapAllocator::new(8);
        let id = a.alloc().unwrap();
        a.commit();
        a.free(id).unwrap();
        assert!(a.free(id).is_err());
    }

    #[test]
    fn no_space_once_exhausted() {
        let mut a = BitmapAllocator::new(2);
        a.alloc().unwrap();
        a.alloc().unwrap();
        assert!(matches!(a.alloc(), Err(AllocError::NoSpace)));
    }

    #[test]
    fn shrink_refuses_in_use_region() {
        let mut a = BitmapAllocator::new(8);
        let _id = a.alloc().unwrap();
        a.commit();
        assert!(a.resize(0).is_err());
    }

    #[test]
    fn resize_abort_restores_total() {
        let mut a = BitmapAllocator::new(8);
        a.resize(16).unwrap();
        assert_eq!(a.total(), 16);
        a.abort();
        assert_eq!(a.total(), 8);
    }
}
