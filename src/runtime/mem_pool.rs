//! Batch-scoped memory pool
//!
//! Backs unescaped and copied string values. Allocations are never freed
//! one by one; the whole pool is released with [`MemPool::clear`] (or on
//! drop) once the batch that used it is done.

use bumpalo::Bump;
use std::cell::Cell;

/// Bump allocator for one batch
#[derive(Default)]
pub struct MemPool {
    arena: Bump,
    requested: Cell<usize>,
}

impl MemPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            arena: Bump::with_capacity(bytes),
            requested: Cell::new(0),
        }
    }

    /// Zeroed buffer of `len` bytes, valid until the pool is cleared.
    ///
    /// Moving the pool does not move its chunks, so raw pointers into the
    /// buffer stay valid for as long as the pool is not cleared or dropped.
    pub fn allocate(&self, len: usize) -> &mut [u8] {
        self.requested.set(self.requested.get() + len);
        self.arena.alloc_slice_fill_copy(len, 0u8)
    }

    /// Copy `src` into the pool
    pub fn copy_from(&self, src: &[u8]) -> &mut [u8] {
        self.requested.set(self.requested.get() + src.len());
        self.arena.alloc_slice_copy(src)
    }

    /// Bytes handed out since the last clear
    pub fn total_allocated_bytes(&self) -> usize {
        self.requested.get()
    }

    /// Bytes reserved from the system, including unused chunk space
    pub fn reserved_bytes(&self) -> usize {
        self.arena.allocated_bytes()
    }

    /// Release every allocation at once
    pub fn clear(&mut self) {
        self.arena.reset();
        self.requested.set(0);
    }
}

impl std::fmt::Debug for MemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPool")
            .field("allocated", &self.total_allocated_bytes())
            .field("reserved", &self.reserved_bytes())
            .finish()
    }
}
