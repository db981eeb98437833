//! Allocation capability used by workers.
//!
//! Workers never call the global allocator directly for their chunks; they go
//! through [`Allocator`] so the ALLOCATING -> IDLE transition can be driven
//! deterministically without exhausting real memory.

use thiserror::Error;

/// Byte written into every chunk so its pages are committed, not just reserved.
const FILL_BYTE: u8 = b' ';

/// A chunk request the allocator could not satisfy
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to allocate {size} bytes")]
pub struct AllocError {
    pub size: usize,
}

/// Source of memory chunks for a worker
pub trait Allocator {
    /// Hand out a chunk of `size` bytes, or report that memory is exhausted.
    fn allocate(&mut self, size: usize) -> Result<Vec<u8>, AllocError>;
}

/// Allocator backed by the process heap
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl Allocator for SystemAllocator {
    fn allocate(&mut self, size: usize) -> Result<Vec<u8>, AllocError> {
        let mut chunk = Vec::new();
        chunk
            .try_reserve_exact(size)
            .map_err(|_| AllocError { size })?;
        // Capacity is already reserved, so this cannot reallocate.
        chunk.resize(size, FILL_BYTE);
        Ok(chunk)
    }
}

/// Allocator that succeeds a fixed number of times and then always fails.
///
/// Successful calls return empty chunks, so a worker driven by it holds no
/// real memory.
#[derive(Debug, Clone)]
pub struct FailAfter {
    remaining: usize,
    calls: usize,
}

impl FailAfter {
    pub fn new(successes: usize) -> Self {
        Self {
            remaining: successes,
            calls: 0,
        }
    }

    /// Total number of `allocate` calls seen, successful or not.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Allocator for FailAfter {
    fn allocate(&mut self, size: usize) -> Result<Vec<u8>, AllocError> {
        self.calls += 1;
        if self.remaining == 0 {
            return Err(AllocError { size });
        }
        self.remaining -= 1;
        Ok(Vec::new())
    }
}
