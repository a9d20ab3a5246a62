//! Append-only byte buffer used as the target of streaming write callbacks.
//!
//! # Design
//! Capacity grows by doubling from a 4 KiB baseline, so a response delivered
//! in `n` bytes of arbitrary chunks causes `O(log n)` reallocations. Storage is
//! always one byte larger than the logical capacity and the byte just past
//! `len` is kept at zero, so the contents can be handed to consumers that
//! expect a NUL-terminated string without copying.
//!
//! Growth goes through `try_reserve_exact`: an allocation failure is reported
//! as `BufferError::OutOfMemory` and leaves the buffer untouched, which lets a
//! write callback answer "0 bytes consumed" instead of aborting the process.

use thiserror::Error;

/// Smallest capacity allocated on first growth.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Failures of buffer mutation. Neither variant mutates the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("out of memory while growing buffer")]
    OutOfMemory,

    #[error("insertion index is past the end of the buffer")]
    OutOfBounds,
}

/// Growable byte buffer with amortized doubling.
#[derive(Debug, Default)]
pub struct GrowableBuffer {
    // Empty until the first successful growth, then `capacity + 1` bytes long.
    storage: Vec<u8>,
    len: usize,
    capacity: usize,
}

impl GrowableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Logical capacity, excluding the terminator byte.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True until the first non-empty write.
    pub fn is_unallocated(&self) -> bool {
        self.storage.is_empty()
    }

    /// Drop the contents but keep the allocation. Every byte of storage is
    /// zeroed so stale data from an earlier response cannot be observed.
    pub fn clear(&mut self) {
        self.storage.fill(0);
        self.len = 0;
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.insert(self.len, bytes)
    }

    /// Insert `bytes` at `index`, shifting the existing tail right.
    pub fn insert(&mut self, index: usize, bytes: &[u8]) -> Result<(), BufferError> {
        if index > self.len {
            return Err(BufferError::OutOfBounds);
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let needed = self
            .len
            .checked_add(bytes.len())
            .ok_or(BufferError::OutOfMemory)?;
        self.ensure_capacity(needed)?;

        self.storage.copy_within(index..self.len, index + bytes.len());
        self.storage[index..index + bytes.len()].copy_from_slice(bytes);
        self.len = needed;
        self.storage[self.len] = 0;
        Ok(())
    }

    /// Exactly `len` bytes; empty (never absent) when nothing was written.
    pub fn as_bytes(&self) -> &[u8] {
        if self.storage.is_empty() {
            &[]
        } else {
            &self.storage[..self.len]
        }
    }

    /// The contents followed by the terminator byte, or `None` before the
    /// first write.
    pub fn as_bytes_with_nul(&self) -> Option<&[u8]> {
        if self.storage.is_empty() {
            None
        } else {
            Some(&self.storage[..=self.len])
        }
    }

    pub fn to_owned_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn ensure_capacity(&mut self, needed: usize) -> Result<(), BufferError> {
        if self.capacity >= needed {
            return Ok(());
        }

        let mut new_capacity = self.capacity.max(DEFAULT_CAPACITY);
        while new_capacity < needed {
            new_capacity = new_capacity
                .checked_mul(2)
                .ok_or(BufferError::OutOfMemory)?;
        }

        let new_len = new_capacity
            .checked_add(1)
            .ok_or(BufferError::OutOfMemory)?;
        self.storage
            .try_reserve_exact(new_len - self.storage.len())
            .map_err(|_| BufferError::OutOfMemory)?;
        self.storage.resize(new_len, 0);
        self.capacity = new_capacity;
        Ok(())
    }
}
