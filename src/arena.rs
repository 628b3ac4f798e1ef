use std::{ptr::NonNull, slice};

use crate::{config::DEFAULT_MAX_HEAP, config::MAX_HEAP_LIMIT, platform, AllocError, Pointer};

/// A single contiguous, append-only memory region that a [`crate::Heap`]
/// lays its blocks on. This is the only thing the heap needs from its host:
/// a way to move the top of the region up, like `sbrk` moves the program
/// break.
///
/// ```text
///  base                                      base + len
///   |                                            |
///   v                                            v
///   +---------------------------------------------+~~~~~~~~~~~~~~~~~~~~~~~+
///   |       bytes owned by the heap               |  sbrk(n) moves top up |
///   +---------------------------------------------+~~~~~~~~~~~~~~~~~~~~~~~+
/// ```
///
/// # Safety
///
/// Implementors guarantee that `base()` stays the same once the arena holds
/// any bytes, that `len()` never decreases, and that `base()..base() + len()`
/// is valid for reads and writes and not used by anything else for as long as
/// the arena is alive. `base()` must be aligned to at least
/// [`crate::ALIGNMENT`].
///
/// Tags and free list links are 32 bit words, so the heap never asks for
/// growth that would take `len()` past [`MAX_HEAP_LIMIT`]. Arenas must not
/// grow on their own beyond what `sbrk` was asked for.
pub unsafe trait HeapArena {
    /// Grows the arena by `increment` bytes and returns the previous length,
    /// which is the offset where the new bytes start. On failure the arena is
    /// not modified.
    fn sbrk(&mut self, increment: usize) -> Result<usize, AllocError>;

    /// Address of the first byte. Dangling while the arena is empty.
    fn base(&self) -> NonNull<u8>;

    /// Current number of bytes in the arena.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All the bytes currently in the arena.
    #[inline]
    fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.base().as_ptr(), self.len()) }
    }

    /// All the bytes currently in the arena, mutably.
    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.base().as_ptr(), self.len()) }
    }
}

/// Arena backed by one mapping reserved from the kernel the first time it's
/// grown. The mapping is as large as the configured capacity, so growing
/// never moves previously returned addresses, and it's only handed back to
/// the kernel when the arena is dropped.
#[derive(Debug)]
pub struct MappedArena {
    /// Start of the reservation, `None` until the first growth.
    base: Pointer<u8>,
    /// Current top of the arena, relative to `base`.
    brk: usize,
    /// Maximum number of bytes this arena can grow to.
    capacity: usize,
}

// The mapping is owned exclusively by this struct.
unsafe impl Send for MappedArena {}

impl MappedArena {
    /// Arena with the default capacity, see [`DEFAULT_MAX_HEAP`].
    pub const fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HEAP)
    }

    /// Arena that can grow up to `capacity` bytes, clamped to
    /// [`MAX_HEAP_LIMIT`]. Nothing is mapped yet.
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            base: None,
            brk: 0,
            capacity: if capacity > MAX_HEAP_LIMIT {
                MAX_HEAP_LIMIT
            } else {
                capacity
            },
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be requested with [`HeapArena::sbrk`].
    pub fn remaining(&self) -> usize {
        self.capacity - self.brk
    }

    /// Length of the mapping requested from the kernel.
    fn mapping_length(&self) -> Option<usize> {
        platform::page_align(self.capacity.max(1))
    }

    /// Returns the reservation, mapping it first if needed.
    fn reservation(&mut self, increment: usize) -> Result<NonNull<u8>, AllocError> {
        if let Some(base) = self.base {
            return Ok(base);
        }

        let out_of_memory = AllocError::OutOfMemory {
            requested: increment,
        };
        let length = self.mapping_length().ok_or(out_of_memory)?;
        let base = unsafe { platform::request_memory(length) }.ok_or(out_of_memory)?;

        log::debug!("reserved arena of {length} bytes at {base:p}");
        self.base = Some(base);

        Ok(base)
    }
}

impl Default for MappedArena {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl HeapArena for MappedArena {
    fn sbrk(&mut self, increment: usize) -> Result<usize, AllocError> {
        if increment > self.remaining() {
            log::warn!(
                "sbrk({increment}) refused, {} of {} bytes in use",
                self.brk,
                self.capacity
            );
            return Err(AllocError::OutOfMemory {
                requested: increment,
            });
        }

        self.reservation(increment)?;

        let old_brk = self.brk;
        self.brk += increment;

        Ok(old_brk)
    }

    #[inline]
    fn base(&self) -> NonNull<u8> {
        self.base.unwrap_or(NonNull::dangling())
    }

    #[inline]
    fn len(&self) -> usize {
        self.brk
    }
}

impl Drop for MappedArena {
    fn drop(&mut self) {
        if let (Some(base), Some(length)) = (self.base, self.mapping_length()) {
            unsafe { platform::return_memory(base, length) };
        }
    }
}
