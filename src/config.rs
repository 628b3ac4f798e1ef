use crate::tag::{align, MIN_BLOCK_SIZE};

/// Default amount of bytes the arena grows by when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Default maximum arena size, 20 MiB.
pub const DEFAULT_MAX_HEAP: usize = 20 << 20;

/// Largest arena that can be addressed. Free list links and tags are stored
/// as 32 bit words.
pub const MAX_HEAP_LIMIT: usize = u32::MAX as usize & !(crate::tag::ALIGNMENT - 1);

/// Tunables of a [`crate::Heap`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum number of bytes requested from the arena whenever it has to
    /// grow. Always a multiple of [`crate::ALIGNMENT`].
    pub chunk_size: usize,
    /// Capacity reserved by [`crate::MappedArena`]. Ignored by custom arenas.
    pub max_heap: usize,
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_heap: DEFAULT_MAX_HEAP,
        }
    }

    /// Sets the growth granularity. Rounded up to the alignment unit and never
    /// smaller than the minimum block size.
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else if chunk_size > MAX_HEAP_LIMIT {
            MAX_HEAP_LIMIT
        } else {
            chunk_size
        };
        self.chunk_size = align(chunk_size);
        self
    }

    /// Sets the maximum arena size, clamped to [`MAX_HEAP_LIMIT`].
    pub const fn with_max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = if max_heap > MAX_HEAP_LIMIT {
            MAX_HEAP_LIMIT
        } else {
            max_heap
        };
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}
