use thiserror::Error;

/// Failures reported by [`crate::Heap`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The arena could not be grown. The heap is left exactly as it was
    /// before the failed call.
    #[error("out of memory: arena cannot grow by {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The pointer given to `resize` doesn't point at the payload of a block
    /// currently allocated from this heap.
    #[error("address {address:#x} is not an allocated payload of this heap")]
    InvalidPointer { address: usize },
}

/// Structural inconsistencies found by [`crate::Heap::check`]. Offsets are
/// payload offsets from the start of the arena.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("prologue or epilogue sentinel is damaged at offset {offset}")]
    Sentinel { offset: usize },

    #[error("block at offset {offset} has invalid size {size}")]
    BadSize { offset: usize, size: usize },

    #[error("block at offset {offset} is not aligned")]
    Misaligned { offset: usize },

    #[error("block at offset {offset} extends past the top of the arena")]
    OutOfBounds { offset: usize },

    #[error("block at offset {offset}: header {header:#x} and footer {footer:#x} disagree")]
    TagMismatch {
        offset: usize,
        header: u32,
        footer: u32,
    },

    #[error("free blocks at offsets {first} and {second} are adjacent but not coalesced")]
    Uncoalesced { first: usize, second: usize },

    #[error("free list entry at offset {offset} is not a free block of this heap")]
    NotFree { offset: usize },

    #[error("free list visits offset {offset} twice")]
    Cycle { offset: usize },

    #[error("free list back link of offset {offset} is broken")]
    BrokenLink { offset: usize },

    #[error("{missing} free block(s) are not reachable from the free list root")]
    Unlisted { missing: usize },

    #[error("free list length is {recorded}, but {counted} entries were found")]
    LengthMismatch { recorded: usize, counted: usize },
}
