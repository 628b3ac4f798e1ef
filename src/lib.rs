//! Boundary tag allocator over a single growable arena.
//!
//! Blocks carry a header and a footer with their size and allocated bit, free
//! blocks are kept in an explicit LIFO list threaded through their payloads,
//! and released blocks are merged with free neighbors right away. Resizing
//! tries hard to stay in place before moving anything.
//!
//! [`Heap`] is the single threaded allocator, [`LockedHeap`] wraps it in a
//! lock and implements [`std::alloc::GlobalAlloc`].
//!
//! ```rust
//! use tagalloc::Heap;
//!
//! let mut heap = Heap::new();
//! let address = heap.allocate(100).unwrap();
//! let address = unsafe { heap.resize(address, 300) }.unwrap();
//! unsafe { heap.release(address) };
//!
//! let stats = heap.check().unwrap();
//! assert_eq!(stats.allocated_blocks, 0);
//! ```

use std::ptr::NonNull;

mod allocator;
mod arena;
mod block;
mod check;
mod config;
mod error;
mod freelist;
mod heap;
mod platform;
mod realloc;
mod tag;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case. Payload addresses are handed out and taken back as `Pointer<u8>`.
pub type Pointer<T> = Option<NonNull<T>>;

pub use allocator::LockedHeap;
pub use arena::{HeapArena, MappedArena};
pub use check::{HeapDump, HeapStats};
pub use config::{HeapConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_HEAP, MAX_HEAP_LIMIT};
pub use error::{AllocError, CheckError};
pub use heap::Heap;
pub use tag::{align, ALIGNMENT, MIN_BLOCK_SIZE};
