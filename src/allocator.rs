use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    check::HeapStats, config::HeapConfig, error::CheckError, heap::Heap, tag::ALIGNMENT,
    AllocError, Pointer,
};

/// [`Heap`] behind a [`Mutex`], so that it can be shared between threads and
/// installed as the global allocator. Every operation takes the lock for its
/// whole duration, there's no finer grained locking.
///
/// # Examples
///
/// ## Standalone allocator
///
/// ```rust
/// use tagalloc::LockedHeap;
///
/// let heap = LockedHeap::new();
///
/// let address = heap.allocate(128).unwrap().unwrap();
/// assert_eq!(address.as_ptr() as usize % tagalloc::ALIGNMENT, 0);
///
/// let address = unsafe { heap.resize(Some(address), 512) }.unwrap();
/// unsafe { heap.release(address) };
///
/// assert!(heap.check().is_ok());
/// ```
///
/// ## Global allocator
///
/// ```no_run
/// use tagalloc::LockedHeap;
///
/// #[global_allocator]
/// static ALLOCATOR: LockedHeap = LockedHeap::new();
///
/// fn main() {
///     let num = Box::new(5);
///     assert_eq!(*num, 5);
/// }
/// ```
///
/// Only layouts aligned to [`ALIGNMENT`] or less can be served. Installing
/// a logger that allocates while this is the global allocator deadlocks, the
/// heap logs while holding its lock.
pub struct LockedHeap {
    heap: Mutex<Heap>,
}

impl LockedHeap {
    /// Heap with the default configuration, see [`HeapConfig`].
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    pub const fn with_config(config: HeapConfig) -> Self {
        Self {
            heap: Mutex::new(Heap::with_config(config)),
        }
    }

    /// Locks the heap. A panic while holding the lock can't leave the heap
    /// half updated in a way that matters more than the panic itself, so
    /// poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Heap> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`Heap::allocate`].
    pub fn allocate(&self, size: usize) -> Result<Pointer<u8>, AllocError> {
        self.lock().allocate(size)
    }

    /// See [`Heap::release`].
    ///
    /// # Safety
    ///
    /// Same as [`Heap::release`].
    pub unsafe fn release(&self, address: Pointer<u8>) {
        self.lock().release(address)
    }

    /// See [`Heap::resize`].
    ///
    /// # Safety
    ///
    /// Same as [`Heap::resize`].
    pub unsafe fn resize(&self, address: Pointer<u8>, size: usize) -> Result<Pointer<u8>, AllocError> {
        self.lock().resize(address, size)
    }

    /// See [`Heap::check`]. The check allocates while holding the lock, so
    /// it can't be called on the instance installed as global allocator.
    pub fn check(&self) -> Result<HeapStats, CheckError> {
        self.lock().check()
    }

    /// See [`Heap::diagnostic_dump`]. Same restriction as
    /// [`LockedHeap::check`].
    pub fn diagnostic_dump(&self) -> String {
        self.lock().diagnostic_dump()
    }

    /// See [`Heap::heap_size`].
    pub fn heap_size(&self) -> usize {
        self.lock().heap_size()
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn into_raw(result: Result<Pointer<u8>, AllocError>) -> *mut u8 {
    match result {
        Ok(Some(address)) => address.as_ptr(),
        _ => ptr::null_mut(),
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        into_raw(self.allocate(layout.size()))
    }

    unsafe fn dealloc(&self, address: *mut u8, _layout: Layout) {
        self.release(NonNull::new(address))
    }

    unsafe fn realloc(&self, address: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        into_raw(self.resize(NonNull::new(address), new_size))
    }
}
