use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::Pointer;

/// Abstraction for platform specific memory handling. The arena only needs to
/// reserve one contiguous mapping when it is first grown and hand it back when
/// it's dropped; it doesn't care which kernel API provides the pages.
trait PlatformSpecificMemory {
    /// Requests a memory region from the kernel where `length` bytes can be
    /// written safely. The returned address is page aligned.
    unsafe fn request_memory(length: usize) -> Pointer<u8>;

    /// Returns `length` bytes starting at `address` to the kernel. `address`
    /// and `length` must describe a mapping obtained from
    /// [`PlatformSpecificMemory::request_memory`].
    unsafe fn return_memory(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
pub(crate) struct Platform;

/// Cached page size. Only known at runtime, `0` until the first query.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Page size of the current machine, 4096 bytes on most of them.
#[inline]
pub(crate) fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Platform::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Rounds `length` up to a whole number of pages.
#[inline]
pub(crate) fn page_align(length: usize) -> Option<usize> {
    let page = page_size();
    Some(length.checked_add(page - 1)? & !(page - 1))
}

/// Convenience wrapper for [`PlatformSpecificMemory::request_memory`].
#[inline]
pub(crate) unsafe fn request_memory(length: usize) -> Pointer<u8> {
    Platform::request_memory(length)
}

/// Convenience wrapper for [`PlatformSpecificMemory::return_memory`].
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    Platform::return_memory(address, length)
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Read-Write only, private to our process and not backed by a
            // file. Untouched pages are not committed by the kernel, so a
            // large reservation only costs address space.
            let protection = libc::PROT_READ | libc::PROT_WRITE;
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => NonNull::new(address.cast()),
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                log::warn!("munmap({address:p}, {length}) failed, mapping leaked");
            }
        }

        unsafe fn page_size() -> usize {
            libc::sysconf(libc::_SC_PAGE_SIZE) as usize
        }
    }
}

#[cfg(windows)]
#[cfg(not(miri))]
mod windows {
    use std::{mem::MaybeUninit, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Reserve and commit in one call, Read-Write only.
            let protection = Memory::PAGE_READWRITE;
            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            let address = Memory::VirtualAlloc(None, length, flags, protection);

            NonNull::new(address.cast())
        }

        unsafe fn return_memory(address: NonNull<u8>, _length: usize) {
            // MEM_RELEASE requires a length of 0 and releases the whole
            // reservation at once.
            let address = address.cast().as_ptr();

            if !Memory::VirtualFree(address, 0, Memory::MEM_RELEASE).as_bool() {
                log::warn!("VirtualFree({address:p}) failed, mapping leaked");
            }
        }

        unsafe fn page_size() -> usize {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

#[cfg(any(miri, not(any(unix, windows))))]
mod fallback {
    //! Miri has no FFI support, so `mmap` is out of the question. The global
    //! allocator stands in for the kernel, which also lets Miri report arenas
    //! that are never handed back.

    use std::{alloc, ptr::NonNull};

    use super::{page_size, Platform, PlatformSpecificMemory};
    use crate::Pointer;

    fn to_layout(length: usize) -> Option<alloc::Layout> {
        alloc::Layout::from_size_align(length, page_size()).ok()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc_zeroed(to_layout(length)?))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if let Some(layout) = to_layout(length) {
                alloc::dealloc(address.as_ptr(), layout);
            }
        }

        unsafe fn page_size() -> usize {
            4096
        }
    }
}
