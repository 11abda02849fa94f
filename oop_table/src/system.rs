use std::ptr::NonNull;

#[cfg(unix)]
#[allow(unused)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_NONE: i32 = 0x0;
    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    #[cfg(target_os = "linux")]
    pub const MAP_NORESERVE: i32 = 0x4000;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_NORESERVE: i32 = 0x40;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap, mprotect and munmap
    /// # Safety
    /// see valid mmap and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn mprotect(addr: *mut c_void, length: usize, prot: i32) -> i32;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// reserves address space without backing it
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_reserve(len: usize) -> *mut u8 {
        // SAFETY: safe if contract holds
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_NONE,
                MAP_PRIVATE | MAP_ANON | MAP_NORESERVE,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// makes a reserved range readable and writable
    /// # Safety
    /// range must lie inside a reservation and be page aligned
    #[inline]
    pub unsafe fn anonymous_commit(ptr: *mut u8, len: usize) -> bool {
        // SAFETY: safe if contract holds
        unsafe { mprotect(ptr.cast(), len, PROT_READ | PROT_WRITE) == 0 }
    }

    /// posix memory deallocation using munmap
    /// # Safety
    /// must be allocated by mmmap
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// Reserves `size` bytes of address space. Nothing is committed yet, touching
/// the range faults until [`commit_memory`] is called on it.
#[must_use]
pub fn reserve_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: fresh anonymous mapping, null is checked below
    let ptr = unsafe { unix::anonymous_reserve(size) };
    NonNull::new(ptr)
}

/// Backs a page aligned part of a reservation with zeroed memory.
///
/// # Safety
/// `ptr..ptr + size` must lie inside a range returned by [`reserve_memory`].
#[must_use]
pub unsafe fn commit_memory(ptr: NonNull<u8>, size: usize) -> bool {
    debug_assert!((ptr.as_ptr() as usize).is_multiple_of(OS_PAGE_SIZE));
    debug_assert!(size.is_multiple_of(OS_PAGE_SIZE));
    // SAFETY: caller guarantees the range is reserved
    unsafe { unix::anonymous_commit(ptr.as_ptr(), size) }
}

pub fn release_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: ptr must be from mmap allocation
    unsafe { unix::anonymous_munmap(ptr.as_ptr(), size) };
}
