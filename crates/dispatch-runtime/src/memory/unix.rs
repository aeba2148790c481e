//! Unix stack mapping using mmap

use std::ptr::NonNull;
use std::sync::OnceLock;

use dispatch_core::constants::GUARD_SIZE;
use dispatch_core::error::MemoryError;
use dispatch_core::kerror;

pub(super) fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            GUARD_SIZE
        }
    })
}

/// Map `len` bytes read/write and turn the lowest page into a guard
pub(super) fn map_stack(len: usize) -> Result<NonNull<u8>, MemoryError> {
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | map_stack_flag(),
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        return Err(MemoryError::AllocationFailed);
    }

    // Guard page at the low end; overflow faults here
    let ret = unsafe { libc::mprotect(base, GUARD_SIZE, libc::PROT_NONE) };
    if ret != 0 {
        unsafe { libc::munmap(base, len) };
        return Err(MemoryError::ProtectionFailed);
    }

    NonNull::new(base as *mut u8).ok_or(MemoryError::AllocationFailed)
}

pub(super) fn unmap_stack(base: NonNull<u8>, len: usize) {
    let ret = unsafe { libc::munmap(base.as_ptr() as *mut libc::c_void, len) };
    if ret != 0 {
        kerror!("munmap of fiber stack at {:p} failed", base.as_ptr());
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn map_stack_flag() -> libc::c_int {
    libc::MAP_STACK | libc::MAP_NORESERVE
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn map_stack_flag() -> libc::c_int {
    0
}
