//! Unix stack mapping using mmap
//!
//! The whole region is reserved PROT_NONE, then everything above the
//! guard is made read/write. A stack overflow runs into the guard and
//! faults instead of corrupting the neighbouring mapping.

use costack_core::{kwarn, EngineError, EngineResult, ErrorKind};
use nix::errno::Errno;
use std::ptr::NonNull;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        const MAP_FLAGS: libc::c_int =
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_STACK;
    } else {
        const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;
    }
}

pub(super) fn query_page_size() -> Option<usize> {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|s| *s > 0)
}

/// Map `total` bytes; the lowest `guard` bytes stay inaccessible
pub(super) fn map_stack(total: usize, guard: usize) -> EngineResult<NonNull<u8>> {
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            total,
            libc::PROT_NONE,
            MAP_FLAGS,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        let errno = Errno::last();
        return Err(EngineError::new(
            ErrorKind::OutOfMemory,
            format!("mmap of {} byte stack failed: {}", total, errno),
        ));
    }

    let usable_start = unsafe { (base as *mut u8).add(guard) };
    let ret = unsafe {
        libc::mprotect(
            usable_start as *mut libc::c_void,
            total - guard,
            libc::PROT_READ | libc::PROT_WRITE,
        )
    };
    if ret != 0 {
        let errno = Errno::last();
        unsafe { libc::munmap(base, total) };
        return Err(EngineError::new(
            ErrorKind::OutOfMemory,
            format!("mprotect of {} byte stack failed: {}", total - guard, errno),
        ));
    }

    NonNull::new(base as *mut u8)
        .ok_or_else(|| EngineError::new(ErrorKind::OutOfMemory, "mmap returned null"))
}

/// Release a region returned by [`map_stack`]
pub(super) fn unmap_stack(base: *mut u8, total: usize) {
    let ret = unsafe { libc::munmap(base as *mut libc::c_void, total) };
    if ret != 0 {
        kwarn!("munmap of coroutine stack failed: {}", Errno::last());
    }
}
