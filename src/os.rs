//! Thin, uniform interface over the POSIX virtual-memory primitives the
//! allocator needs: reserve a contiguous anonymous region, release one, and
//! advise a sub-range "don't need". Nothing above this module is allowed to
//! call `mmap`/`munmap`/`madvise` directly.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::fatal;

/// The host's small page size. The size-class chunk-multiplier arithmetic
/// is only valid when this is 4096; every other constant in the
/// crate is derived assuming it.
pub const SMALL_PAGE_SIZE: usize = 4096;

/// Cached `sysconf(_SC_PAGESIZE)`, checked once against [`SMALL_PAGE_SIZE`].
/// A debug assertion, not a runtime branch: the size-class table is a
/// compile-time constant and would simply be wrong on a host with a
/// different page size, not unsafe.
pub fn page_size() -> usize {
    static CACHED: AtomicUsize = AtomicUsize::new(0);
    let cached = CACHED.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    debug_assert_eq!(
        size, SMALL_PAGE_SIZE,
        "host page size {size} does not match the compiled-in small page size"
    );
    CACHED.store(size, Ordering::Relaxed);
    size
}

/// Reserve a fresh, read-write, private, anonymous, zero-initialized region
/// of `len` bytes. `len` must already be a multiple of the host page size.
/// Fatal on failure: an allocator that cannot get memory from the OS has no
/// meaningful recovery path.
pub fn reserve(len: usize) -> *mut u8 {
    debug_assert!(len > 0 && len % SMALL_PAGE_SIZE == 0);
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    // The documented failure sentinel for mmap is `MAP_FAILED`, a
    // distinguished invalid address, not null.
    if addr == libc::MAP_FAILED {
        fatal(&format!("mmap failed: len={len}, errno={}", errno::errno()));
    }
    addr as *mut u8
}

/// Unmap a region reserved by [`reserve`]. Only called from teardown;
/// failures are logged and otherwise ignored so the remaining mappings
/// still get a chance to be released.
pub fn release(ptr: *mut u8, len: usize) {
    if ptr.is_null() || len == 0 {
        return;
    }
    let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, len) };
    if rc != 0 {
        log::warn!(
            "munmap failed during teardown: ptr={ptr:p}, len={len}, errno={}",
            errno::errno()
        );
    }
}

/// Ask the OS to drop physical backing for `[ptr, ptr+len)`. Reads after
/// this returns as zeroes; the next write faults a new page. Fatal on
/// failure, mirroring `reserve` — the allocator has no fallback behavior if
/// the host refuses a basic memory-management hint.
pub fn advise_unneeded(ptr: *mut u8, len: usize) {
    if len == 0 {
        return;
    }
    debug_assert!(!ptr.is_null());
    let rc = unsafe { libc::madvise(ptr as *mut libc::c_void, len, libc::MADV_DONTNEED) };
    if rc != 0 {
        fatal(&format!(
            "madvise(MADV_DONTNEED) failed: ptr={ptr:p}, len={len}, errno={}",
            errno::errno()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_release_round_trips() {
        let len = page_size() * 4;
        let p = reserve(len);
        assert!(!p.is_null());
        unsafe {
            // freshly reserved anonymous memory must read as zero
            assert_eq!(*p, 0);
            *p = 0xAB;
            assert_eq!(*p, 0xAB);
        }
        advise_unneeded(p, len);
        unsafe {
            // MADV_DONTNEED drops the write; reads fault in a fresh zero page
            assert_eq!(*p, 0);
        }
        release(p, len);
    }
}
