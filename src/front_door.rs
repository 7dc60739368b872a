//! The three public entry points — allocate, free, reallocate — plus the
//! pointer-metadata protocol that lets free and realloc recover a page (or
//! a large mapping) from an opaque user pointer.

use crate::arena::{self, ARENA_NUM};
use crate::error::fatal;
use crate::os;
use crate::page::{self, PageHeader};
use crate::sizeclass::{self, BUCKET_MAX, SLOT_METADATA_BYTES};
use crate::stats;

/// Tag byte marking a large (non-bucketed) allocation.
pub const LARGE_PROVENANCE: u8 = 0xFF;

/// Leading bytes of a large allocation's mapping: an 8-byte total length
/// followed by the provenance tag.
const LARGE_HEADER_BYTES: usize = 9;

/// Allocate `n` bytes. Never returns null; fatal on OS failure. A request
/// of zero falls into the smallest size class.
pub fn allocate(n: usize) -> *mut u8 {
    if n > BUCKET_MAX {
        return allocate_large(n);
    }
    let c = sizeclass::class_for_size(n.max(1))
        .expect("every size up to BUCKET_MAX has a covering class");
    let alloc = arena::allocate(c);
    let offset = page::slot_header_offset(c, alloc.slot);
    unsafe {
        write_u32(alloc.payload.sub(SLOT_METADATA_BYTES), offset);
        *alloc.payload.sub(1) = alloc.arena as u8;
    }
    alloc.payload
}

fn write_u32(at: *mut u8, value: u32) {
    unsafe { at.cast::<u32>().write_unaligned(value) };
}

fn read_u32(at: *const u8) -> u32 {
    unsafe { at.cast::<u32>().read_unaligned() }
}

fn write_u64(at: *mut u8, value: u64) {
    unsafe { at.cast::<u64>().write_unaligned(value) };
}

fn read_u64(at: *const u8) -> u64 {
    unsafe { at.cast::<u64>().read_unaligned() }
}

/// Serve a request above `BUCKET_MAX` directly from the OS.
fn allocate_large(n: usize) -> *mut u8 {
    let total = n
        .checked_add(LARGE_HEADER_BYTES)
        .unwrap_or_else(|| fatal("allocation size overflows usize"));
    let rounded = round_up(total, os::SMALL_PAGE_SIZE);
    let start = os::reserve(rounded);
    write_u64(start, rounded as u64);
    unsafe { *start.add(8) = LARGE_PROVENANCE };
    stats::record_large_allocation(rounded);
    unsafe { start.add(LARGE_HEADER_BYTES) }
}

fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

/// Free a pointer previously returned by [`allocate`] or [`reallocate`].
/// Null is a no-op; a corrupt provenance byte is fatal.
pub fn free(p: *mut u8) {
    if p.is_null() {
        return;
    }
    let provenance = unsafe { *p.sub(1) };
    if provenance == LARGE_PROVENANCE {
        let length = read_u64(unsafe { p.sub(LARGE_HEADER_BYTES) }) as usize;
        os::release(unsafe { p.sub(LARGE_HEADER_BYTES) }, length);
    } else if (provenance as usize) < ARENA_NUM {
        let (c, page_ptr, k) = locate_bucket_slot(p);
        unsafe { arena::free(c, provenance as usize, page_ptr, k) };
    } else {
        fatal(&format!(
            "corrupt provenance byte {provenance} at {:p}",
            unsafe { p.sub(1) }
        ));
    }
}

/// Recover `(class, page, slot index)` for a bucketed pointer from its
/// stored header offset.
fn locate_bucket_slot(p: *mut u8) -> (usize, *mut PageHeader, u32) {
    let offset = read_u32(unsafe { p.sub(SLOT_METADATA_BYTES) });
    let page_ptr = unsafe { p.sub(SLOT_METADATA_BYTES).sub(offset as usize) } as *mut PageHeader;
    let c = unsafe { page::class_index_of(page_ptr) };
    let k = unsafe { page::slot_index_from_payload(page::page_start(page_ptr), p, c) };
    (c, page_ptr, k)
}

/// Reallocate `prev` to `n` bytes. Null in, null out.
pub fn reallocate(prev: *mut u8, n: usize) -> *mut u8 {
    if prev.is_null() {
        return prev;
    }
    let provenance = unsafe { *prev.sub(1) };
    if provenance == LARGE_PROVENANCE {
        reallocate_large(prev, n)
    } else if (provenance as usize) < ARENA_NUM {
        reallocate_bucket(prev, n)
    } else {
        fatal(&format!(
            "corrupt provenance byte {provenance} at {:p}",
            unsafe { prev.sub(1) }
        ))
    }
}

fn reallocate_large(prev: *mut u8, n: usize) -> *mut u8 {
    let total_len = read_u64(unsafe { prev.sub(LARGE_HEADER_BYTES) }) as usize;
    let old_len = total_len - LARGE_HEADER_BYTES;
    if n <= old_len && n >= old_len.div_ceil(4) * 3 {
        return prev;
    }
    let new_ptr = allocate(n);
    unsafe { std::ptr::copy_nonoverlapping(prev, new_ptr, n.min(old_len)) };
    free(prev);
    new_ptr
}

fn reallocate_bucket(prev: *mut u8, n: usize) -> *mut u8 {
    let offset = read_u32(unsafe { prev.sub(SLOT_METADATA_BYTES) });
    let page_ptr = unsafe { prev.sub(SLOT_METADATA_BYTES).sub(offset as usize) } as *mut PageHeader;
    let old_class = unsafe { page::class_index_of(page_ptr) };
    let old_size = sizeclass::CLASS_SIZE[old_class];

    let grew_out_of_class = n > old_size;
    let shrank_past_two_thirds = n < two_thirds_ceil(old_size) && old_size != sizeclass::BUCKET_MIN;
    if n > sizeclass::BUCKET_MAX || grew_out_of_class || shrank_past_two_thirds {
        let new_ptr = allocate(n);
        unsafe { std::ptr::copy_nonoverlapping(prev, new_ptr, n.min(old_size)) };
        free(prev);
        new_ptr
    } else {
        prev
    }
}

/// `ceil(2 * size / 3)`, the bucket shrink threshold.
fn two_thirds_ceil(size: usize) -> usize {
    (2 * size).div_ceil(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_allocation_carries_arena_provenance() {
        let p = allocate(8);
        let prov = unsafe { *p.sub(1) };
        assert!((prov as usize) < ARENA_NUM);
        free(p);
    }

    #[test]
    fn large_allocation_carries_0xff_provenance_and_rounded_length() {
        let p = allocate(16_384);
        let prov = unsafe { *p.sub(1) };
        assert_eq!(prov, LARGE_PROVENANCE);
        let len = read_u64(unsafe { p.sub(LARGE_HEADER_BYTES) }) as usize;
        assert!(len % os::SMALL_PAGE_SIZE == 0);
        assert!(len >= 16_384 + LARGE_HEADER_BYTES);
        free(p);
    }

    #[test]
    fn round_trip_integrity_for_a_bucket_allocation() {
        let p = allocate(100);
        unsafe {
            for i in 0..100u8 {
                *p.add(i as usize) = i;
            }
            for i in 0..100u8 {
                assert_eq!(*p.add(i as usize), i);
            }
        }
        free(p);
    }

    #[test]
    fn realloc_bucket_in_place_when_still_in_class() {
        let p = allocate(100); // class 128
        let p2 = reallocate(p, 120);
        assert_eq!(p, p2);
        free(p2);
    }

    #[test]
    fn realloc_bucket_moves_when_growing_past_class() {
        let p = allocate(100); // class 128
        unsafe {
            *p = 0x42;
        }
        let p2 = reallocate(p, 129); // class 192
        assert_ne!(p, p2);
        unsafe {
            assert_eq!(*p2, 0x42);
        }
        free(p2);
    }

    #[test]
    fn realloc_bucket_moves_when_shrinking_past_two_thirds() {
        let p = allocate(1000); // class 1024
        unsafe {
            for i in 0..600u32 {
                *p.add(i as usize) = (i % 251) as u8;
            }
        }
        let p2 = reallocate(p, 600); // 600 < ceil(2*1024/3) = 683 -> new class 768
        assert_ne!(p, p2);
        unsafe {
            for i in 0..600u32 {
                assert_eq!(*p2.add(i as usize), (i % 251) as u8);
            }
        }
        free(p2);
    }

    #[test]
    fn realloc_null_returns_null() {
        assert!(reallocate(std::ptr::null_mut(), 10).is_null());
    }

    #[test]
    fn free_null_is_a_no_op() {
        free(std::ptr::null_mut());
    }
}
