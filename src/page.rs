//! The page header and its bitmap free-list engine.
//!
//! A page is one large anonymous mapping, carved into a header followed by
//! a flat array of equal-sized slots for a single size class. The header
//! itself lives in the mapped memory (there is no separate heap-allocated
//! bookkeeping struct) so creating a page is nothing more than an `mmap`
//! plus writing one byte.

use crate::error::fatal;
use crate::os;
use crate::sizeclass::{self, slot_stride, CLASS_SIZE, SLOT_METADATA_BYTES};
use crate::stats::{self, CellStats};

/// How many of the mapping's leading host pages are eagerly backed so the
/// header is always resident. This is a safety margin around the
/// header's actual size, not its exact size: rounding the
/// eager-backing boundary up to whole host pages means a handful of the
/// first slots may also be pre-faulted, which is harmless.
pub const HEADER_PAGES: usize = 5;
const HEADER_RESERVE: usize = HEADER_PAGES * os::SMALL_PAGE_SIZE;

/// Worst-case slot count across every size class, used to size the bitmap
/// once for every page regardless of its class.
const MAX_SLOT_COUNT: usize = 159_808;
/// `ceil(MAX_SLOT_COUNT / 64)`.
pub const BITMAP_WORDS: usize = 2_497;

const _: () = assert!(BITMAP_WORDS * 64 >= MAX_SLOT_COUNT);

/// The header that opens every page's mapping. Accessed exclusively through
/// raw pointers into mmap'd memory — never boxed, never moved — because its
/// address *is* the page's identity.
#[repr(C)]
pub struct PageHeader {
    /// Encoded size class. Immutable after creation.
    pub class_tag: u8,
    /// Next page in this shard's list, or null.
    pub next: *mut PageHeader,
    /// Bitmap index of the most recently allocated slot.
    pub cursor: u32,
    /// Dense slot-occupancy bitmap, MSB-first within each word.
    pub bitmap: [u64; BITMAP_WORDS],
}

/// Bytes occupied by the header proper; slot 0 begins here. Smaller than
/// [`HEADER_RESERVE`] by design (see that constant's doc comment).
pub const HEADER_BYTES: usize = std::mem::size_of::<PageHeader>();

const _: () = assert!(HEADER_BYTES <= HEADER_RESERVE);

/// Slots that fit in a page of class `c`, accounting for the header.
pub const fn slot_count(c: usize) -> usize {
    (sizeclass::CHUNK_MULT[c] * sizeclass::ALLOC_CHUNK - HEADER_BYTES) / slot_stride(c)
}

/// Create a fresh page for class `c`: reserve its mapping, advise the slot
/// region unneeded so only the header is eagerly backed, and stamp the
/// class tag. The page is not linked into any shard list; the caller does
/// that.
pub fn create(c: usize, cell_stats: &CellStats) -> *mut PageHeader {
    let len = sizeclass::mapping_len(c);
    let start = os::reserve(len);
    let advise_len = len - HEADER_RESERVE;
    os::advise_unneeded(unsafe { start.add(HEADER_RESERVE) }, advise_len);
    let header = start as *mut PageHeader;
    unsafe {
        (*header).class_tag = sizeclass::encode(CLASS_SIZE[c]);
    }
    stats::record_page_created(cell_stats);
    if crate::options::verbose() {
        log::debug!("bucketalloc: created page class={c} at {header:p}, len={len}");
    }
    header
}

/// Start address of a page's mapping, i.e. the header pointer reinterpreted
/// as a byte pointer. The two are always the same address; this exists
/// purely to make call sites read as "page start" rather than "header
/// pointer" where that's the clearer framing.
#[inline]
pub fn page_start(page: *mut PageHeader) -> *mut u8 {
    page as *mut u8
}

/// Byte offset from the page start to the start of slot `k`'s
/// bucket-metadata header.
#[inline]
pub fn slot_header_offset(c: usize, k: u32) -> u32 {
    (HEADER_BYTES + k as usize * slot_stride(c)) as u32
}

/// The payload address of slot `k` in a page of class `c` starting at
/// `start`.
///
/// # Safety
/// `start` must be the start of a page created for class `c`, and `k` must
/// be `< slot_count(c)`.
#[inline]
pub unsafe fn slot_payload_ptr(start: *mut u8, c: usize, k: u32) -> *mut u8 {
    start.add(HEADER_BYTES + k as usize * slot_stride(c) + SLOT_METADATA_BYTES)
}

/// Recover a slot index from a payload pointer known to belong to a page of
/// class `c` starting at `start`. Integer division: the leading 5 metadata
/// bytes of slot 0 always round away since `5 < slot_stride`.
///
/// # Safety
/// `payload` must genuinely be a payload pointer handed out for a slot of
/// this page and class.
#[inline]
pub unsafe fn slot_index_from_payload(start: *mut u8, payload: *mut u8, c: usize) -> u32 {
    let distance = (payload as usize) - (start as usize) - HEADER_BYTES;
    (distance / slot_stride(c)) as u32
}

#[inline]
fn word_and_bit(k: u32) -> (usize, u64) {
    let widx = (k / 64) as usize;
    let bit = 1u64 << (63 - (k % 64));
    (widx, bit)
}

/// Walk the rotating cursor to find and claim a free slot.
/// Returns `None` if every slot in `[0, slot_count)` is occupied.
///
/// # Safety
/// `page` must be a live page of class `c`.
pub unsafe fn try_alloc_slot(page: *mut PageHeader, c: usize) -> Option<u32> {
    let count = slot_count(c) as u32;
    debug_assert!(count > 0);
    let start = ((*page).cursor + 1) % count;
    let mut off = start;
    let mut remaining = count;
    while remaining > 0 {
        if off % 64 == 0 {
            let widx = (off / 64) as usize;
            if (*page).bitmap[widx] == u64::MAX {
                let step = remaining.min(64);
                off = (off + step) % count;
                remaining -= step;
                continue;
            }
        }
        let (widx, bit) = word_and_bit(off);
        if (*page).bitmap[widx] & bit == 0 {
            (*page).bitmap[widx] |= bit;
            (*page).cursor = off;
            return Some(off);
        }
        off = (off + 1) % count;
        remaining -= 1;
    }
    None
}

/// Clear slot `k`'s occupied bit. Never touches the cursor, never
/// coalesces, never removes the page from its list.
///
/// # Safety
/// `page` must be a live page and `k < slot_count(c)` for its class `c`.
pub unsafe fn free_slot(page: *mut PageHeader, k: u32) {
    let (widx, bit) = word_and_bit(k);
    (*page).bitmap[widx] &= !bit;
}

/// Is slot `k` currently marked occupied? Exposed for tests.
///
/// # Safety
/// `page` must be a live page.
pub unsafe fn slot_is_occupied(page: *const PageHeader, k: u32) -> bool {
    let (widx, bit) = word_and_bit(k);
    (*page).bitmap[widx] & bit != 0
}

/// Are every one of a class-`c` page's slots free? Used to decide whether to
/// advise the payload region unneeded after a free.
///
/// # Safety
/// `page` must be a live page of class `c`.
pub unsafe fn is_fully_free(page: *const PageHeader, c: usize) -> bool {
    let count = slot_count(c);
    let full_words = count / 64;
    let rem_bits = count % 64;
    for w in 0..full_words {
        if (*page).bitmap[w] != 0 {
            return false;
        }
    }
    if rem_bits > 0 {
        let mask = !0u64 << (64 - rem_bits);
        if (*page).bitmap[full_words] & mask != 0 {
            return false;
        }
    }
    true
}

/// Advise the payload region of a fully-free page unneeded, reclaiming its
/// physical backing while the mapping and its place in the shard list stay
/// put. Mirrors `create`'s eager-backing boundary: `madvise` requires a
/// page-aligned address, and `HEADER_BYTES` (the struct's exact size) isn't
/// one, so the advised range starts at `HEADER_RESERVE` rather than right
/// after the header.
///
/// # Safety
/// `page` must be a live page of class `c` with every slot free.
pub unsafe fn advise_payload_unneeded(page: *mut PageHeader, c: usize, cell_stats: &CellStats) {
    let len = sizeclass::mapping_len(c) - HEADER_RESERVE;
    let start = page_start(page).add(HEADER_RESERVE);
    os::advise_unneeded(start, len);
    stats::record_advised_unneeded(cell_stats, len);
}

/// Decode a page's class tag back to its class index, failing fatally if it
/// doesn't match any table entry exactly.
///
/// # Safety
/// `page` must point to a live page header.
pub unsafe fn class_index_of(page: *const PageHeader) -> usize {
    let size = sizeclass::decode((*page).class_tag);
    sizeclass::class_index_for_exact_size(size)
        .unwrap_or_else(|| fatal(&format!("corrupt page header: class tag decodes to {size}")))
}
