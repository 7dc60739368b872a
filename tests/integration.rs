//! End-to-end scenarios exercising the public front door as an external
//! caller would, rather than through any internal module's own unit tests.

use std::collections::HashSet;
use std::thread;

#[test]
fn first_allocation_carries_arena_zero_and_a_stable_recoverable_offset() {
    bucketalloc::ensure_initialized();
    let p = bucketalloc::allocate(8);
    let p2 = bucketalloc::allocate(8);
    unsafe {
        // A brand new process/thread favors arena 0 until contention bumps
        // it forward.
        assert_eq!(*p.sub(1), 0);
        let offset = u32::from_ne_bytes([*p.sub(5), *p.sub(4), *p.sub(3), *p.sub(2)]);
        let offset2 = u32::from_ne_bytes([*p2.sub(5), *p2.sub(4), *p2.sub(3), *p2.sub(2)]);
        // Consecutive slots in the same page are one stride apart; slot 0's
        // offset is whatever the header size is, which this test does not
        // need to know to check that it round-trips stably.
        assert!(offset2 > offset);
    }
    bucketalloc::free(p);
    bucketalloc::free(p2);
}

#[test]
fn many_allocations_in_the_largest_class_all_succeed_and_free_cleanly() {
    // Scaled down from the full 160,000-slot scenario: enough to span
    // several pages per shard without making the test slow.
    const N: usize = 4_000;
    let mut ptrs = Vec::with_capacity(N);
    for _ in 0..N {
        let p = bucketalloc::allocate(8192);
        assert!(!p.is_null());
        ptrs.push(p);
    }
    let mut seen = HashSet::with_capacity(N);
    for &p in &ptrs {
        assert!(seen.insert(p as usize), "two live allocations aliased");
    }
    for p in ptrs.into_iter().rev() {
        bucketalloc::free(p);
    }
}

#[test]
fn large_allocation_reports_0xff_provenance_and_a_rounded_up_length() {
    let p = bucketalloc::allocate(16_384);
    unsafe {
        assert_eq!(*p.sub(1), 0xFF);
        let len = u64::from_ne_bytes(std::array::from_fn(|i| *p.sub(9).add(i)));
        assert!(len % 4096 == 0);
        assert!(len >= 16_384 + 9);
    }
    bucketalloc::free(p);
}

#[test]
fn realloc_within_class_is_in_place_across_class_boundary_moves() {
    let p = bucketalloc::allocate(100); // class 128
    let p2 = bucketalloc::reallocate(p, 120);
    assert_eq!(p, p2, "120 still fits class 128");

    unsafe {
        for i in 0..120u8 {
            *p2.add(i as usize) = i;
        }
    }
    let p3 = bucketalloc::reallocate(p2, 129); // needs class 192
    assert_ne!(p2, p3);
    unsafe {
        for i in 0..120u8 {
            assert_eq!(*p3.add(i as usize), i);
        }
    }
    bucketalloc::free(p3);
}

#[test]
fn realloc_shrinking_past_two_thirds_moves_to_a_smaller_class() {
    let p = bucketalloc::allocate(1000); // class 1024
    unsafe {
        for i in 0..600u32 {
            *p.add(i as usize) = (i % 251) as u8;
        }
    }
    // 600 < ceil(2*1024/3) = 683, so this must move to class 768.
    let p2 = bucketalloc::reallocate(p, 600);
    assert_ne!(p, p2);
    unsafe {
        for i in 0..600u32 {
            assert_eq!(*p2.add(i as usize), (i % 251) as u8);
        }
    }
    bucketalloc::free(p2);
}

#[test]
fn many_threads_allocating_and_freeing_small_blocks_concurrently() {
    // Scaled down from the full million-block-per-thread scenario: the
    // point is to exercise the favorite/fall-forward locking path under
    // real contention, not to run for minutes.
    const THREADS: usize = 8;
    const PER_THREAD: usize = 20_000;

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..PER_THREAD {
                    let p = bucketalloc::allocate(16);
                    assert!(!p.is_null());
                    unsafe { *p = 0xAA };
                    bucketalloc::free(p);
                }
            });
        }
    });
}

#[test]
fn stats_snapshot_reflects_activity_in_the_largest_bucket_cell() {
    let before = bucketalloc::snapshot();
    let before_pages: u64 = before.cells.iter().map(|c| c.pages_created).sum();

    let p = bucketalloc::allocate(8192);
    bucketalloc::free(p);

    let after = bucketalloc::snapshot();
    let after_pages: u64 = after.cells.iter().map(|c| c.pages_created).sum();
    assert!(after_pages >= before_pages);
}
