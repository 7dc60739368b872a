//! Ambient observability: atomic counters describing what the allocator has
//! done, never consulted to make allocation decisions. Pages created per
//! (class, arena) cell, bytes advised-unneeded per cell, and a process-wide
//! large-allocation count, each updated with `Ordering::Relaxed`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::ARENA_NUM;
use crate::sizeclass::BUCKET_NUM;

/// Per-cell counters for one (size-class, arena) pair.
#[derive(Default)]
pub struct CellStats {
    pub pages_created: AtomicU64,
    pub bytes_advised_unneeded: AtomicU64,
}

/// Snapshot of one cell's counters, returned by [`snapshot`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CellSnapshot {
    pub class: usize,
    pub arena: usize,
    pub pages_created: u64,
    pub bytes_advised_unneeded: u64,
}

/// Process-wide counters not tied to any one cell.
struct GlobalStats {
    large_allocations: AtomicU64,
    large_bytes_reserved: AtomicU64,
}

static GLOBAL: GlobalStats = GlobalStats {
    large_allocations: AtomicU64::new(0),
    large_bytes_reserved: AtomicU64::new(0),
};

pub(crate) fn record_page_created(stats: &CellStats) {
    stats.pages_created.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_advised_unneeded(stats: &CellStats, bytes: usize) {
    stats
        .bytes_advised_unneeded
        .fetch_add(bytes as u64, Ordering::Relaxed);
}

pub(crate) fn record_large_allocation(bytes: usize) {
    GLOBAL.large_allocations.fetch_add(1, Ordering::Relaxed);
    GLOBAL
        .large_bytes_reserved
        .fetch_add(bytes as u64, Ordering::Relaxed);
}

/// A read-only snapshot of every counter in the crate, taken for diagnostics
/// or tests. Not linearized against concurrent mutators: each counter is
/// read independently with `Relaxed` ordering.
pub struct Snapshot {
    pub cells: Vec<CellSnapshot>,
    pub large_allocations: u64,
    pub large_bytes_reserved: u64,
}

/// Take a snapshot of all counters.
pub fn snapshot() -> Snapshot {
    let mut cells = Vec::with_capacity(BUCKET_NUM * ARENA_NUM);
    crate::arena::for_each_cell_stats(|class, arena, stats| {
        cells.push(CellSnapshot {
            class,
            arena,
            pages_created: stats.pages_created.load(Ordering::Relaxed),
            bytes_advised_unneeded: stats.bytes_advised_unneeded.load(Ordering::Relaxed),
        });
    });
    Snapshot {
        cells,
        large_allocations: GLOBAL.large_allocations.load(Ordering::Relaxed),
        large_bytes_reserved: GLOBAL.large_bytes_reserved.load(Ordering::Relaxed),
    }
}

/// Log a one-line summary per cell that has ever created a page. Called
/// from [`crate::lifecycle::shutdown`] when `BUCKETALLOC_SHOW_STATS` is set.
pub(crate) fn log_summary() {
    let snap = snapshot();
    for cell in snap.cells.iter().filter(|c| c.pages_created > 0) {
        log::info!(
            "bucketalloc: class={} arena={} pages_created={} bytes_advised_unneeded={}",
            cell.class,
            cell.arena,
            cell.pages_created,
            cell.bytes_advised_unneeded
        );
    }
    log::info!(
        "bucketalloc: large_allocations={} large_bytes_reserved={}",
        snap.large_allocations,
        snap.large_bytes_reserved
    );
}
