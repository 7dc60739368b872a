//! Process-level startup and teardown.
//!
//! Startup is a lazily-but-exactly-once pre-warm of the 21×8 matrix.
//! Teardown is an explicit opt-in: embedding this crate as a
//! `#[global_allocator]` must never call [`shutdown`], since freeing pages
//! out from under a still-running allocator is unsound. It exists for
//! embedders that fully control process exit, such as test harnesses or
//! arena-per-request servers.

use std::sync::Once;

static INIT: Once = Once::new();

/// Run startup exactly once per process: pre-warm every (class, arena) cell
/// with its first page. Idempotent; cheap to call on every entry point.
pub fn ensure_initialized() {
    INIT.call_once(|| {
        crate::arena::ensure_initialized();
        if crate::options::verbose() {
            log::debug!("bucketalloc: process init");
        }
    });
}

/// Release every mapping this process has made and, if
/// `BUCKETALLOC_SHOW_STATS` is set, log a final per-cell summary.
///
/// Only safe to call once nothing else will allocate or free through this
/// crate again.
pub fn shutdown() {
    if crate::options::show_stats() {
        crate::stats::log_summary();
    }
    crate::arena::teardown();
    if crate::options::verbose() {
        log::debug!("bucketalloc: process done");
    }
}
