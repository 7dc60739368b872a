//! Ambient, environment-backed configuration: small named flags, read from
//! the environment once and cached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

/// Enables `log::debug!`-level tracing of page creation/destruction.
pub const BUCKETALLOC_VERBOSE: &str = "BUCKETALLOC_VERBOSE";
/// If set, [`crate::lifecycle::shutdown`] logs a per-cell summary.
pub const BUCKETALLOC_SHOW_STATS: &str = "BUCKETALLOC_SHOW_STATS";

fn env_flag(name: &str) -> bool {
    std::env::var_os(name).is_some_and(|v| v != "0")
}

/// Is `BUCKETALLOC_VERBOSE` set?
pub fn verbose() -> bool {
    static FLAG: OnceLock<AtomicBool> = OnceLock::new();
    FLAG.get_or_init(|| AtomicBool::new(env_flag(BUCKETALLOC_VERBOSE)))
        .load(Ordering::Relaxed)
}

/// Is `BUCKETALLOC_SHOW_STATS` set?
pub fn show_stats() -> bool {
    static FLAG: OnceLock<AtomicBool> = OnceLock::new();
    FLAG.get_or_init(|| AtomicBool::new(env_flag(BUCKETALLOC_SHOW_STATS)))
        .load(Ordering::Relaxed)
}
