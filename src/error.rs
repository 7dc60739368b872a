//! Fatal-path diagnostics.
//!
//! The allocator never returns a structured error to its caller: a memory
//! allocator that could fail mid-call would force every allocation site in
//! every caller to handle it. Unrecoverable conditions (OS reservation
//! failure, a corrupt provenance byte) are logged and the process is
//! aborted.
//!
//! `abort` rather than `panic!` is deliberate: a panic unwinding through a
//! `GlobalAlloc` implementation can itself try to allocate (formatting the
//! panic message, running drop glue) and reenter an allocator that is
//! already in an inconsistent state.

/// Log `message` and terminate the process immediately. Never returns.
#[cold]
pub fn fatal(message: &str) -> ! {
    log::error!("bucketalloc: fatal: {message}");
    std::process::abort();
}
