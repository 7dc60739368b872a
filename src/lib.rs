//! A thread-safe, bucketed free-stack allocator backed by anonymous page
//! mappings: 21 size classes from 8 to 8192 bytes, each sharded across 8
//! arenas to spread lock contention, plus a direct-to-OS path for larger
//! requests.
//!
//! Call [`ensure_initialized`] to pre-warm the arena matrix eagerly, or let
//! the first allocation do it lazily. Use [`Bucketalloc`] as a
//! `#[global_allocator]`, or call [`allocate`]/[`free`]/[`reallocate`]
//! directly for a C-ABI-shaped front door.

mod arena;
mod error;
mod front_door;
mod global;
mod lifecycle;
mod options;
mod os;
mod page;
mod sizeclass;
mod stats;
mod thread_local;

pub use front_door::{allocate, free, reallocate};
pub use global::Bucketalloc;
pub use lifecycle::{ensure_initialized, shutdown};
pub use stats::{snapshot, CellSnapshot, Snapshot};
