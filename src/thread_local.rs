//! The per-thread favorite-arena table: one byte per size class,
//! biasing that thread toward a specific shard, with fall-forward on
//! contention. Thread-local, so no synchronization is needed to read or
//! write it.

use std::cell::Cell;

use crate::arena::ARENA_NUM;
use crate::sizeclass::BUCKET_NUM;

thread_local! {
    static FAVORITE: Cell<[u8; BUCKET_NUM]> = const { Cell::new([0; BUCKET_NUM]) };
}

/// This thread's currently preferred arena for size class `c`.
pub fn favorite(c: usize) -> usize {
    FAVORITE.with(|table| table.get()[c] as usize)
}

/// Record that this thread should prefer arena `arena` for size class `c`
/// going forward.
pub fn set_favorite(c: usize, arena: usize) {
    debug_assert!(arena < ARENA_NUM);
    FAVORITE.with(|table| {
        let mut t = table.get();
        t[c] = arena as u8;
        table.set(t);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_arena_zero_and_remembers_updates() {
        assert_eq!(favorite(3), 0);
        set_favorite(3, 5);
        assert_eq!(favorite(3), 5);
        // Unrelated classes are untouched.
        assert_eq!(favorite(4), 0);
    }
}
