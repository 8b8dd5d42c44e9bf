//! Synthetic id allocation (spec §5).
//!
//! The original allocator (`trunk/src/smcore.c`'s negative-id counters) is a
//! trio of process-wide globals, one per object type, each handed out
//! strictly decreasing so synthetic ids never collide with ids read from the
//! input (which are always positive, or already-negative upstream synthetic
//! ids from a previous smrender run). `IdAllocator` keeps that shape as three
//! `Mutex<i64>` counters instead of `static mut` globals.

use std::sync::Mutex;

use crate::model::ObjType;

/// Synthetic ids start here and count down, keeping clear of any real id
/// space smrender is likely to see (spec §3 invariant iii).
const SYNTHETIC_START: i64 = -100_000_000_000;

pub struct IdAllocator {
    next: [Mutex<i64>; ObjType::SLOT_COUNT],
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator {
            next: [
                Mutex::new(SYNTHETIC_START),
                Mutex::new(SYNTHETIC_START),
                Mutex::new(SYNTHETIC_START),
            ],
        }
    }

    /// Returns the next synthetic id for `otype`, decrementing the counter.
    pub fn alloc(&self, otype: ObjType) -> i64 {
        let mut counter = self.next[otype.slot()].lock().unwrap();
        let id = *counter;
        *counter -= 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
