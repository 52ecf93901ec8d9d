//! Ordered slab store and its shared, lock-guarded handle

use super::buffer::Slab;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Result of a [`SlabStore::release`] call.
///
/// `released + shortfall` always equals the requested amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReleaseOutcome {
    /// Bytes actually given up
    pub released: usize,
    /// Requested bytes that were not retained to begin with
    pub shortfall: usize,
}

/// Insertion-ordered collection of retained slabs
#[derive(Debug, Default)]
pub struct SlabStore {
    slabs: VecDeque<Slab>,
}

impl SlabStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new sentinel-filled slab of exactly `size` bytes.
    ///
    /// There is deliberately no upper bound: exceeding the external
    /// ceiling is the event under observation.
    pub fn add(&mut self, size: usize) {
        self.slabs.push_back(Slab::filled(size));
        debug!(size, slabs = self.slabs.len(), "Slab added");
    }

    /// Append an existing slab
    pub fn insert(&mut self, slab: Slab) {
        self.slabs.push_back(slab);
    }

    /// Release up to `amount` bytes, oldest slabs first.
    ///
    /// Whole slabs are dropped while they fit in the remaining amount. The
    /// first slab larger than the remainder is replaced by a fresh copy of
    /// its tail. Over-requesting empties the store and reports the rest as
    /// shortfall.
    pub fn release(&mut self, amount: usize) -> ReleaseOutcome {
        let mut remaining = amount;

        while remaining > 0 {
            let Some(head) = self.slabs.front_mut() else {
                break;
            };

            if head.len() <= remaining {
                remaining -= head.len();
                self.slabs.pop_front();
            } else {
                *head = head.tail(remaining);
                remaining = 0;
            }
        }

        let outcome = ReleaseOutcome {
            released: amount - remaining,
            shortfall: remaining,
        };
        debug!(
            released = outcome.released,
            shortfall = outcome.shortfall,
            "Slabs released"
        );
        outcome
    }

    /// Drop every slab. Does not request a collection.
    pub fn reset(&mut self) {
        self.slabs.clear();
    }

    /// Sum of all slab lengths
    pub fn total_bytes(&self) -> usize {
        self.slabs.iter().map(Slab::len).sum()
    }

    /// Number of slabs currently held
    pub fn len(&self) -> usize {
        self.slabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slabs.is_empty()
    }

    /// Slabs in release order
    pub fn slabs(&self) -> impl Iterator<Item = &Slab> {
        self.slabs.iter()
    }
}

/// Cloneable handle serializing every store operation behind one mutex.
///
/// The release walk is not safe to interleave with itself, so concurrent
/// requests must go through this type.
#[derive(Debug, Clone, Default)]
pub struct SharedSlabStore {
    inner: Arc<Mutex<SlabStore>>,
}

impl SharedSlabStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, size: usize) {
        self.inner.lock().add(size);
    }

    pub fn release(&self, amount: usize) -> ReleaseOutcome {
        self.inner.lock().release(amount)
    }

    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes()
    }

    /// Run `f` with exclusive access to the store
    pub fn with<T>(&self, f: impl FnOnce(&mut SlabStore) -> T) -> T {
        f(&mut *self.inner.lock())
    }
}
