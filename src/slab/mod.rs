//! Slab store
//!
//! Retains opaque byte buffers on the heap so the experiment can hold a
//! precise amount of live memory, release part of it in insertion order,
//! and drop everything at once.
//!
//! ```text
//! SlabStore
//!   ├─→ Slab(100 B)   released first
//!   ├─→ Slab(50 B)
//!   └─→ Slab(3.2 MB)  released last
//! ```
//!
//! A partial release never shrinks a buffer in place: the surviving tail
//! is copied into a fresh allocation so the allocator sees a real
//! reallocation.

pub mod buffer;
pub mod store;

pub use buffer::{Slab, SENTINEL};
pub use store::{ReleaseOutcome, SharedSlabStore, SlabStore};
