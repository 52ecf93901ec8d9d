//! Memory probe
//!
//! The experiment needs only two things from the runtime hosting it: a
//! point-in-time read of heap statistics and a way to request an
//! immediate collection pass. [`HeapRuntime`] is that seam.
//!
//! - [`JemallocRuntime`] reads jemalloc's statistics and purges its dirty
//!   pages on request.
//! - [`MockRuntime`] returns scripted values for tests.

pub mod jemalloc;
pub mod mock;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use jemalloc::{JemallocRuntime, MallocConf};
pub use mock::MockRuntime;

/// Runtime capabilities the experiment depends on
pub trait HeapRuntime: Send + Sync {
    /// Read current heap statistics. Must never return cached values.
    fn snapshot(&self) -> Result<MemorySnapshot>;

    /// Request an immediate collection pass and wait for it to finish
    fn collect(&self) -> Result<()>;
}

/// Immutable point-in-time heap statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Bytes in live allocations
    pub allocated: u64,
    /// Cumulative allocation count
    pub mallocs: u64,
    /// Cumulative free count
    pub frees: u64,
    /// Bytes in pages backing live allocations
    pub heap_in_use: u64,
    /// Freed bytes the allocator still keeps committed
    pub heap_idle: u64,
    /// Live allocation count
    pub heap_objects: u64,
    /// Bytes physically resident for the heap
    pub heap_committed: u64,
    /// Bytes handed back to the operating system
    pub heap_released: u64,
    /// Time of the most recent collection pass, if any
    pub last_collection: Option<DateTime<Utc>>,
    /// Footprint the allocator holds until its next reclaim.
    ///
    /// jemalloc has no pacer: this is the current footprint (in-use plus
    /// dirty bytes), not a scheduled threshold. It only exceeds the
    /// allocated figure by page and size-class rounding plus freed pages
    /// not yet purged.
    pub next_collection: u64,
    /// Number of collection passes requested so far
    pub num_collections: u64,
    /// Purge sweeps the allocator ran on its own
    pub purge_sweeps: u64,
    /// Resident set size of the whole process
    pub process_rss: u64,
    pub taken_at: DateTime<Utc>,
}

impl MemorySnapshot {
    /// How far the next collection threshold sits below `ceiling`.
    ///
    /// Negative when the collector would let the heap grow past the
    /// ceiling before reclaiming anything.
    pub fn headroom(&self, ceiling: u64) -> i64 {
        ceiling as i64 - self.next_collection as i64
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let last = self
            .last_collection
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());

        writeln!(f, "memstats:")?;
        writeln!(f, "\tallocated: {}", self.allocated)?;
        writeln!(f, "\tmalloc objects: {}", self.mallocs)?;
        writeln!(f, "\tfreed objects: {}", self.frees)?;
        writeln!(f, "\theap in-use: {}", self.heap_in_use)?;
        writeln!(f, "\theap idle: {}", self.heap_idle)?;
        writeln!(f, "\theap objects: {}", self.heap_objects)?;
        writeln!(f, "\theap committed: {}", self.heap_committed)?;
        writeln!(f, "\theap released: {}", self.heap_released)?;
        writeln!(f, "\tlast gc: {}", last)?;
        writeln!(f, "\tnext gc: {}", self.next_collection)?;
        writeln!(f, "\tnum gc: {}", self.num_collections)?;
        writeln!(f, "\tpurge sweeps: {}", self.purge_sweeps)?;
        write!(f, "\tprocess rss: {}", self.process_rss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemorySnapshot {
        MemorySnapshot {
            allocated: 2_000_000,
            mallocs: 120,
            frees: 20,
            heap_in_use: 2_097_152,
            heap_idle: 4096,
            heap_objects: 100,
            heap_committed: 3_145_728,
            heap_released: 0,
            last_collection: None,
            next_collection: 60_000_000,
            num_collections: 0,
            purge_sweeps: 3,
            process_rss: 5_000_000,
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn test_headroom_negative_when_threshold_exceeds_ceiling() {
        let snapshot = sample();
        assert_eq!(snapshot.headroom(32_000_000), -28_000_000);
        assert_eq!(snapshot.headroom(64_000_000), 4_000_000);
    }

    #[test]
    fn test_display_lists_every_reading() {
        let rendered = sample().to_string();
        assert!(rendered.starts_with("memstats:"));
        for label in [
            "allocated: 2000000",
            "malloc objects: 120",
            "freed objects: 20",
            "heap in-use:",
            "heap idle: 4096",
            "heap objects: 100",
            "heap released: 0",
            "last gc: never",
            "next gc: 60000000",
            "num gc: 0",
        ] {
            assert!(rendered.contains(label), "missing {label}");
        }
    }

    #[test]
    fn test_serializes_to_json() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["allocated"], 2_000_000);
        assert_eq!(value["next_collection"], 60_000_000);
        assert!(value["last_collection"].is_null());
    }
}
