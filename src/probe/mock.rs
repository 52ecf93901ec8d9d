//! Mock heap runtime for testing
//!
//! Reports scripted statistics and records every collection request, so
//! the experiment can be exercised without depending on what the real
//! allocator happens to be doing.

use super::{HeapRuntime, MemorySnapshot};
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct MockState {
    allocated: u64,
    next_collection: u64,
    snapshots: u64,
    collections: u64,
    last_collection: Option<chrono::DateTime<Utc>>,
    fail_snapshots: bool,
}

/// In-memory [`HeapRuntime`] with caller-controlled readings
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    /// Create a mock runtime reporting `allocated` live bytes
    pub fn new(allocated: u64) -> Self {
        let runtime = Self::default();
        runtime.set_allocated(allocated);
        runtime
    }

    pub fn set_allocated(&self, allocated: u64) {
        self.state.lock().allocated = allocated;
    }

    pub fn set_next_collection(&self, threshold: u64) {
        self.state.lock().next_collection = threshold;
    }

    /// Make every subsequent snapshot fail
    pub fn fail_snapshots(&self) {
        self.state.lock().fail_snapshots = true;
    }

    /// Number of snapshots taken so far
    pub fn snapshot_count(&self) -> u64 {
        self.state.lock().snapshots
    }

    /// Number of collection passes requested so far
    pub fn collection_count(&self) -> u64 {
        self.state.lock().collections
    }
}

impl HeapRuntime for MockRuntime {
    fn snapshot(&self) -> Result<MemorySnapshot> {
        let mut state = self.state.lock();
        if state.fail_snapshots {
            return Err(Error::Probe("mock snapshot failure".to_string()));
        }
        state.snapshots += 1;

        Ok(MemorySnapshot {
            allocated: state.allocated,
            mallocs: state.snapshots,
            frees: 0,
            heap_in_use: state.allocated,
            heap_idle: 0,
            heap_objects: state.snapshots,
            heap_committed: state.allocated,
            heap_released: 0,
            last_collection: state.last_collection,
            next_collection: state.next_collection,
            num_collections: state.collections,
            purge_sweeps: 0,
            process_rss: state.allocated,
            taken_at: Utc::now(),
        })
    }

    fn collect(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.collections += 1;
        state.last_collection = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_reports_configured_values() -> Result<()> {
        let runtime = MockRuntime::new(1024);
        runtime.set_next_collection(4096);

        let snapshot = runtime.snapshot()?;
        assert_eq!(snapshot.allocated, 1024);
        assert_eq!(snapshot.next_collection, 4096);
        assert_eq!(runtime.snapshot_count(), 1);
        Ok(())
    }

    #[test]
    fn test_mock_records_collections() -> Result<()> {
        let runtime = MockRuntime::new(0);
        assert!(runtime.snapshot()?.last_collection.is_none());

        runtime.collect()?;
        runtime.collect()?;

        let snapshot = runtime.snapshot()?;
        assert_eq!(snapshot.num_collections, 2);
        assert!(snapshot.last_collection.is_some());
        Ok(())
    }

    #[test]
    fn test_mock_failure_mode() {
        let runtime = MockRuntime::new(0);
        runtime.fail_snapshots();
        assert!(matches!(runtime.snapshot(), Err(Error::Probe(_))));
    }
}
