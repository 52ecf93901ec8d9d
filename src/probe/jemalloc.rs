//! jemalloc-backed heap runtime
//!
//! Statistics come from jemalloc's mallctl namespace. jemalloc caches its
//! counters, so every snapshot advances the epoch before reading.
//!
//! A "collection" here is a purge of dirty pages: memory the program has
//! freed but the allocator still holds committed. That is exactly the
//! memory an enforced ceiling counts against the process while the
//! allocator waits for its decay timer.
//!
//! Stock jemalloc hands extents above `oversize_threshold` (8 MiB) to a
//! dedicated arena that purges on free, and decays the rest within
//! seconds. Binaries install [`MallocConf::PACED`] so freed memory stays
//! dirty until [`HeapRuntime::collect`] purges it:
//!
//! ```ignore
//! #[export_name = "_rjem_malloc_conf"]
//! static MALLOC_CONF: MallocConf = MallocConf::PACED;
//! ```

use super::{HeapRuntime, MemorySnapshot};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::ffi::{c_char, CStr};
use std::ptr;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tikv_jemalloc_ctl::{epoch, raw, stats};
use tracing::{debug, info, instrument};

/// `MALLCTL_ARENAS_ALL`: addresses every arena at once
const ARENAS_ALL: &str = "4096";

const SMALL_NMALLOC: &[u8] = b"stats.arenas.4096.small.nmalloc\0";
const SMALL_NDALLOC: &[u8] = b"stats.arenas.4096.small.ndalloc\0";
const LARGE_NMALLOC: &[u8] = b"stats.arenas.4096.large.nmalloc\0";
const LARGE_NDALLOC: &[u8] = b"stats.arenas.4096.large.ndalloc\0";
const PDIRTY: &[u8] = b"stats.arenas.4096.pdirty\0";
const DIRTY_NPURGE: &[u8] = b"stats.arenas.4096.dirty_npurge\0";
const PAGE_SIZE: &[u8] = b"arenas.page\0";
const TCACHE_FLUSH: &[u8] = b"thread.tcache.flush\0";
const ARENA_PURGE: &[u8] = b"arena.4096.purge\0";
const OPT_DIRTY_DECAY_MS: &[u8] = b"opt.dirty_decay_ms\0";

/// Options keeping every freed extent dirty until an explicit purge
const PACED_CONF: &[u8] =
    b"oversize_threshold:0,background_thread:false,dirty_decay_ms:-1,muzzy_decay_ms:-1\0";

/// Value of jemalloc's `malloc_conf` symbol: a pointer to a NUL-terminated
/// option string, read once when the allocator initializes.
#[repr(transparent)]
pub struct MallocConf(*const c_char);

// SAFETY: the pointer targets an immutable `'static` byte string.
unsafe impl Sync for MallocConf {}

impl MallocConf {
    pub const PACED: MallocConf = MallocConf(PACED_CONF.as_ptr() as *const c_char);

    /// The option string, without its terminator
    pub fn options(&self) -> &'static str {
        // SAFETY: only ever built from NUL-terminated `'static` literals.
        unsafe { CStr::from_ptr(self.0) }.to_str().unwrap_or_default()
    }
}

/// `opt.dirty_decay_ms` in effect; -1 when decay is disabled
pub fn dirty_decay_ms() -> Result<isize> {
    read_raw::<isize>(OPT_DIRTY_DECAY_MS)
}

#[derive(Debug, Default)]
struct CollectionRecord {
    last: Option<DateTime<Utc>>,
    count: u64,
}

/// [`HeapRuntime`] over the jemalloc global allocator.
///
/// Only meaningful when the binary installs
/// `tikv_jemallocator::Jemalloc` as its `#[global_allocator]`.
pub struct JemallocRuntime {
    pid: Pid,
    system: Mutex<System>,
    collections: Mutex<CollectionRecord>,
}

impl JemallocRuntime {
    pub fn new() -> Self {
        debug!(
            arenas = ARENAS_ALL,
            dirty_decay_ms = dirty_decay_ms().ok(),
            "Using merged jemalloc arena statistics"
        );
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
            collections: Mutex::new(CollectionRecord::default()),
        }
    }

    fn process_rss(&self) -> u64 {
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(self.pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl Default for JemallocRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JemallocRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JemallocRuntime")
            .field("pid", &self.pid)
            .finish()
    }
}

impl HeapRuntime for JemallocRuntime {
    fn snapshot(&self) -> Result<MemorySnapshot> {
        epoch::advance().map_err(|e| Error::Probe(format!("epoch advance failed: {}", e)))?;

        let allocated = read_stat(stats::allocated::read(), "stats.allocated")?;
        let active = read_stat(stats::active::read(), "stats.active")?;
        let resident = read_stat(stats::resident::read(), "stats.resident")?;
        let retained = read_stat(stats::retained::read(), "stats.retained")?;

        let mallocs = read_raw::<u64>(SMALL_NMALLOC)? + read_raw::<u64>(LARGE_NMALLOC)?;
        let frees = read_raw::<u64>(SMALL_NDALLOC)? + read_raw::<u64>(LARGE_NDALLOC)?;
        let dirty = read_raw::<usize>(PDIRTY)? as u64 * read_raw::<usize>(PAGE_SIZE)? as u64;
        let purge_sweeps = read_raw::<u64>(DIRTY_NPURGE)?;

        let (last_collection, num_collections) = {
            let record = self.collections.lock();
            (record.last, record.count)
        };

        Ok(MemorySnapshot {
            allocated,
            mallocs,
            frees,
            heap_in_use: active,
            heap_idle: dirty,
            heap_objects: mallocs.saturating_sub(frees),
            heap_committed: resident,
            heap_released: retained,
            last_collection,
            next_collection: active + dirty,
            num_collections,
            purge_sweeps,
            process_rss: self.process_rss(),
            taken_at: Utc::now(),
        })
    }

    #[instrument(skip(self))]
    fn collect(&self) -> Result<()> {
        let started = std::time::Instant::now();

        void_ctl(TCACHE_FLUSH)?;
        void_ctl(ARENA_PURGE)?;

        let mut record = self.collections.lock();
        record.last = Some(Utc::now());
        record.count += 1;

        info!(
            pass = record.count,
            duration_us = started.elapsed().as_micros() as u64,
            "Dirty pages purged"
        );
        Ok(())
    }
}

fn read_stat(value: tikv_jemalloc_ctl::Result<usize>, name: &str) -> Result<u64> {
    value
        .map(|v| v as u64)
        .map_err(|e| Error::Probe(format!("failed to read {}: {}", name, e)))
}

fn read_raw<T: Copy>(name: &'static [u8]) -> Result<T> {
    // SAFETY: every name passed here is a NUL-terminated mallctl key whose
    // jemalloc type matches `T` (uint64_t -> u64, size_t -> usize).
    unsafe { raw::read::<T>(name) }.map_err(|e| {
        Error::Probe(format!(
            "failed to read {}: {}",
            String::from_utf8_lossy(&name[..name.len() - 1]),
            e
        ))
    })
}

/// Invoke a mallctl command that takes neither input nor output
fn void_ctl(name: &'static [u8]) -> Result<()> {
    // SAFETY: `name` is NUL-terminated; void commands require null
    // old/new pointers and zero lengths.
    let rc = unsafe {
        tikv_jemalloc_sys::mallctl(
            name.as_ptr() as *const c_char,
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
            0,
        )
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Probe(format!(
            "{} failed with code {}",
            String::from_utf8_lossy(&name[..name.len() - 1]),
            rc
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctl_names_are_nul_terminated() {
        for name in [
            SMALL_NMALLOC,
            SMALL_NDALLOC,
            LARGE_NMALLOC,
            LARGE_NDALLOC,
            PDIRTY,
            DIRTY_NPURGE,
            PAGE_SIZE,
            TCACHE_FLUSH,
            ARENA_PURGE,
            OPT_DIRTY_DECAY_MS,
            PACED_CONF,
        ] {
            assert_eq!(name.last(), Some(&0));
            assert_eq!(name.iter().filter(|&&b| b == 0).count(), 1);
        }
    }

    #[test]
    fn test_paced_conf_disables_oversize_arena_and_decay() {
        let options = MallocConf::PACED.options();
        assert!(options.contains("oversize_threshold:0"));
        assert!(options.contains("dirty_decay_ms:-1"));
        assert!(options.contains("muzzy_decay_ms:-1"));
        assert!(!options.contains('\0'));
    }

    #[test]
    fn test_merged_arena_keys_use_arenas_all() {
        for name in [SMALL_NMALLOC, PDIRTY, ARENA_PURGE] {
            let key = String::from_utf8_lossy(name);
            assert!(key.contains(ARENAS_ALL));
        }
    }
}
