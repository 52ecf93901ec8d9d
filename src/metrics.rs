//! Prometheus metrics for the interactive surface
//!
//! Gauges mirror the most recent snapshot so an external scraper can
//! chart heap growth next to the operations that caused it.

use crate::probe::MemorySnapshot;
use prometheus::{
    core::{AtomicU64, GenericCounter, GenericGauge},
    Encoder, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref RETAINED_BYTES: GenericGauge<AtomicU64> = GenericGauge::new(
        "trampoline_retained_bytes",
        "Bytes held by the slab store"
    ).unwrap();

    pub static ref HEAP_ALLOCATED: GenericGauge<AtomicU64> = GenericGauge::new(
        "trampoline_heap_allocated_bytes",
        "Bytes in live allocations"
    ).unwrap();

    pub static ref HEAP_COMMITTED: GenericGauge<AtomicU64> = GenericGauge::new(
        "trampoline_heap_committed_bytes",
        "Heap bytes physically resident"
    ).unwrap();

    pub static ref HEAP_IDLE: GenericGauge<AtomicU64> = GenericGauge::new(
        "trampoline_heap_idle_bytes",
        "Freed bytes the allocator still keeps committed"
    ).unwrap();

    pub static ref PROCESS_RSS: GenericGauge<AtomicU64> = GenericGauge::new(
        "trampoline_process_rss_bytes",
        "Resident set size of the process"
    ).unwrap();

    pub static ref COLLECTIONS_TOTAL: GenericCounter<AtomicU64> = GenericCounter::new(
        "trampoline_collections_total",
        "Forced collection passes"
    ).unwrap();

    pub static ref OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("trampoline_operations_total", "Interactive operations"),
        &["op", "status"]
    ).unwrap();
}

/// Register all metrics with [`METRICS_REGISTRY`]. Safe to call twice.
pub fn init_metrics() {
    METRICS_REGISTRY.register(Box::new(RETAINED_BYTES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(HEAP_ALLOCATED.clone())).ok();
    METRICS_REGISTRY.register(Box::new(HEAP_COMMITTED.clone())).ok();
    METRICS_REGISTRY.register(Box::new(HEAP_IDLE.clone())).ok();
    METRICS_REGISTRY.register(Box::new(PROCESS_RSS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(COLLECTIONS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone())).ok();

    info!("Metrics initialized");
}

/// Copy snapshot readings and the store size into the gauges
pub fn record_snapshot(snapshot: &MemorySnapshot, retained: usize) {
    RETAINED_BYTES.set(retained as u64);
    HEAP_ALLOCATED.set(snapshot.allocated);
    HEAP_COMMITTED.set(snapshot.heap_committed);
    HEAP_IDLE.set(snapshot.heap_idle);
    PROCESS_RSS.set(snapshot.process_rss);
}

pub fn record_operation(op: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    OPERATIONS_TOTAL.with_label_values(&[op, status]).inc();
}

pub fn record_collection() {
    COLLECTIONS_TOTAL.inc();
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}
