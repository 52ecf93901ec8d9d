// Trampoline - allocator pacing experiments
// Drives allocation pressure against an enforced memory ceiling

#![warn(rust_2018_idioms)]

pub mod ceiling;
pub mod experiment;
pub mod metrics;
pub mod probe;
pub mod server;
pub mod slab;

// Re-exports for convenience
pub use ceiling::{Ceiling, CeilingConfig, CeilingGuard};
pub use experiment::{ExperimentConfig, ExperimentController, ExperimentReport, Plan};
pub use probe::{HeapRuntime, JemallocRuntime, MallocConf, MemorySnapshot, MockRuntime};
pub use slab::{ReleaseOutcome, SharedSlabStore, Slab, SlabStore};

/// Trampoline error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Plan error: {0}")]
        Plan(String),

        #[error("Ceiling error: {0}")]
        Ceiling(String),

        #[error("Probe error: {0}")]
        Probe(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Internal error: {0}")]
        Internal(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
        assert_eq!(VERSION.split('.').count(), 3);
    }
}
