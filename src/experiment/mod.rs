//! Scripted experiment
//!
//! A linear sequence that provokes the pacing pathology:
//!
//! ```text
//! Initial ─→ Spike(fill) ─→ Release(fill) ─→ [Collect] ─→ Reallocate(reserved)
//! ```
//!
//! The spike fills everything under the ceiling except a 10% reserve.
//! After it is released, reallocating the reserve only survives if the
//! allocator reuses the memory it just got back. Without the optional
//! collection it may grow instead, and the enforcer kills the process.
//! There is no retry and no recovery.

pub mod plan;

use crate::ceiling::Ceiling;
use crate::error::Result;
use crate::probe::{HeapRuntime, MemorySnapshot};
use crate::slab::SlabStore;
use serde::Serialize;
use tracing::info;

pub use plan::Plan;

/// Scripted mode settings
#[derive(Debug, Clone, Copy)]
pub struct ExperimentConfig {
    pub ceiling: Ceiling,
    /// Request a collection between release and reallocation
    pub force_collect: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            ceiling: Ceiling::DEFAULT,
            force_collect: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    Initial,
    Spike,
    Release,
    Collect,
    Reallocate,
}

/// Snapshot taken right after a step completed
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: Step,
    /// Bytes held by the slab store after the step
    pub retained: usize,
    pub snapshot: MemorySnapshot,
}

/// Outcome of a run that was not killed
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub plan: Plan,
    pub steps: Vec<StepRecord>,
}

impl ExperimentReport {
    pub fn step(&self, step: Step) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step == step)
    }
}

/// Drives a [`SlabStore`] through the scripted sequence
pub struct ExperimentController<'a, R: HeapRuntime + ?Sized> {
    config: ExperimentConfig,
    runtime: &'a R,
    store: SlabStore,
    steps: Vec<StepRecord>,
}

impl<'a, R: HeapRuntime + ?Sized> ExperimentController<'a, R> {
    pub fn new(config: ExperimentConfig, runtime: &'a R) -> Self {
        Self {
            config,
            runtime,
            store: SlabStore::new(),
            steps: Vec::new(),
        }
    }

    /// Run the whole sequence.
    ///
    /// Returns early only on a probe failure or an unusable plan; a
    /// ceiling breach ends the process from outside.
    pub fn run(mut self) -> Result<ExperimentReport> {
        let ceiling = self.config.ceiling.bytes();

        let initial = self.record(Step::Initial)?;
        let plan = Plan::compute(self.config.ceiling, initial.allocated)?;
        info!("Starting situation");
        info!(
            available = plan.available,
            filling = plan.fill,
            reserving = plan.reserved,
            "Plan computed"
        );

        info!(bytes = plan.fill, "Allocating a slab");
        self.store.add(plan.fill_len()?);
        let spike = self.record(Step::Spike)?;
        info!(
            heap_allocated = spike.allocated,
            next_gc = spike.next_collection,
            exceeding_by = spike.headroom(ceiling),
            "Slab allocated"
        );

        info!("Releasing the slab");
        let outcome = self.store.release(plan.fill_len()?);
        self.record(Step::Release)?;
        info!(
            released = outcome.released,
            "Slab released; there is now sufficient memory available to reallocate"
        );

        if self.config.force_collect {
            info!("Running collection");
            self.runtime.collect()?;
            self.record(Step::Collect)?;
            info!("Collection ran, this program should not crash");
        }

        info!(bytes = plan.reserved, "Now allocating a new slab for the reserved quantity");
        self.store.add(plan.reserved_len()?);
        self.record(Step::Reallocate)?;

        Ok(ExperimentReport {
            plan,
            steps: self.steps,
        })
    }

    fn record(&mut self, step: Step) -> Result<MemorySnapshot> {
        let snapshot = self.runtime.snapshot()?;
        let retained = self.store.total_bytes();
        info!(?step, retained, "{}", snapshot);

        self.steps.push(StepRecord {
            step,
            retained,
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::probe::MockRuntime;

    fn config(bytes: u64, force_collect: bool) -> ExperimentConfig {
        ExperimentConfig {
            ceiling: Ceiling::new(bytes).unwrap(),
            force_collect,
        }
    }

    #[test]
    fn test_run_without_collection() -> Result<()> {
        let runtime = MockRuntime::new(2_000_000);
        let report = ExperimentController::new(config(32_000_000, false), &runtime).run()?;

        assert_eq!(report.plan.fill, 26_800_000);
        let steps: Vec<Step> = report.steps.iter().map(|r| r.step).collect();
        assert_eq!(
            steps,
            vec![Step::Initial, Step::Spike, Step::Release, Step::Reallocate]
        );
        assert_eq!(runtime.collection_count(), 0);
        Ok(())
    }

    #[test]
    fn test_run_with_collection() -> Result<()> {
        let runtime = MockRuntime::new(2_000_000);
        let report = ExperimentController::new(config(32_000_000, true), &runtime).run()?;

        assert_eq!(runtime.collection_count(), 1);
        let collect = report.step(Step::Collect).expect("collect step");
        assert_eq!(collect.snapshot.num_collections, 1);
        assert_eq!(collect.retained, 0);
        assert_eq!(report.steps.last().unwrap().step, Step::Reallocate);
        Ok(())
    }

    #[test]
    fn test_retained_bytes_follow_the_sequence() -> Result<()> {
        let runtime = MockRuntime::new(2_000_000);
        let report = ExperimentController::new(config(32_000_000, false), &runtime).run()?;

        let retained = |step| report.step(step).unwrap().retained;
        assert_eq!(retained(Step::Initial), 0);
        assert_eq!(retained(Step::Spike), 26_800_000);
        assert_eq!(retained(Step::Release), 0);
        assert_eq!(retained(Step::Reallocate), 3_200_000);
        Ok(())
    }

    #[test]
    fn test_snapshot_taken_fresh_for_every_step() -> Result<()> {
        let runtime = MockRuntime::new(1_000);
        let report = ExperimentController::new(config(1_000_000, true), &runtime).run()?;
        assert_eq!(runtime.snapshot_count(), report.steps.len() as u64);
        Ok(())
    }

    #[test]
    fn test_baseline_above_ceiling_aborts_before_allocating() {
        let runtime = MockRuntime::new(5_000_000);
        let result = ExperimentController::new(config(4_000_000, false), &runtime).run();

        assert!(matches!(result, Err(Error::Plan(_))));
        // Only the initial snapshot was taken
        assert_eq!(runtime.snapshot_count(), 1);
    }

    #[test]
    fn test_probe_failure_propagates() {
        let runtime = MockRuntime::new(0);
        runtime.fail_snapshots();
        let result = ExperimentController::new(config(1_000_000, false), &runtime).run();
        assert!(matches!(result, Err(Error::Probe(_))));
    }
}
