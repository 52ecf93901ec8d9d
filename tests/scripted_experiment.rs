//! Integration tests for the scripted experiment

use trampoline::error::Error;
use trampoline::experiment::Step;
use trampoline::{Ceiling, ExperimentConfig, ExperimentController, MockRuntime, Plan, SlabStore};

#[test]
fn test_plan_and_store_walkthrough() -> trampoline::error::Result<()> {
    let plan = Plan::compute(Ceiling::new(32_000_000)?, 2_000_000)?;
    assert_eq!(plan.available, 30_000_000);
    assert_eq!(plan.reserved, 3_200_000);
    assert_eq!(plan.fill, 26_800_000);

    let mut store = SlabStore::new();
    store.add(plan.fill_len()?);
    let outcome = store.release(plan.fill_len()?);
    assert_eq!(outcome.shortfall, 0);
    assert_eq!(store.total_bytes(), 0);

    store.add(plan.reserved_len()?);
    assert_eq!(store.total_bytes(), 3_200_000);
    Ok(())
}

#[test]
fn test_report_carries_spike_headroom() -> trampoline::error::Result<()> {
    let runtime = MockRuntime::new(2_000_000);
    // Threshold already past the ceiling, as the pacer typically schedules it
    runtime.set_next_collection(60_000_000);

    let config = ExperimentConfig {
        ceiling: Ceiling::new(32_000_000)?,
        force_collect: false,
    };
    let report = ExperimentController::new(config, &runtime).run()?;

    let spike = report.step(Step::Spike).expect("spike recorded");
    assert_eq!(spike.snapshot.headroom(report.plan.ceiling), -28_000_000);
    assert!(report.step(Step::Collect).is_none());
    Ok(())
}

#[test]
fn test_forced_collection_precedes_reallocation() -> trampoline::error::Result<()> {
    let runtime = MockRuntime::new(0);
    let config = ExperimentConfig {
        ceiling: Ceiling::new(10_000_000)?,
        force_collect: true,
    };
    let report = ExperimentController::new(config, &runtime).run()?;

    let order: Vec<Step> = report.steps.iter().map(|r| r.step).collect();
    assert_eq!(
        order,
        vec![
            Step::Initial,
            Step::Spike,
            Step::Release,
            Step::Collect,
            Step::Reallocate
        ]
    );
    assert_eq!(report.steps.last().unwrap().retained, 1_000_000);
    Ok(())
}

#[test]
fn test_underflowing_plan_is_a_plan_error() {
    let runtime = MockRuntime::new(31_000_000);
    let config = ExperimentConfig {
        ceiling: Ceiling::new(32_000_000).unwrap(),
        force_collect: false,
    };
    let err = ExperimentController::new(config, &runtime).run().unwrap_err();
    assert!(matches!(err, Error::Plan(_)));
    assert!(err.to_string().contains("reserve"));
}
