//! Scripted experiment over the real allocator
//!
//! Installs jemalloc with the same options as the trampoline binary. One
//! test only, so no other test thread allocates between steps.

use trampoline::experiment::Step;
use trampoline::{Ceiling, ExperimentConfig, ExperimentController, JemallocRuntime, MallocConf};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[export_name = "_rjem_malloc_conf"]
static MALLOC_CONF: MallocConf = MallocConf::PACED;

#[test]
fn test_released_spike_stays_idle_until_collected() -> trampoline::error::Result<()> {
    let runtime = JemallocRuntime::new();
    let config = ExperimentConfig {
        ceiling: Ceiling::DEFAULT,
        force_collect: true,
    };
    let report = ExperimentController::new(config, &runtime).run()?;
    let fill = report.plan.fill;

    let spike = report.step(Step::Spike).expect("spike recorded");
    assert!(spike.snapshot.allocated >= fill);

    let release = report.step(Step::Release).expect("release recorded");
    assert_eq!(release.retained, 0);
    assert!(
        release.snapshot.heap_idle >= fill,
        "idle {} < fill {}",
        release.snapshot.heap_idle,
        fill
    );

    let collect = report.step(Step::Collect).expect("collect recorded");
    assert_eq!(collect.snapshot.num_collections, 1);
    assert!(collect.snapshot.heap_idle < release.snapshot.heap_idle);
    assert!(collect.snapshot.heap_idle < fill);
    Ok(())
}
