//! Trampoline binary
//!
//! Binds itself to a memory-limited control group, then either runs the
//! scripted pacing experiment or serves the interactive HTTP surface.
//!
//! # Examples
//!
//! ```bash
//! # Scripted run, likely killed by the enforcer
//! sudo trampoline --limit 32MiB
//!
//! # Same run with a forced collection before reallocating
//! sudo trampoline --limit 32MiB --gc
//!
//! # Interactive mode on 0.0.0.0:1112
//! sudo trampoline --interactive
//! curl 'localhost:1112/add?bytes=10000000'
//! curl 'localhost:1112/rel?bytes=5000000'
//! curl 'localhost:1112/gc'
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trampoline::ceiling::pressure::log_pressure_events;
use trampoline::server::{shutdown_signal, start_server, AppState, ServerConfig};
use trampoline::{
    Ceiling, CeilingConfig, CeilingGuard, ExperimentConfig, ExperimentController, HeapRuntime,
    JemallocRuntime, MallocConf,
};

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Freed memory stays dirty until a forced collection purges it
#[export_name = "_rjem_malloc_conf"]
static MALLOC_CONF: MallocConf = MallocConf::PACED;

/// Trampoline - allocator pacing experiments under an enforced memory ceiling
#[derive(Parser, Debug)]
#[command(name = "trampoline")]
#[command(version = trampoline::VERSION)]
#[command(about = "Allocator pacing experiments under an enforced memory ceiling", long_about = None)]
struct Cli {
    /// Memory ceiling (bytes, or suffixed: 32MiB, 64M)
    #[arg(long, default_value = "32MiB", env = "TRAMPOLINE_LIMIT")]
    limit: Ceiling,

    /// Start in interactive HTTP mode
    #[arg(long, env = "TRAMPOLINE_INTERACTIVE")]
    interactive: bool,

    /// Force a collection before reallocating (scripted mode)
    #[arg(long, env = "TRAMPOLINE_GC")]
    gc: bool,

    /// HTTP bind address
    #[arg(short, long, default_value = "0.0.0.0", env = "TRAMPOLINE_BIND")]
    bind: String,

    /// HTTP port
    #[arg(short, long, default_value = "1112", env = "TRAMPOLINE_PORT")]
    port: u16,

    /// Enable CORS
    #[arg(long)]
    cors: bool,

    /// Control group name
    #[arg(long, default_value = "trampoline", env = "TRAMPOLINE_CGROUP")]
    cgroup_name: String,

    /// cgroup filesystem mount point
    #[arg(long, default_value = "/sys/fs/cgroup", env = "TRAMPOLINE_CGROUP_ROOT")]
    cgroup_root: PathBuf,

    /// Memory pressure polling interval in milliseconds
    #[arg(long, default_value = "100", env = "TRAMPOLINE_PRESSURE_INTERVAL_MS")]
    pressure_interval_ms: u64,

    /// Log directory path
    #[arg(long, default_value = "logs", env = "TRAMPOLINE_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    info!(version = %trampoline::VERSION, "Trampoline starting");
    info!(malloc_conf = MALLOC_CONF.options(), "Allocator options");
    info!(max_heap = cli.limit.bytes(), "Setting max heap");

    let ceiling_config = CeilingConfig {
        root: cli.cgroup_root.clone(),
        name: cli.cgroup_name.clone(),
        ceiling: cli.limit,
    };
    let guard = CeilingGuard::install(&ceiling_config).map_err(|e| {
        error!(error = %e, "Cannot enforce the memory ceiling, aborting");
        e
    })?;

    let (monitor, events) = guard
        .pressure_source()
        .spawn_monitor(Duration::from_millis(cli.pressure_interval_ms));
    let pressure_logger = log_pressure_events(events);

    let runtime = Arc::new(JemallocRuntime::new());

    let result = if cli.interactive {
        interactive_mode(&cli, runtime).await
    } else {
        tokio::select! {
            result = scripted_mode(&cli, runtime) => result,
            _ = shutdown_signal() => Ok(()),
        }
    };

    monitor.abort();
    pressure_logger.abort();
    if let Err(e) = guard.teardown() {
        warn!(error = %e, "Cgroup teardown incomplete");
    }

    result
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "trampoline.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(!cli.no_color)
                .pretty(),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Run the scripted sequence off the async workers
async fn scripted_mode(cli: &Cli, runtime: Arc<JemallocRuntime>) -> anyhow::Result<()> {
    let config = ExperimentConfig {
        ceiling: cli.limit,
        force_collect: cli.gc,
    };
    info!(
        ceiling = config.ceiling.bytes(),
        force_collect = config.force_collect,
        "Scripted mode"
    );

    let report = tokio::task::spawn_blocking(move || {
        ExperimentController::new(config, runtime.as_ref()).run()
    })
    .await??;

    info!(
        fill = report.plan.fill,
        reserved = report.plan.reserved,
        steps = report.steps.len(),
        "Congratulations, this program did not crash!"
    );
    Ok(())
}

async fn interactive_mode(cli: &Cli, runtime: Arc<JemallocRuntime>) -> anyhow::Result<()> {
    let baseline = runtime.snapshot()?;
    info!("{}", baseline);

    let server_config = ServerConfig {
        http_addr: cli.bind.clone(),
        http_port: cli.port,
        enable_cors: cli.cors,
    };
    let state = AppState::new(runtime, server_config).with_ceiling(cli.limit);

    start_server(state, shutdown_signal()).await
}
