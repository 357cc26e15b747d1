//! # OBC Platform Daemon
//!
//! Brings up the shared memory segments from `memory.toml`, then runs the
//! process supervisor, resource monitor and failsafe engine on their own
//! threads until SIGINT/SIGTERM/SIGHUP.
//!
//! # Usage
//!
//! ```bash
//! # Default configuration directory (/etc/obc)
//! obc
//!
//! # Development tree, verbose JSON logs
//! obc --config-dir config/ -v --json
//! ```

#![deny(warnings)]

use clap::Parser;
use obc::RuntimeContext;
use obc::{failsafe, resource, supervisor};
use obc_common::config::{ConfigError, ConfigLoader, SharedConfig};
use obc_common::consts::{DAEMON_CONFIG_FILE, DEFAULT_CONFIG_DIR, MAIN_CYCLE_MS, MEMORY_CONFIG_FILE};
use obc_shared_memory::{ScheduleId, SegmentRegistry, TimerSchedule};
use serde::Deserialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// OBC platform daemon - process supervision, resource monitoring and failsafe aggregation
#[derive(Parser, Debug)]
#[command(name = "obc")]
#[command(version)]
#[command(about = "Onboard computer platform daemon")]
#[command(long_about = None)]
struct Args {
    /// Directory holding memory.toml, process.toml, resource.toml and failsafe.toml
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

/// Optional `obc.toml`.
#[derive(Debug, Deserialize)]
struct DaemonConfig {
    shared: SharedConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("OBC daemon failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let daemon = load_daemon_config(&args.config_dir);
    setup_tracing(&args, daemon.as_ref());

    let service = daemon
        .as_ref()
        .map_or("obc", |d| d.shared.service_name.as_str());
    info!(service, "OBC daemon v{} starting...", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(SegmentRegistry::new());
    let ctx = RuntimeContext::new(Arc::clone(&registry), &args.config_dir);

    let running = ctx.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    })?;

    registry.configure_from_file(&ctx.config_file(MEMORY_CONFIG_FILE))?;
    let report = registry.initialize();
    for (name, e) in report.failures() {
        warn!(segment = name, "Unavailable: {e}");
    }

    // The main schedule is created first so it publishes the shared epoch.
    let mut timer = TimerSchedule::init(ctx.registry(), ScheduleId::Main, MAIN_CYCLE_MS)?;

    let workers = [
        spawn_role("supervisor", &ctx, supervisor::run),
        spawn_role("resource", &ctx, resource::run),
        spawn_role("failsafe", &ctx, failsafe::run),
    ];

    while ctx.is_running() {
        match timer.wait() {
            Ok(0) => {}
            Ok(skipped) => debug!(skipped, "Main cycle overrun"),
            Err(e) => {
                error!("Main timer failed: {e}");
                ctx.request_stop();
            }
        }
    }

    info!("Stopping worker threads");
    for worker in workers.into_iter().flatten() {
        let name = worker.thread().name().unwrap_or("worker").to_string();
        if worker.join().is_err() {
            error!(thread = %name, "Worker thread panicked");
        }
    }

    registry.destroy_all();
    info!("OBC daemon shutdown complete");
    Ok(())
}

/// Start a role on a named thread. A role that returns an error only ends
/// its own thread.
fn spawn_role<E: Display + 'static>(
    name: &'static str,
    ctx: &RuntimeContext,
    role: fn(&RuntimeContext) -> Result<(), E>,
) -> Option<JoinHandle<()>> {
    let ctx = ctx.clone();
    let spawned = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || match role(&ctx) {
            Ok(()) => info!(role = name, "Stopped"),
            Err(e) => error!(role = name, "Exited: {e}"),
        });
    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(role = name, "Thread spawn failed: {e}");
            None
        }
    }
}

/// Read `obc.toml` if present. Problems are printed, since tracing is not
/// set up yet.
fn load_daemon_config(dir: &Path) -> Option<DaemonConfig> {
    match DaemonConfig::load(&dir.join(DAEMON_CONFIG_FILE)) {
        Ok(config) => match config.shared.validate() {
            Ok(()) => Some(config),
            Err(e) => {
                eprintln!("Ignoring {DAEMON_CONFIG_FILE}: {e}");
                None
            }
        },
        Err(ConfigError::FileNotFound) => None,
        Err(e) => {
            eprintln!("Ignoring {DAEMON_CONFIG_FILE}: {e}");
            None
        }
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args, daemon: Option<&DaemonConfig>) {
    let directive = if args.verbose {
        Level::DEBUG.to_string().to_lowercase()
    } else {
        daemon
            .map_or("info", |d| d.shared.log_level.as_directive())
            .to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .init();
    }
}
