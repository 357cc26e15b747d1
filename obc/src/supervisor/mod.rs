//! # Process Supervisor
//!
//! Launches the workers listed in `process.toml`, pins and prioritises
//! them, and on every 10 ms cycle checks the ones whose period is due.
//!
//! ```text
//! NotStarted ──launch──▶ Running ──tick──▶ Alive
//!                          ▲                 │ exit
//!                          └──── restart ─── Dead
//! ```
//!
//! Per-process policy:
//!
//! - alive: sample CPU% and memory%, count consecutive cycles above the
//!   configured rates, send the termination signal once either streak
//!   exceeds [`OVERAGE_LIMIT`];
//! - dead with `restart = 1`: relaunch and count the restart; the third
//!   restart marks the process failed in `/procstat`;
//! - dead with `restart = 0`: mark failed;
//! - [`RESTART_FORGIVE_CYCLES`] cycles after the last restart the counter
//!   and the failed mark are cleared.
//!
//! The OS is reached only through [`ProcessHost`] and [`ProcessInspector`].

pub mod config;
pub mod host;

pub use config::{ProcessSpec, load_process_specs, parse_process_specs};
pub use host::{OsProcessHost, ProcfsInspector};

use crate::context::RuntimeContext;
use obc_common::config::ConfigError;
use obc_common::consts::{
    KILL_WAIT_BACKOFF_MS, KILL_WAIT_RETRIES, MONITOR_CYCLE_MS, OVERAGE_LIMIT, PROC_STAT_SEGMENT,
    PROC_MAX, PROCESS_CONFIG_FILE, RESTART_FAIL_COUNT, RESTART_FORGIVE_CYCLES,
};
use obc_common::records::ProcStatRecord;
use obc_common::watchdog::{ProcessHost, ProcessInspector, ProcessUsage, WatchdogError};
use obc_shared_memory::{ScheduleId, SegmentKind, ShmError, TimerError, TimerSchedule};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that end the supervisor thread.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("process configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("process status segment: {0}")]
    Registry(#[from] ShmError),

    #[error("supervisor timer: {0}")]
    Timer(#[from] TimerError),
}

/// Lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    #[default]
    NotStarted,
    /// Launched, not yet checked.
    Running,
    /// Seen alive on its last check.
    Alive,
    /// Exited, or could not be launched.
    Dead,
}

/// Mutable per-process state.
#[derive(Debug, Clone, Default)]
pub struct ProcessRuntime {
    /// OS pid, `None` when not running.
    pub pid: Option<u32>,
    pub state: ProcessState,
    /// Restarts since the counter was last forgiven.
    pub restart_count: u32,
    /// Monitoring cycles since the last restart.
    pub cycles_since_restart: u32,
    /// Consecutive checks above `cpu_rate`.
    pub cpu_overage: u32,
    /// Consecutive checks above `mem_rate`.
    pub mem_overage: u32,
    /// Last sampled usage.
    pub usage: ProcessUsage,
}

/// Start `spec` and apply its affinity and scheduling policy.
///
/// If the policy cannot be applied the new process is sent the termination
/// signal, reaped, and the launch fails.
pub fn launch<H: ProcessHost>(host: &mut H, spec: &ProcessSpec) -> Result<u32, WatchdogError> {
    let pid = host.spawn(&spec.cmd)?;

    let configured = spec
        .cpu
        .map_or(Ok(()), |cpu| host.set_affinity(pid, cpu))
        .and_then(|()| host.set_priority(pid, spec.prio));

    if let Err(e) = configured {
        if let Err(kill_err) = host.terminate(pid).and_then(|()| wait_exit(host, pid)) {
            warn!(pid, "Could not stop partially started process: {kill_err}");
        }
        return Err(e);
    }

    info!(process = %spec.name, pid, cpu = ?spec.cpu, prio = spec.prio, "Process launched");
    Ok(pid)
}

/// Poll `pid` until the host no longer reports it alive.
fn wait_exit<H: ProcessHost>(host: &mut H, pid: u32) -> Result<(), WatchdogError> {
    for _ in 0..KILL_WAIT_RETRIES {
        match host.is_alive(pid) {
            Ok(true) => std::thread::sleep(Duration::from_millis(KILL_WAIT_BACKOFF_MS)),
            Ok(false) | Err(WatchdogError::NotTracked { .. }) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Err(WatchdogError::ExitTimeout {
        pid,
        polls: KILL_WAIT_RETRIES,
    })
}

/// Supervises a fixed set of processes.
pub struct Supervisor<H = OsProcessHost, I = ProcfsInspector> {
    specs: Vec<ProcessSpec>,
    runtimes: Vec<ProcessRuntime>,
    host: H,
    inspector: I,
    record: ProcStatRecord,
    cycle: u64,
}

impl<H: ProcessHost, I: ProcessInspector> Supervisor<H, I> {
    /// Supervisor over `specs`; at most [`PROC_MAX`] are kept.
    pub fn new(mut specs: Vec<ProcessSpec>, host: H, inspector: I) -> Self {
        if specs.len() > PROC_MAX {
            warn!(configured = specs.len(), "Too many processes, extra ones ignored");
            specs.truncate(PROC_MAX);
        }
        let mut record = ProcStatRecord::default();
        record.num = specs.len() as i32;
        Self {
            runtimes: vec![ProcessRuntime::default(); specs.len()],
            specs,
            host,
            inspector,
            record,
            cycle: 0,
        }
    }

    /// Launch every configured process. Returns the number of failures;
    /// failed processes are marked in the status record.
    pub fn launch_all(&mut self) -> usize {
        (0..self.specs.len())
            .filter(|&i| self.start(i).is_err())
            .count()
    }

    fn start(&mut self, index: usize) -> Result<u32, WatchdogError> {
        let spec = &self.specs[index];
        let restart_count = self.runtimes[index].restart_count;

        match launch(&mut self.host, spec) {
            Ok(pid) => {
                self.runtimes[index] = ProcessRuntime {
                    pid: Some(pid),
                    state: ProcessState::Running,
                    restart_count,
                    ..ProcessRuntime::default()
                };
                Ok(pid)
            }
            Err(e) => {
                error!(process = %spec.name, "Launch failed: {e}");
                let rt = &mut self.runtimes[index];
                rt.pid = None;
                rt.state = ProcessState::Dead;
                self.record.stat[index] = 1;
                Err(e)
            }
        }
    }

    /// Run one monitoring cycle.
    ///
    /// Returns true when the status record changed and should be published.
    pub fn monitor_tick(&mut self) -> bool {
        let mut publish = false;

        for i in 0..self.specs.len() {
            let due = self.cycle % self.specs[i].period_cycles() == 0;
            if let (true, Some(pid)) = (due, self.runtimes[i].pid) {
                match self.host.is_alive(pid) {
                    Ok(true) => {
                        self.observe_alive(i, pid);
                        publish = true;
                    }
                    Ok(false) | Err(WatchdogError::NotTracked { .. }) => {
                        self.handle_exit(i, pid);
                        publish = true;
                    }
                    Err(e) => warn!(process = %self.specs[i].name, pid, "Liveness check failed: {e}"),
                }
            }

            let rt = &mut self.runtimes[i];
            if rt.restart_count > 0 {
                rt.cycles_since_restart = rt.cycles_since_restart.saturating_add(1);
            }
        }

        self.cycle += 1;
        publish
    }

    fn observe_alive(&mut self, i: usize, pid: u32) {
        let spec = &self.specs[i];
        let rt = &mut self.runtimes[i];
        rt.state = ProcessState::Alive;

        match self.inspector.sample(pid) {
            Ok(usage) => {
                rt.usage = usage;
                self.record.cpu[i] = usage.cpu_percent;
                self.record.mem[i] = usage.mem_percent;

                rt.cpu_overage = streak(rt.cpu_overage, usage.cpu_percent > spec.cpu_rate);
                rt.mem_overage = streak(rt.mem_overage, usage.mem_percent > spec.mem_rate);
                if rt.cpu_overage > 0 || rt.mem_overage > 0 {
                    warn!(
                        process = %spec.name, pid,
                        cpu = usage.cpu_percent, cpu_streak = rt.cpu_overage,
                        mem = usage.mem_percent, mem_streak = rt.mem_overage,
                        "Usage above alarm rate"
                    );
                }

                let exceeded = if rt.cpu_overage > OVERAGE_LIMIT {
                    Some("CPU")
                } else if rt.mem_overage > OVERAGE_LIMIT {
                    Some("memory")
                } else {
                    None
                };
                if let Some(what) = exceeded {
                    error!(process = %spec.name, pid, "Terminating: {what} limit exceeded");
                    if let Err(e) = self.host.terminate(pid) {
                        error!(process = %spec.name, pid, "Terminate failed: {e}");
                    }
                }
            }
            Err(e) => debug!(process = %spec.name, pid, "Usage sample failed: {e}"),
        }

        if rt.restart_count > 0 && rt.cycles_since_restart >= RESTART_FORGIVE_CYCLES {
            info!(process = %spec.name, restarts = rt.restart_count, "Restart count forgiven");
            rt.restart_count = 0;
            rt.cycles_since_restart = 0;
            self.record.stat[i] = 0;
        }
    }

    fn handle_exit(&mut self, i: usize, pid: u32) {
        self.inspector.forget(pid);
        let rt = &mut self.runtimes[i];
        rt.pid = None;
        rt.state = ProcessState::Dead;

        if !self.specs[i].restart {
            warn!(process = %self.specs[i].name, pid, "Process exited, restart disabled");
            self.record.stat[i] = 1;
            return;
        }

        rt.restart_count += 1;
        rt.cycles_since_restart = 0;
        let restarts = rt.restart_count;
        if restarts >= RESTART_FAIL_COUNT {
            error!(process = %self.specs[i].name, restarts, "Process keeps exiting, marked failed");
            self.record.stat[i] = 1;
        } else {
            warn!(process = %self.specs[i].name, pid, restarts, "Process exited, restarting");
        }

        // A failed relaunch leaves the process dead; start() already logged it.
        if let Err(e) = self.start(i) {
            debug!(process = %self.specs[i].name, "Relaunch abandoned: {e}");
        }
    }

    /// Signal every running process and wait for it to exit.
    ///
    /// Returns the failures; they are logged, not escalated.
    pub fn shutdown(&mut self) -> Vec<WatchdogError> {
        let mut failures = Vec::new();

        for i in 0..self.specs.len() {
            let Some(pid) = self.runtimes[i].pid.take() else {
                continue;
            };
            self.runtimes[i].state = ProcessState::Dead;

            let stopped = self.host.terminate(pid).and_then(|()| wait_exit(&mut self.host, pid));
            match stopped {
                Ok(()) => debug!(process = %self.specs[i].name, pid, "Process stopped"),
                Err(e) => {
                    error!(process = %self.specs[i].name, pid, "Stop failed: {e}");
                    failures.push(e);
                }
            }
        }

        info!(failures = failures.len(), "Supervised processes stopped");
        failures
    }

    /// Status record as last updated.
    pub fn record(&self) -> &ProcStatRecord {
        &self.record
    }

    pub fn specs(&self) -> &[ProcessSpec] {
        &self.specs
    }

    pub fn runtime(&self, index: usize) -> Option<&ProcessRuntime> {
        self.runtimes.get(index)
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

fn streak(count: u32, over: bool) -> u32 {
    if over { count.saturating_add(1) } else { 0 }
}

/// Supervisor thread body.
///
/// Loads `process.toml`, launches the workers and monitors them until the
/// stop flag is cleared, then stops them.
pub fn run(ctx: &RuntimeContext) -> Result<(), SupervisorError> {
    let specs = load_process_specs(&ctx.config_file(PROCESS_CONFIG_FILE))?;
    let mut timer = TimerSchedule::init(ctx.registry(), ScheduleId::Process, MONITOR_CYCLE_MS)?;
    let status = ctx.registry().session(PROC_STAT_SEGMENT, SegmentKind::Platform)?;

    let mut supervisor = Supervisor::new(specs, OsProcessHost::new(), ProcfsInspector::new());
    let failed = supervisor.launch_all();
    info!(
        processes = supervisor.specs().len(),
        failed, "Supervisor started"
    );
    if let Err(e) = status.write_record(supervisor.record()) {
        warn!("Process status publish failed: {e}");
    }

    let result = loop {
        if !ctx.is_running() {
            break Ok(());
        }
        if supervisor.monitor_tick() {
            if let Err(e) = status.write_record(supervisor.record()) {
                warn!("Process status publish failed: {e}");
            }
        }
        if let Err(e) = timer.wait() {
            break Err(SupervisorError::from(e));
        }
    };

    supervisor.shutdown();
    result
}
