//! # Process Host
//!
//! Defines the operating-system contract the supervisor drives to launch,
//! pin, prioritise, probe and stop worker processes, plus the inspection
//! contract used to sample per-process CPU and memory usage.
//!
//! The supervisor never calls the OS directly; the `obc` crate provides the
//! Linux implementation and tests substitute scripted hosts.

/// Error type for process host operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// The command could not be started.
    #[error("failed to launch '{cmd}': {reason}")]
    LaunchFailed { cmd: String, reason: String },

    /// CPU affinity could not be applied.
    #[error("failed to pin pid {pid} to cpu {cpu}: {reason}")]
    Affinity { pid: u32, cpu: usize, reason: String },

    /// Scheduling policy/priority could not be applied.
    #[error("failed to set priority {prio} on pid {pid}: {reason}")]
    Priority { pid: u32, prio: u32, reason: String },

    /// Signal delivery failed.
    #[error("failed to signal pid {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// The process did not exit after the termination signal.
    #[error("pid {pid} still running after {polls} polls")]
    ExitTimeout { pid: u32, polls: u32 },

    /// Usage sampling failed.
    #[error("failed to inspect pid {pid}: {reason}")]
    Inspect { pid: u32, reason: String },

    /// The pid was not started by this host.
    #[error("pid {pid} is not tracked")]
    NotTracked { pid: u32 },
}

/// CPU and memory usage of one process, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessUsage {
    /// CPU usage since the previous sample.
    pub cpu_percent: f32,
    /// Resident memory relative to total memory.
    pub mem_percent: f32,
}

/// OS-process abstraction driven by the supervisor.
///
/// # Example
///
/// ```rust,ignore
/// let pid = host.spawn("/usr/bin/worker --fast")?;
/// host.set_affinity(pid, 2)?;
/// host.set_priority(pid, 50)?;
/// while host.is_alive(pid)? { /* ... */ }
/// ```
pub trait ProcessHost {
    /// Start `cmd` (program path followed by whitespace-separated arguments).
    ///
    /// Returns the OS pid of the new process.
    fn spawn(&mut self, cmd: &str) -> Result<u32, WatchdogError>;

    /// Non-blocking liveness check. Reaps the process if it has exited.
    fn is_alive(&mut self, pid: u32) -> Result<bool, WatchdogError>;

    /// Send the termination signal.
    fn terminate(&mut self, pid: u32) -> Result<(), WatchdogError>;

    /// Pin the process to a single CPU core.
    fn set_affinity(&mut self, pid: u32, cpu: usize) -> Result<(), WatchdogError>;

    /// Apply the scheduling policy: `0` selects the time-shared policy,
    /// anything above selects the real-time policy at that priority.
    fn set_priority(&mut self, pid: u32, prio: u32) -> Result<(), WatchdogError>;
}

/// Per-process usage sampler.
pub trait ProcessInspector {
    /// Sample current usage of `pid`.
    fn sample(&mut self, pid: u32) -> Result<ProcessUsage, WatchdogError>;

    /// Drop any state kept for `pid` (called after it exits).
    fn forget(&mut self, _pid: u32) {}
}
