//! System-wide constants for the OBC workspace.
//!
//! Single source of truth for numeric limits, cycle times and
//! well-known segment names.

// ─── Limits ─────────────────────────────────────────────────────────

/// Maximum number of supervised processes.
pub const PROC_MAX: usize = 128;

/// Number of CPU load rows published in the resource record
/// (aggregate + 12 cores).
pub const CPU_ROWS: usize = 13;

/// Number of error codes in the failsafe table.
pub const FAIL_CODE_COUNT: usize = 34;

/// Highest CPU index accepted for process pinning. `-1` means unpinned.
pub const CPU_MAX: i32 = 11;

/// Highest real-time priority accepted in `process.toml`.
pub const PRIO_MAX: i32 = 99;

// ─── Cycle times ────────────────────────────────────────────────────

/// Supervisor monitoring cycle in milliseconds.
pub const MONITOR_CYCLE_MS: u32 = 10;

/// Failsafe aggregation cycle in milliseconds.
pub const FAILSAFE_CYCLE_MS: u32 = 100;

/// Resource monitor base cycle in milliseconds.
pub const RESOURCE_CYCLE_MS: u32 = 10;

/// Daemon main loop cycle in milliseconds.
pub const MAIN_CYCLE_MS: u32 = 500;

// ─── Supervisor policy ──────────────────────────────────────────────

/// Consecutive restarts after which a process is marked permanently failed.
pub const RESTART_FAIL_COUNT: u32 = 3;

/// Monitoring cycles without a restart after which the restart count is forgiven.
pub const RESTART_FORGIVE_CYCLES: u32 = 1000;

/// An overage streak above this bound terminates the process.
pub const OVERAGE_LIMIT: u32 = 3;

/// Exit polls after a termination signal during shutdown.
pub const KILL_WAIT_RETRIES: u32 = 10;

/// Backoff between exit polls during shutdown, in milliseconds.
pub const KILL_WAIT_BACKOFF_MS: u64 = 10;

// ─── Shared memory ──────────────────────────────────────────────────

/// Bound on a single semaphore acquisition, in milliseconds.
pub const SEM_WAIT_TIMEOUT_MS: u64 = 100;

/// Segment holding the shared timer epoch.
pub const SYNC_SEGMENT: &str = "/synchrodata";

/// Segment holding the supervisor's process record.
pub const PROC_STAT_SEGMENT: &str = "/procstat";

/// Segment holding the resource monitor's record.
pub const RESOURCE_STAT_SEGMENT: &str = "/resstat";

/// Segment holding the aggregate fault-level record.
pub const FAILSAFE_SEGMENT: &str = "/failsafeinfo";

// ─── Paths ──────────────────────────────────────────────────────────

/// Default configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/obc";

/// Segment registry configuration file name.
pub const MEMORY_CONFIG_FILE: &str = "memory.toml";

/// Supervised process configuration file name.
pub const PROCESS_CONFIG_FILE: &str = "process.toml";

/// Failsafe threshold configuration file name.
pub const FAILSAFE_CONFIG_FILE: &str = "failsafe.toml";

/// Resource sampling configuration file name.
pub const RESOURCE_CONFIG_FILE: &str = "resource.toml";

/// Optional daemon settings file name.
pub const DAEMON_CONFIG_FILE: &str = "obc.toml";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(PROC_MAX > 0);
        assert!(FAILSAFE_CYCLE_MS % MONITOR_CYCLE_MS == 0);
        assert!(MAIN_CYCLE_MS > FAILSAFE_CYCLE_MS);
        assert!(RESTART_FAIL_COUNT > 0);
    }

    #[test]
    fn segment_names_are_posix_names() {
        for name in [
            SYNC_SEGMENT,
            PROC_STAT_SEGMENT,
            RESOURCE_STAT_SEGMENT,
            FAILSAFE_SEGMENT,
        ] {
            assert!(name.starts_with('/'));
            assert!(!name[1..].contains('/'));
        }
    }
}
