//! Prelude module for common re-exports.
//!
//! ```rust
//! use obc_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SectionReader, SharedConfig, read_sections};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{FAIL_CODE_COUNT, MONITOR_CYCLE_MS, PROC_MAX, RESTART_FORGIVE_CYCLES};

// ─── Records ────────────────────────────────────────────────────────
pub use crate::records::{EpochRecord, FailsafeRecord, ProcStatRecord, ResourceStatRecord};

// ─── Failsafe ───────────────────────────────────────────────────────
pub use crate::failsafe::{FailCode, FaultLevel, SourceField};

// ─── Process host ───────────────────────────────────────────────────
pub use crate::watchdog::{ProcessHost, ProcessInspector, ProcessUsage, WatchdogError};
