//! `process.toml` parsing.
//!
//! ```toml
//! [camera_reader]
//! cmd = "/opt/obc/bin/readcam --dev /dev/video0"
//! cpu = 2          # -1 = unpinned
//! prio = 50        # 0 = time-shared, 1..=99 = real-time FIFO
//! period = 100     # ms, multiple of the 10 ms monitoring cycle
//! restart = 1      # relaunch on exit
//! cpu_rate = 80    # CPU% alarm threshold
//! mem_rate = 30    # memory% alarm threshold
//! ```

use obc_common::config::{ConfigError, SectionReader, load_table, read_sections};
use obc_common::consts::{CPU_MAX, MONITOR_CYCLE_MS, PRIO_MAX, PROC_MAX};
use std::path::Path;

/// Configuration of one supervised worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    /// Section name, used in logs.
    pub name: String,
    /// Program path followed by whitespace-separated arguments.
    pub cmd: String,
    /// Core to pin to, `None` for unpinned.
    pub cpu: Option<usize>,
    /// 0 selects time-shared scheduling, anything above real-time.
    pub prio: u32,
    /// Monitoring period in milliseconds.
    pub period_ms: u32,
    /// Relaunch when the process exits.
    pub restart: bool,
    /// CPU usage alarm threshold, percent.
    pub cpu_rate: f32,
    /// Memory usage alarm threshold, percent.
    pub mem_rate: f32,
}

impl ProcessSpec {
    /// Monitoring period in supervisor cycles.
    pub fn period_cycles(&self) -> u64 {
        u64::from(self.period_ms / MONITOR_CYCLE_MS).max(1)
    }
}

fn read_spec(section: &mut SectionReader<'_>) -> Option<ProcessSpec> {
    let name = section.name().to_string();

    let cmd = section.string("cmd");
    if matches!(&cmd, Some(c) if c.trim().is_empty()) {
        section.fail("cmd: must not be empty");
    }
    let cpu = section.integer_in("cpu", -1..=i64::from(CPU_MAX));
    let prio = section.integer_in("prio", 0..=i64::from(PRIO_MAX));
    let period = section.integer("period").and_then(|p| {
        if p > 0 && p % i64::from(MONITOR_CYCLE_MS) == 0 && p <= i64::from(u32::MAX) {
            Some(p as u32)
        } else {
            section.fail(format!(
                "period: {p} must be a positive multiple of {MONITOR_CYCLE_MS}"
            ));
            None
        }
    });
    let restart = section.integer_in("restart", 0..=1);
    let cpu_rate = non_negative(section, "cpu_rate");
    let mem_rate = non_negative(section, "mem_rate");

    Some(ProcessSpec {
        name,
        cmd: cmd.filter(|c| !c.trim().is_empty())?,
        cpu: usize::try_from(cpu?).ok(),
        prio: prio? as u32,
        period_ms: period?,
        restart: restart? == 1,
        cpu_rate: cpu_rate?,
        mem_rate: mem_rate?,
    })
}

fn non_negative(section: &mut SectionReader<'_>, key: &str) -> Option<f32> {
    let value = section.number(key)?;
    if value >= 0.0 {
        Some(value as f32)
    } else {
        section.fail(format!("{key}: {value} must be >= 0"));
        None
    }
}

/// Parse process sections in declaration order.
pub fn parse_process_specs(table: &toml::Table) -> Result<Vec<ProcessSpec>, ConfigError> {
    let specs = read_sections(table, read_spec)?;
    if specs.len() > PROC_MAX {
        return Err(ConfigError::ValidationError(format!(
            "{} processes configured, at most {PROC_MAX} supported",
            specs.len()
        )));
    }
    Ok(specs)
}

/// Load `process.toml`.
pub fn load_process_specs(path: &Path) -> Result<Vec<ProcessSpec>, ConfigError> {
    parse_process_specs(&load_table(path)?)
}
