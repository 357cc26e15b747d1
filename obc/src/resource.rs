//! System resource monitor publishing `/resstat`.
//!
//! Four samplers, each on its own period from `resource.toml` (0 disables):
//! CPU load per row of `/proc/stat`, memory load from `/proc/meminfo`, disk
//! usage of `/` and the CPU thermal zone in millidegrees. The record is
//! published after every successful sample.

use crate::context::RuntimeContext;
use crate::procfs::{self, CpuTimes};
use obc_common::config::{ConfigError, load_table, read_sections};
use obc_common::consts::{CPU_ROWS, RESOURCE_CONFIG_FILE, RESOURCE_CYCLE_MS, RESOURCE_STAT_SEGMENT};
use obc_common::records::ResourceStatRecord;
use obc_shared_memory::{ScheduleId, SegmentKind, ShmError, TimerError, TimerSchedule};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("resource segment: {0}")]
    Registry(#[from] ShmError),

    #[error("resource timer: {0}")]
    Timer(#[from] TimerError),
}

/// What is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    CpuLoad,
    MemLoad,
    DiskLoad,
    CpuTherm,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::CpuLoad,
        ResourceKind::MemLoad,
        ResourceKind::DiskLoad,
        ResourceKind::CpuTherm,
    ];

    /// Section name in `resource.toml`.
    pub fn section(self) -> &'static str {
        match self {
            ResourceKind::CpuLoad => "cpu_load",
            ResourceKind::MemLoad => "mem_load",
            ResourceKind::DiskLoad => "disk_load",
            ResourceKind::CpuTherm => "cpu_therm",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// Sampling periods in milliseconds, 0 = not sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourcePeriods {
    pub cpu_load: u32,
    pub mem_load: u32,
    pub disk_load: u32,
    pub cpu_therm: u32,
}

impl ResourcePeriods {
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::CpuLoad => self.cpu_load,
            ResourceKind::MemLoad => self.mem_load,
            ResourceKind::DiskLoad => self.disk_load,
            ResourceKind::CpuTherm => self.cpu_therm,
        }
    }

    fn set(&mut self, kind: ResourceKind, period: u32) {
        match kind {
            ResourceKind::CpuLoad => self.cpu_load = period,
            ResourceKind::MemLoad => self.mem_load = period,
            ResourceKind::DiskLoad => self.disk_load = period,
            ResourceKind::CpuTherm => self.cpu_therm = period,
        }
    }
}

/// Parse `resource.toml`. Unknown sections are errors, missing ones
/// leave their sampler disabled.
pub fn parse_periods(table: &toml::Table) -> Result<ResourcePeriods, ConfigError> {
    let parsed = read_sections(table, |section| {
        let Some(kind) = ResourceKind::ALL
            .into_iter()
            .find(|k| k.section() == section.name())
        else {
            section.fail("unknown resource");
            return None;
        };
        let period = section.integer_in("period", 0..=i64::from(u32::MAX))?;
        if period % i64::from(RESOURCE_CYCLE_MS) != 0 {
            section.fail(format!(
                "period: {period} must be a multiple of {RESOURCE_CYCLE_MS}"
            ));
            return None;
        }
        Some((kind, period as u32))
    })?;

    let mut periods = ResourcePeriods::default();
    for (kind, period) in parsed {
        periods.set(kind, period);
    }
    Ok(periods)
}

/// Files the samplers read.
#[derive(Debug, Clone)]
pub struct ResourcePaths {
    pub proc_stat: PathBuf,
    pub meminfo: PathBuf,
    pub disk_root: PathBuf,
    pub thermal: PathBuf,
}

impl Default for ResourcePaths {
    fn default() -> Self {
        Self {
            proc_stat: "/proc/stat".into(),
            meminfo: "/proc/meminfo".into(),
            disk_root: "/".into(),
            thermal: "/sys/class/thermal/thermal_zone0/temp".into(),
        }
    }
}

/// Periodic sampler state.
pub struct ResourceMonitor {
    periods: ResourcePeriods,
    paths: ResourcePaths,
    previous_cpu: Vec<CpuTimes>,
    record: ResourceStatRecord,
    elapsed_ms: u64,
}

impl ResourceMonitor {
    pub fn new(periods: ResourcePeriods) -> Self {
        Self::with_paths(periods, ResourcePaths::default())
    }

    pub fn with_paths(periods: ResourcePeriods, paths: ResourcePaths) -> Self {
        Self {
            periods,
            paths,
            previous_cpu: Vec::new(),
            record: ResourceStatRecord::default(),
            elapsed_ms: 0,
        }
    }

    /// Run the samplers due on this cycle. Returns true when at least one
    /// succeeded and the record should be published.
    pub fn tick(&mut self) -> bool {
        let mut updated = false;
        for kind in ResourceKind::ALL {
            let period = u64::from(self.periods.get(kind));
            if period == 0 || self.elapsed_ms % period != 0 {
                continue;
            }
            match self.sample(kind) {
                Ok(()) => updated = true,
                Err(e) => warn!(resource = %kind, "Sample failed: {e}"),
            }
        }
        self.elapsed_ms += u64::from(RESOURCE_CYCLE_MS);
        updated
    }

    /// Sample one resource into the record.
    pub fn sample(&mut self, kind: ResourceKind) -> io::Result<()> {
        match kind {
            ResourceKind::CpuLoad => self.sample_cpu(),
            ResourceKind::MemLoad => {
                self.record.mem_load = procfs::read_meminfo(&self.paths.meminfo)?.load_percent();
                Ok(())
            }
            ResourceKind::DiskLoad => {
                let stat = nix::sys::statvfs::statvfs(&self.paths.disk_root)?;
                self.record.disk_load = disk_percent(
                    stat.blocks() as u64,
                    stat.blocks_free() as u64,
                    stat.blocks_available() as u64,
                );
                Ok(())
            }
            ResourceKind::CpuTherm => {
                let text = std::fs::read_to_string(&self.paths.thermal)?;
                self.record.cpu_therm = text
                    .trim()
                    .parse()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(())
            }
        }
    }

    fn sample_cpu(&mut self) -> io::Result<()> {
        let content = std::fs::read_to_string(&self.paths.proc_stat)?;
        let current = procfs::parse_cpu_rows(&content, CPU_ROWS);
        for (row, now) in current.iter().enumerate() {
            let load = match self.previous_cpu.get(row) {
                Some(prev) => now.load_since(prev),
                None => 0,
            };
            self.record.cpu_load[row] = load;
        }
        self.previous_cpu = current;
        Ok(())
    }

    pub fn record(&self) -> &ResourceStatRecord {
        &self.record
    }
}

/// Used share of a filesystem the way `df` reports it: used over
/// used + available to unprivileged users, rounded up.
fn disk_percent(blocks: u64, free: u64, available: u64) -> i32 {
    let used = blocks.saturating_sub(free);
    let usable = used + available;
    if usable == 0 {
        return 0;
    }
    (used * 100).div_ceil(usable) as i32
}

/// Resource monitor thread body.
pub fn run(ctx: &RuntimeContext) -> Result<(), ResourceError> {
    let periods = parse_periods(&load_table(&ctx.config_file(RESOURCE_CONFIG_FILE))?)?;
    let mut timer = TimerSchedule::init(ctx.registry(), ScheduleId::Resource, RESOURCE_CYCLE_MS)?;
    let status = ctx
        .registry()
        .session(RESOURCE_STAT_SEGMENT, SegmentKind::Platform)?;

    let mut monitor = ResourceMonitor::new(periods);
    info!(?periods, "Resource monitor started");

    while ctx.is_running() {
        if monitor.tick() {
            if let Err(e) = status.write_record(monitor.record()) {
                warn!("Resource status publish failed: {e}");
            }
        }
        timer.wait()?;
    }
    debug!("Resource monitor stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use obc_common::config::parse_table;
    use std::fs;

    #[test]
    fn periods_parse_and_validate() {
        let table = parse_table(
            "[cpu_load]\nperiod = 100\n[mem_load]\nperiod = 0\n[cpu_therm]\nperiod = 1000\n",
        )
        .unwrap();
        assert_eq!(
            parse_periods(&table).unwrap(),
            ResourcePeriods {
                cpu_load: 100,
                mem_load: 0,
                disk_load: 0,
                cpu_therm: 1000
            }
        );

        let bad = parse_table("[gpu_load]\nperiod = 10\n[disk_load]\nperiod = 15\n").unwrap();
        match parse_periods(&bad) {
            Err(ConfigError::Invalid(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn disk_percent_matches_df() {
        assert_eq!(disk_percent(1000, 400, 350), 64);
        assert_eq!(disk_percent(0, 0, 0), 0);
    }

    #[test]
    fn samples_from_fake_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ResourcePaths {
            proc_stat: dir.path().join("stat"),
            meminfo: dir.path().join("meminfo"),
            disk_root: dir.path().to_path_buf(),
            thermal: dir.path().join("temp"),
        };
        fs::write(&paths.proc_stat, "cpu 100 0 0 900\ncpu0 100 0 0 900\n").unwrap();
        fs::write(&paths.meminfo, "MemTotal: 100 kB\nMemFree: 25 kB\n").unwrap();
        fs::write(&paths.thermal, "48250\n").unwrap();

        let periods = ResourcePeriods {
            cpu_load: 10,
            mem_load: 10,
            disk_load: 0,
            cpu_therm: 20,
        };
        let mut monitor = ResourceMonitor::with_paths(periods, paths.clone());
        assert!(monitor.tick());
        assert_eq!(monitor.record().mem_load, 75);
        assert_eq!(monitor.record().cpu_therm, 48250);
        assert_eq!(monitor.record().cpu_load[0], 0);

        fs::write(&paths.proc_stat, "cpu 150 0 0 950\ncpu0 200 0 0 900\n").unwrap();
        fs::write(&paths.thermal, "50000\n").unwrap();
        assert!(monitor.tick());
        assert_eq!(monitor.record().cpu_load[0], 50);
        assert_eq!(monitor.record().cpu_load[1], 100);
        // Thermal period is 20 ms: not due on the second 10 ms cycle.
        assert_eq!(monitor.record().cpu_therm, 48250);
    }
}
