//! Linux implementation of the process host and inspector.

use crate::procfs::{self, PidStat};
use nix::sched::{CpuSet, sched_setaffinity};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use obc_common::watchdog::{ProcessHost, ProcessInspector, ProcessUsage, WatchdogError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

/// Spawns workers with [`Command`] and keeps their [`Child`] handles for
/// non-blocking reaping.
#[derive(Default)]
pub struct OsProcessHost {
    children: HashMap<u32, Child>,
}

impl OsProcessHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessHost for OsProcessHost {
    fn spawn(&mut self, cmd: &str) -> Result<u32, WatchdogError> {
        let mut parts = cmd.split_whitespace();
        let program = parts.next().ok_or_else(|| WatchdogError::LaunchFailed {
            cmd: cmd.to_string(),
            reason: "empty command".into(),
        })?;

        // Workers start with an empty environment.
        let child = Command::new(program)
            .args(parts)
            .env_clear()
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| WatchdogError::LaunchFailed {
                cmd: cmd.to_string(),
                reason: e.to_string(),
            })?;

        let pid = child.id();
        self.children.insert(pid, child);
        debug!(pid, cmd, "Process spawned");
        Ok(pid)
    }

    fn is_alive(&mut self, pid: u32) -> Result<bool, WatchdogError> {
        let child = self
            .children
            .get_mut(&pid)
            .ok_or(WatchdogError::NotTracked { pid })?;

        match child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(status)) => {
                info!(pid, %status, "Process exited");
                self.children.remove(&pid);
                Ok(false)
            }
            Err(e) => Err(WatchdogError::Inspect {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    fn terminate(&mut self, pid: u32) -> Result<(), WatchdogError> {
        if !self.children.contains_key(&pid) {
            return Err(WatchdogError::NotTracked { pid });
        }
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| WatchdogError::Signal {
            pid,
            reason: e.to_string(),
        })
    }

    fn set_affinity(&mut self, pid: u32, cpu: usize) -> Result<(), WatchdogError> {
        let affinity_err = |reason: String| WatchdogError::Affinity { pid, cpu, reason };

        let mut cpuset = CpuSet::new();
        cpuset.set(cpu).map_err(|e| affinity_err(e.to_string()))?;
        sched_setaffinity(Pid::from_raw(pid as i32), &cpuset)
            .map_err(|e| affinity_err(e.to_string()))
    }

    fn set_priority(&mut self, pid: u32, prio: u32) -> Result<(), WatchdogError> {
        let policy = if prio == 0 {
            libc::SCHED_OTHER
        } else {
            libc::SCHED_FIFO
        };
        let param = libc::sched_param {
            sched_priority: prio as i32,
        };
        let ret = unsafe { libc::sched_setscheduler(pid as libc::pid_t, policy, &param) };
        if ret != 0 {
            return Err(WatchdogError::Priority {
                pid,
                prio,
                reason: std::io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }
}

/// Samples per-process usage from `/proc/<pid>/stat`.
///
/// CPU% is the share of one core used since the previous sample of the same
/// pid (0 on the first sample). Memory% is resident size over `MemTotal`.
pub struct ProcfsInspector {
    proc_root: PathBuf,
    ticks_per_sec: f64,
    page_size: u64,
    previous: HashMap<u32, (u64, Instant)>,
}

impl Default for ProcfsInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsInspector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Inspector reading from an alternative procfs mount.
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            ticks_per_sec: procfs::clock_ticks() as f64,
            page_size: procfs::page_size(),
            previous: HashMap::new(),
        }
    }

    fn read_stat(&self, pid: u32) -> Result<PidStat, WatchdogError> {
        let path = self.proc_root.join(pid.to_string()).join("stat");
        let content = std::fs::read_to_string(&path).map_err(|e| WatchdogError::Inspect {
            pid,
            reason: e.to_string(),
        })?;
        procfs::parse_pid_stat(&content).ok_or_else(|| WatchdogError::Inspect {
            pid,
            reason: format!("unparsable {}", path.display()),
        })
    }
}

impl ProcessInspector for ProcfsInspector {
    fn sample(&mut self, pid: u32) -> Result<ProcessUsage, WatchdogError> {
        let stat = self.read_stat(pid)?;
        let now = Instant::now();

        let cpu_percent = match self.previous.insert(pid, (stat.cpu_ticks, now)) {
            Some((prev_ticks, prev_at)) => {
                let secs = now.duration_since(prev_at).as_secs_f64();
                if secs > 0.0 {
                    let used = stat.cpu_ticks.saturating_sub(prev_ticks) as f64 / self.ticks_per_sec;
                    (used / secs * 100.0) as f32
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let meminfo = procfs::read_meminfo(&self.proc_root.join("meminfo")).map_err(|e| {
            WatchdogError::Inspect {
                pid,
                reason: e.to_string(),
            }
        })?;
        let mem_percent = if meminfo.total_kb > 0 {
            let rss_bytes = stat.rss_pages * self.page_size;
            (rss_bytes as f64 / (meminfo.total_kb * 1024) as f64 * 100.0) as f32
        } else {
            0.0
        };

        Ok(ProcessUsage {
            cpu_percent,
            mem_percent,
        })
    }

    fn forget(&mut self, pid: u32) {
        self.previous.remove(&pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn inspector_reads_fake_procfs() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("77")).unwrap();
        fs::write(
            root.path().join("77/stat"),
            "77 (w) S 1 77 77 0 -1 0 0 0 0 0 10 10 0 0 20 0 1 0 5 1000 1024",
        )
        .unwrap();
        fs::write(root.path().join("meminfo"), "MemTotal: 4096 kB\n").unwrap();

        let mut inspector = ProcfsInspector::with_root(root.path());
        let usage = inspector.sample(77).unwrap();
        assert_eq!(usage.cpu_percent, 0.0);
        let expected = (1024 * inspector.page_size) as f32 / (4096.0 * 1024.0) * 100.0;
        assert!((usage.mem_percent - expected).abs() < 0.01);

        inspector.forget(77);
        assert!(inspector.sample(78).is_err());
    }

    #[test]
    fn host_spawns_and_reaps() {
        let mut host = OsProcessHost::new();
        let pid = host.spawn("/bin/sleep 5").unwrap();
        assert!(host.is_alive(pid).unwrap());
        host.terminate(pid).unwrap();

        let mut alive = true;
        for _ in 0..200 {
            alive = host.is_alive(pid).unwrap_or(false);
            if !alive {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!alive);
        assert!(matches!(
            host.is_alive(pid),
            Err(WatchdogError::NotTracked { .. })
        ));
    }

    #[test]
    fn spawn_of_missing_program_fails() {
        let mut host = OsProcessHost::new();
        assert!(matches!(
            host.spawn("/nonexistent/obc-worker --flag"),
            Err(WatchdogError::LaunchFailed { .. })
        ));
        assert!(host.spawn("   ").is_err());
    }
}
