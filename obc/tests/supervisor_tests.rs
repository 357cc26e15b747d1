//! # Supervisor Tests
//!
//! Drives the supervisor state machine against a scripted process host so
//! restart, forgiveness and overage policies can be checked cycle by cycle.
//! One test at the end runs a real child through the Linux host.

use obc::supervisor::{
    OsProcessHost, ProcessSpec, ProcessState, ProcfsInspector, Supervisor, launch,
};
use obc_common::consts::KILL_WAIT_RETRIES;
use obc_common::prelude::*;
use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

// ─── Helpers ────────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedHost {
    next_pid: u32,
    alive: HashSet<u32>,
    /// Spawned and not yet reaped.
    tracked: HashSet<u32>,
    spawned: Vec<String>,
    terminated: Vec<u32>,
    affinity: Vec<(u32, usize)>,
    priority: Vec<(u32, u32)>,
    checks: usize,
    fail_spawn: bool,
    fail_priority: bool,
    ignore_term: bool,
}

impl ScriptedHost {
    /// Simulate `pid` exiting on its own.
    fn exit(&mut self, pid: u32) {
        self.alive.remove(&pid);
    }
}

impl ProcessHost for ScriptedHost {
    fn spawn(&mut self, cmd: &str) -> Result<u32, WatchdogError> {
        if self.fail_spawn {
            return Err(WatchdogError::LaunchFailed {
                cmd: cmd.into(),
                reason: "scripted".into(),
            });
        }
        self.next_pid += 1;
        let pid = 1000 + self.next_pid;
        self.alive.insert(pid);
        self.tracked.insert(pid);
        self.spawned.push(cmd.to_string());
        Ok(pid)
    }

    fn is_alive(&mut self, pid: u32) -> Result<bool, WatchdogError> {
        self.checks += 1;
        let alive = self.alive.contains(&pid);
        if !alive {
            self.tracked.remove(&pid);
        }
        Ok(alive)
    }

    fn terminate(&mut self, pid: u32) -> Result<(), WatchdogError> {
        self.terminated.push(pid);
        if !self.ignore_term {
            self.alive.remove(&pid);
        }
        Ok(())
    }

    fn set_affinity(&mut self, pid: u32, cpu: usize) -> Result<(), WatchdogError> {
        self.affinity.push((pid, cpu));
        Ok(())
    }

    fn set_priority(&mut self, pid: u32, prio: u32) -> Result<(), WatchdogError> {
        if self.fail_priority {
            return Err(WatchdogError::Priority {
                pid,
                prio,
                reason: "scripted".into(),
            });
        }
        self.priority.push((pid, prio));
        Ok(())
    }
}

/// Reports whatever usage the test last stored in the shared cell.
#[derive(Default, Clone)]
struct FixedUsage {
    usage: Rc<Cell<ProcessUsage>>,
}

impl FixedUsage {
    fn reporting(cpu_percent: f32, mem_percent: f32) -> Self {
        let inspector = Self::default();
        inspector.set(cpu_percent, mem_percent);
        inspector
    }

    fn set(&self, cpu_percent: f32, mem_percent: f32) {
        self.usage.set(ProcessUsage {
            cpu_percent,
            mem_percent,
        });
    }
}

impl ProcessInspector for FixedUsage {
    fn sample(&mut self, _pid: u32) -> Result<ProcessUsage, WatchdogError> {
        Ok(self.usage.get())
    }
}

fn spec(restart: bool, period_ms: u32) -> ProcessSpec {
    ProcessSpec {
        name: "worker".into(),
        cmd: "/opt/obc/bin/worker --fast".into(),
        cpu: None,
        prio: 0,
        period_ms,
        restart,
        cpu_rate: 80.0,
        mem_rate: 50.0,
    }
}

fn started(specs: Vec<ProcessSpec>) -> Supervisor<ScriptedHost, FixedUsage> {
    let mut sup = Supervisor::new(specs, ScriptedHost::default(), FixedUsage::default());
    assert_eq!(sup.launch_all(), 0);
    sup
}

fn pid_of(sup: &Supervisor<ScriptedHost, FixedUsage>, i: usize) -> u32 {
    sup.runtime(i).and_then(|rt| rt.pid).expect("process running")
}

// ─── Launch ─────────────────────────────────────────────────────────

#[test]
fn launch_applies_affinity_and_priority() {
    let mut host = ScriptedHost::default();
    let mut pinned = spec(true, 10);
    pinned.cpu = Some(2);
    pinned.prio = 50;

    let pid = launch(&mut host, &pinned).unwrap();
    assert_eq!(host.affinity, vec![(pid, 2)]);
    assert_eq!(host.priority, vec![(pid, 50)]);
    assert_eq!(host.spawned, vec!["/opt/obc/bin/worker --fast"]);
}

#[test]
fn priority_failure_stops_the_new_process() {
    let host = ScriptedHost {
        fail_priority: true,
        ..Default::default()
    };
    let mut sup = Supervisor::new(vec![spec(true, 10)], host, FixedUsage::default());

    assert_eq!(sup.launch_all(), 1);
    assert_eq!(sup.host().terminated.len(), 1);
    assert!(sup.host().tracked.is_empty());
    assert_eq!(sup.record().stat[0], 1);
    let rt = sup.runtime(0).unwrap();
    assert_eq!((rt.state, rt.pid), (ProcessState::Dead, None));

    // Nothing left to monitor.
    assert!(!sup.monitor_tick());
}

#[test]
fn failed_launch_reaps_the_new_process() {
    let mut host = ScriptedHost {
        fail_priority: true,
        ..Default::default()
    };

    let pid = match launch(&mut host, &spec(true, 10)) {
        Err(WatchdogError::Priority { pid, .. }) => pid,
        other => panic!("expected priority failure, got {other:?}"),
    };
    assert_eq!(host.terminated, vec![pid]);
    assert!(host.checks > 0);
    assert!(!host.tracked.contains(&pid));
}

#[test]
fn failed_launch_gives_up_on_a_stubborn_process() {
    let mut host = ScriptedHost {
        fail_priority: true,
        ignore_term: true,
        ..Default::default()
    };

    assert!(matches!(
        launch(&mut host, &spec(true, 10)),
        Err(WatchdogError::Priority { .. })
    ));
    assert_eq!(host.checks, KILL_WAIT_RETRIES as usize);
}

#[test]
fn first_check_moves_running_to_alive() {
    let mut sup = started(vec![spec(true, 10)]);
    assert_eq!(sup.runtime(0).unwrap().state, ProcessState::Running);
    assert!(sup.monitor_tick());
    assert_eq!(sup.runtime(0).unwrap().state, ProcessState::Alive);
    assert_eq!(sup.record().num, 1);
    assert_eq!(sup.record().stat[0], 0);
}

#[test]
fn period_gates_liveness_checks() {
    let mut sup = started(vec![spec(true, 50)]);
    let published: Vec<bool> = (0..10).map(|_| sup.monitor_tick()).collect();
    assert_eq!(sup.host().checks, 2);
    assert!(published[0] && published[5]);
    assert_eq!(published.iter().filter(|p| **p).count(), 2);
}

// ─── Restart policy ─────────────────────────────────────────────────

#[test]
fn third_restart_marks_failed() {
    let mut sup = started(vec![spec(true, 10)]);

    for expected in 1..=3u32 {
        let pid = pid_of(&sup, 0);
        sup.host_mut().exit(pid);
        assert!(sup.monitor_tick());

        let rt = sup.runtime(0).unwrap();
        assert_eq!(rt.restart_count, expected);
        assert_eq!(rt.state, ProcessState::Running);
        assert_ne!(rt.pid, Some(pid));
        let failed = if expected >= 3 { 1 } else { 0 };
        assert_eq!(sup.record().stat[0], failed, "after restart {expected}");
    }
    assert_eq!(sup.host().spawned.len(), 4);
}

#[test]
fn exit_without_restart_marks_failed() {
    let mut sup = started(vec![spec(false, 10)]);
    let pid = pid_of(&sup, 0);
    sup.host_mut().exit(pid);

    assert!(sup.monitor_tick());
    assert_eq!(sup.record().stat[0], 1);
    assert_eq!(sup.runtime(0).unwrap().state, ProcessState::Dead);

    for _ in 0..5 {
        assert!(!sup.monitor_tick());
    }
    assert_eq!(sup.host().spawned.len(), 1);
}

#[test]
fn failed_relaunch_is_not_retried() {
    let mut sup = started(vec![spec(true, 10)]);
    let pid = pid_of(&sup, 0);
    sup.host_mut().fail_spawn = true;
    sup.host_mut().exit(pid);

    assert!(sup.monitor_tick());
    assert_eq!(sup.record().stat[0], 1);
    let rt = sup.runtime(0).unwrap();
    assert_eq!((rt.state, rt.pid), (ProcessState::Dead, None));
    assert_eq!(rt.restart_count, 1);
    assert!(!sup.monitor_tick());
}

#[test]
fn restart_count_forgiven_after_quiet_window() {
    let mut sup = started(vec![spec(true, 10)]);
    for _ in 0..3 {
        let pid = pid_of(&sup, 0);
        sup.host_mut().exit(pid);
        sup.monitor_tick();
    }
    assert_eq!(sup.record().stat[0], 1);

    for _ in 0..RESTART_FORGIVE_CYCLES - 1 {
        sup.monitor_tick();
    }
    assert_eq!(sup.runtime(0).unwrap().restart_count, 3);

    sup.monitor_tick();
    let rt = sup.runtime(0).unwrap();
    assert_eq!(rt.restart_count, 0);
    assert_eq!(rt.cycles_since_restart, 0);
    assert_eq!(sup.record().stat[0], 0);
}

#[test]
fn new_restart_restarts_the_quiet_window() {
    let mut sup = started(vec![spec(true, 10)]);
    let pid = pid_of(&sup, 0);
    sup.host_mut().exit(pid);
    sup.monitor_tick();

    for _ in 0..600 {
        sup.monitor_tick();
    }
    let pid = pid_of(&sup, 0);
    sup.host_mut().exit(pid);
    sup.monitor_tick();
    assert_eq!(sup.runtime(0).unwrap().restart_count, 2);

    for _ in 0..600 {
        sup.monitor_tick();
    }
    assert_eq!(sup.runtime(0).unwrap().restart_count, 2);
}

// ─── Resource policy ────────────────────────────────────────────────

#[test]
fn cpu_overage_streak_terminates_after_three() {
    let mut sup = Supervisor::new(
        vec![spec(true, 10)],
        ScriptedHost::default(),
        FixedUsage::reporting(95.0, 1.0),
    );
    sup.launch_all();
    let pid = pid_of(&sup, 0);

    for streak in 1..=3 {
        sup.monitor_tick();
        assert_eq!(sup.runtime(0).unwrap().cpu_overage, streak);
        assert!(sup.host().terminated.is_empty());
    }
    sup.monitor_tick();
    assert_eq!(sup.host().terminated, vec![pid]);
    assert_eq!(sup.record().cpu[0], 95.0);

    // Next check finds it gone and relaunches with a fresh streak.
    sup.monitor_tick();
    let rt = sup.runtime(0).unwrap();
    assert_eq!(rt.restart_count, 1);
    assert_eq!(rt.cpu_overage, 0);
}

#[test]
fn overage_streak_resets_below_rate() {
    let usage = FixedUsage::reporting(10.0, 60.0);
    let mut sup = Supervisor::new(vec![spec(true, 10)], ScriptedHost::default(), usage.clone());
    sup.launch_all();

    for _ in 0..3 {
        sup.monitor_tick();
    }
    assert_eq!(sup.runtime(0).unwrap().mem_overage, 3);
    assert_eq!(sup.runtime(0).unwrap().cpu_overage, 0);

    usage.set(10.0, 40.0);
    sup.monitor_tick();
    assert_eq!(sup.runtime(0).unwrap().mem_overage, 0);

    usage.set(10.0, 60.0);
    for _ in 0..3 {
        sup.monitor_tick();
    }
    assert!(sup.host().terminated.is_empty());
    assert_eq!(sup.record().mem[0], 60.0);
}

// ─── Shutdown ───────────────────────────────────────────────────────

#[test]
fn shutdown_stops_every_process() {
    let mut sup = started(vec![spec(true, 10), spec(false, 20)]);
    let pids = [pid_of(&sup, 0), pid_of(&sup, 1)];

    let failures = sup.shutdown();
    assert!(failures.is_empty());
    assert_eq!(sup.host().terminated, pids.to_vec());
    assert!(sup.runtime(0).unwrap().pid.is_none());
}

#[test]
fn shutdown_reports_processes_that_ignore_the_signal() {
    let host = ScriptedHost {
        ignore_term: true,
        ..Default::default()
    };
    let mut sup = Supervisor::new(vec![spec(true, 10)], host, FixedUsage::default());
    sup.launch_all();

    let failures = sup.shutdown();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], WatchdogError::ExitTimeout { polls: 10, .. }));
}

// ─── Linux host ─────────────────────────────────────────────────────

#[test]
fn real_child_is_supervised_and_stopped() {
    let mut worker = spec(false, 10);
    worker.cmd = "/bin/sleep 30".into();
    worker.cpu_rate = 100.0;
    worker.mem_rate = 100.0;

    let mut sup = Supervisor::new(vec![worker], OsProcessHost::new(), ProcfsInspector::new());
    assert_eq!(sup.launch_all(), 0);
    assert!(sup.monitor_tick());
    assert_eq!(sup.runtime(0).unwrap().state, ProcessState::Alive);

    assert!(sup.shutdown().is_empty());
}

#[test]
fn real_child_is_reaped_after_affinity_failure() {
    let mut worker = spec(false, 10);
    worker.cmd = "/bin/sleep 30".into();
    // Outside any CPU set the kernel accepts.
    worker.cpu = Some(1 << 20);

    let mut host = OsProcessHost::new();
    let pid = match launch(&mut host, &worker) {
        Err(WatchdogError::Affinity { pid, .. }) => pid,
        other => panic!("expected affinity failure, got {other:?}"),
    };
    assert!(matches!(
        host.is_alive(pid),
        Err(WatchdogError::NotTracked { .. })
    ));
}
