//! Periodic absolute-time scheduling anchored to a shared epoch
//!
//! Every schedule wakes at `epoch + k * period` on `CLOCK_MONOTONIC`. The
//! epoch lives in a well-known segment: the first participant that finds it
//! unset publishes its current time there, everyone after reuses it, so
//! threads and processes started at different moments stay in phase.

use crate::registry::SegmentRegistry;
use crate::segment::SegmentKind;
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};
use obc::consts::SYNC_SEGMENT;
use obc::records::{EpochRecord, decode};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const CLOCK: ClockId = ClockId::CLOCK_MONOTONIC;

/// Identity of a periodic schedule, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleId {
    /// Daemon main loop
    Main,
    /// Process supervisor
    Process,
    /// Resource monitor
    Resource,
    /// Failsafe aggregation
    Failsafe,
    /// Any other participant
    Custom(u16),
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleId::Custom(n) => write!(f, "custom-{n}"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// Timer errors
#[derive(Debug, Error)]
pub enum TimerError {
    /// The monotonic clock could not be read or slept on
    #[error("clock error: {0}")]
    Clock(#[from] Errno),
}

/// A periodic cadence with absolute wake-ups
#[derive(Debug, Clone)]
pub struct TimerSchedule {
    id: ScheduleId,
    period_ms: u32,
    period: TimeSpec,
    epoch: TimeSpec,
    next: TimeSpec,
    last: TimeSpec,
}

impl TimerSchedule {
    /// Anchor a schedule to the epoch in the default sync segment
    pub fn init(
        registry: &SegmentRegistry,
        id: ScheduleId,
        period_ms: u32,
    ) -> Result<Self, TimerError> {
        Self::init_with_epoch_segment(registry, SYNC_SEGMENT, id, period_ms)
    }

    /// Anchor a schedule to the epoch stored in `segment`.
    ///
    /// If the segment cannot be used the schedule falls back to a local
    /// epoch and logs a warning; it still runs, only out of phase.
    pub fn init_with_epoch_segment(
        registry: &SegmentRegistry,
        segment: &str,
        id: ScheduleId,
        period_ms: u32,
    ) -> Result<Self, TimerError> {
        let now = clock_gettime(CLOCK)?;
        let epoch = shared_epoch(registry, segment, now, id);
        let period = TimeSpec::from_duration(Duration::from_millis(u64::from(period_ms)));
        let first = epoch + period;

        debug!(schedule = %id, period_ms, "Timer schedule initialised");
        Ok(Self {
            id,
            period_ms,
            period,
            epoch,
            next: first,
            last: epoch,
        })
    }

    /// Sleep until the next wake time and return how many periods were skipped.
    ///
    /// With a zero period this sleeps once until the stored wake time and
    /// returns 0.
    pub fn wait(&mut self) -> Result<u32, TimerError> {
        if self.period_ms == 0 {
            sleep_until(self.next)?;
            self.last = self.next;
            return Ok(0);
        }

        let now = clock_gettime(CLOCK)?;
        let mut skipped = 0u32;
        while self.next <= now {
            self.next = self.next + self.period;
            skipped = skipped.saturating_add(1);
        }

        sleep_until(self.next)?;
        self.last = self.next;
        self.next = self.next + self.period;

        if skipped > 0 {
            warn!(schedule = %self.id, skipped, period_ms = self.period_ms, "Timer overrun");
        }
        Ok(skipped)
    }

    /// Schedule identity
    pub fn id(&self) -> ScheduleId {
        self.id
    }

    /// Period in milliseconds
    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    /// Shared origin this schedule is anchored to
    pub fn epoch(&self) -> Duration {
        Duration::from(self.epoch)
    }

    /// Next absolute wake time
    pub fn next_wake(&self) -> Duration {
        Duration::from(self.next)
    }

    /// Most recent absolute wake time
    pub fn last_wake(&self) -> Duration {
        Duration::from(self.last)
    }
}

fn sleep_until(target: TimeSpec) -> Result<(), TimerError> {
    loop {
        match clock_nanosleep(CLOCK, ClockNanosleepFlags::TIMER_ABSTIME, &target) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn to_record(ts: TimeSpec) -> EpochRecord {
    EpochRecord {
        tv_sec: ts.tv_sec() as i64,
        tv_nsec: ts.tv_nsec() as i64,
    }
}

fn from_record(record: EpochRecord) -> TimeSpec {
    TimeSpec::new(record.tv_sec as _, record.tv_nsec as _)
}

/// Read the shared epoch, publishing `now` if it is unset.
fn shared_epoch(registry: &SegmentRegistry, segment: &str, now: TimeSpec, id: ScheduleId) -> TimeSpec {
    let session = match registry.session(segment, SegmentKind::Platform) {
        Ok(s) => s,
        Err(e) => {
            warn!(schedule = %id, segment, "Epoch segment unavailable, using local epoch: {e}");
            return now;
        }
    };

    // Check-and-set under one semaphore hold so only one participant publishes.
    let published = session.update(|bytes| {
        let size = std::mem::size_of::<EpochRecord>();
        let mut epoch: EpochRecord = decode(bytes)?;
        if epoch.is_unset() {
            epoch = to_record(now);
            bytes[..size].copy_from_slice(bytemuck::bytes_of(&epoch));
        }
        Some(epoch)
    });

    match published {
        Ok(Some(epoch)) => from_record(epoch),
        Ok(None) => {
            warn!(schedule = %id, segment, "Epoch segment too small, using local epoch");
            now
        }
        // Not the writer of the epoch segment: accept an epoch someone else set.
        Err(e) => match session.read_record::<EpochRecord>() {
            Ok(epoch) if !epoch.is_unset() => from_record(epoch),
            _ => {
                warn!(schedule = %id, segment, "Epoch not published, using local epoch: {e}");
                now
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_id_display() {
        assert_eq!(ScheduleId::Failsafe.to_string(), "failsafe");
        assert_eq!(ScheduleId::Custom(7).to_string(), "custom-7");
    }

    #[test]
    fn missing_epoch_segment_falls_back_to_local_time() {
        let registry = SegmentRegistry::new();
        let schedule =
            TimerSchedule::init_with_epoch_segment(&registry, "/obc_absent", ScheduleId::Main, 50)
                .unwrap();
        assert_eq!(
            schedule.next_wake(),
            schedule.epoch() + Duration::from_millis(50)
        );
    }

    #[test]
    fn record_conversion_round_trips() {
        let ts = TimeSpec::new(12, 345);
        assert_eq!(from_record(to_record(ts)), ts);
    }
}
