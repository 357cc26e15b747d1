//! Failsafe error codes and fault levels.
//!
//! Each monitored health source has a stable numeric error code. The codes
//! are fixed at build time and their order matches the section order of
//! `failsafe.toml`: the first section holds the threshold for code 1, the
//! second for code 2, and so on.

use crate::consts::{FAIL_CODE_COUNT, PROC_STAT_SEGMENT, RESOURCE_STAT_SEGMENT};
use std::fmt;

/// Fault level assigned to a monitored source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum FaultLevel {
    /// Never observed above threshold.
    #[default]
    Safe = 0,
    /// Was above threshold on an earlier cycle, currently below.
    PastFail = 1,
    /// Above threshold on the latest cycle.
    CurrentFail = 2,
}

impl FaultLevel {
    /// Decode a level stored in the aggregate record.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(FaultLevel::Safe),
            1 => Some(FaultLevel::PastFail),
            2 => Some(FaultLevel::CurrentFail),
            _ => None,
        }
    }

    /// Next level given the raw health value, its threshold and the previous level.
    ///
    /// Once a source has left `Safe` it never returns there on its own.
    pub fn judge(raw: i32, threshold: i32, previous: FaultLevel) -> FaultLevel {
        if raw > threshold {
            FaultLevel::CurrentFail
        } else if previous != FaultLevel::Safe {
            FaultLevel::PastFail
        } else {
            FaultLevel::Safe
        }
    }
}

impl fmt::Display for FaultLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultLevel::Safe => "safe",
            FaultLevel::PastFail => "past-fail",
            FaultLevel::CurrentFail => "current-fail",
        };
        f.write_str(s)
    }
}

/// Stable error code of a monitored health source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum FailCode {
    Proc = 1,
    Cpu = 2,
    Cpu1 = 3,
    Cpu2 = 4,
    Cpu3 = 5,
    Cpu4 = 6,
    Cpu5 = 7,
    Cpu6 = 8,
    Cpu7 = 9,
    Cpu8 = 10,
    Cpu9 = 11,
    Cpu10 = 12,
    Cpu11 = 13,
    Cpu12 = 14,
    Mem = 15,
    Disk = 16,
    Therm = 17,
    Camera1 = 18,
    Camera2 = 19,
    Camera3 = 20,
    Camera4 = 21,
    Camera5 = 22,
    Camera6 = 23,
    Altitude = 24,
    Gnss = 25,
    Ins = 26,
    Imu = 27,
    Wifi = 28,
    AtmPressure = 29,
    EcuJetson1 = 30,
    EcuJetson2 = 31,
    EcuJetson3 = 32,
    Mag = 33,
    Ecu = 34,
}

impl FailCode {
    /// All codes in numeric order.
    pub const ALL: [FailCode; FAIL_CODE_COUNT] = [
        FailCode::Proc,
        FailCode::Cpu,
        FailCode::Cpu1,
        FailCode::Cpu2,
        FailCode::Cpu3,
        FailCode::Cpu4,
        FailCode::Cpu5,
        FailCode::Cpu6,
        FailCode::Cpu7,
        FailCode::Cpu8,
        FailCode::Cpu9,
        FailCode::Cpu10,
        FailCode::Cpu11,
        FailCode::Cpu12,
        FailCode::Mem,
        FailCode::Disk,
        FailCode::Therm,
        FailCode::Camera1,
        FailCode::Camera2,
        FailCode::Camera3,
        FailCode::Camera4,
        FailCode::Camera5,
        FailCode::Camera6,
        FailCode::Altitude,
        FailCode::Gnss,
        FailCode::Ins,
        FailCode::Imu,
        FailCode::Wifi,
        FailCode::AtmPressure,
        FailCode::EcuJetson1,
        FailCode::EcuJetson2,
        FailCode::EcuJetson3,
        FailCode::Mag,
        FailCode::Ecu,
    ];

    /// Look up a code by its number.
    pub fn from_code(code: u32) -> Option<Self> {
        let index = usize::try_from(code).ok()?.checked_sub(1)?;
        Self::ALL.get(index).copied()
    }

    /// Numeric code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Position of this code's field in [`crate::records::FailsafeRecord`].
    pub fn index(self) -> usize {
        self as usize - 1
    }

    /// Where the raw health value of this code lives on a standard deployment.
    pub fn default_source(self) -> SourceField {
        use FailCode::*;
        match self {
            // stat[0] follows the leading `num` field.
            Proc => SourceField::new(PROC_STAT_SEGMENT, 4),
            Cpu | Cpu1 | Cpu2 | Cpu3 | Cpu4 | Cpu5 | Cpu6 | Cpu7 | Cpu8 | Cpu9 | Cpu10
            | Cpu11 | Cpu12 => {
                let row = self.index() - Cpu.index();
                SourceField::new(RESOURCE_STAT_SEGMENT, row * 4)
            }
            Mem => SourceField::new(RESOURCE_STAT_SEGMENT, 52),
            Disk => SourceField::new(RESOURCE_STAT_SEGMENT, 56),
            Therm => SourceField::new(RESOURCE_STAT_SEGMENT, 60),
            Camera1 => SourceField::new("/readcam0", 0),
            Camera2 => SourceField::new("/readcam1", 0),
            Camera3 => SourceField::new("/readcam2", 0),
            Camera4 => SourceField::new("/readcam3", 0),
            Camera5 => SourceField::new("/readcam4", 0),
            Camera6 => SourceField::new("/readcam5", 0),
            Altitude => SourceField::new("/altmt", 0),
            Gnss => SourceField::new("/gnss", 0),
            Ins => SourceField::new("/ins", 0),
            Imu => SourceField::new("/imu", 0),
            Wifi => SourceField::new("/wifi", 0),
            AtmPressure => SourceField::new("/bme680", 0),
            EcuJetson1 => SourceField::new("/ecu0", 0),
            EcuJetson2 => SourceField::new("/ecu1", 0),
            EcuJetson3 => SourceField::new("/ecu2", 0),
            Mag => SourceField::new("/hmc6343", 0),
            Ecu => SourceField::new("/mavlink_recv", 0),
        }
    }
}

impl fmt::Display for FailCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Location of an `i32` health value inside a source segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceField {
    /// Source segment name.
    pub segment: String,
    /// Byte offset of the `i32` field in the segment.
    pub offset: usize,
}

impl SourceField {
    /// Field at `offset` in `segment`.
    pub fn new(segment: impl Into<String>, offset: usize) -> Self {
        Self {
            segment: segment.into(),
            offset,
        }
    }

    /// Bytes that must be read from the segment to reach the field.
    pub fn read_len(&self) -> usize {
        self.offset + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ProcStatRecord, ResourceStatRecord, read_i32_at};

    #[test]
    fn codes_are_dense_and_ordered() {
        for (i, code) in FailCode::ALL.iter().enumerate() {
            assert_eq!(code.code() as usize, i + 1);
            assert_eq!(FailCode::from_code(code.code()), Some(*code));
        }
        assert_eq!(FailCode::from_code(0), None);
        assert_eq!(FailCode::from_code(35), None);
    }

    #[test]
    fn latch_sequence() {
        let mut level = FaultLevel::Safe;
        let mut seen = Vec::new();
        for raw in [90, 10, 10, 10] {
            level = FaultLevel::judge(raw, 80, level);
            seen.push(level);
        }
        assert_eq!(
            seen,
            vec![
                FaultLevel::CurrentFail,
                FaultLevel::PastFail,
                FaultLevel::PastFail,
                FaultLevel::PastFail
            ]
        );
    }

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(FaultLevel::judge(80, 80, FaultLevel::Safe), FaultLevel::Safe);
        assert_eq!(
            FaultLevel::judge(81, 80, FaultLevel::Safe),
            FaultLevel::CurrentFail
        );
    }

    #[test]
    fn default_sources_point_at_record_fields() {
        let mut res = ResourceStatRecord::default();
        res.cpu_load[12] = 7;
        res.mem_load = 8;
        res.disk_load = 9;
        res.cpu_therm = 10;
        let bytes = bytemuck::bytes_of(&res);
        let read = |code: FailCode| read_i32_at(bytes, code.default_source().offset);
        assert_eq!(read(FailCode::Cpu12), Some(7));
        assert_eq!(read(FailCode::Mem), Some(8));
        assert_eq!(read(FailCode::Disk), Some(9));
        assert_eq!(read(FailCode::Therm), Some(10));

        let mut proc = ProcStatRecord::default();
        proc.stat[0] = 1;
        let source = FailCode::Proc.default_source();
        assert_eq!(read_i32_at(bytemuck::bytes_of(&proc), source.offset), Some(1));
    }
}
