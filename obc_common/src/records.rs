//! Fixed-layout records exchanged through shared memory.
//!
//! Every record is `#[repr(C)]` and [`bytemuck::Pod`], so a segment's bytes
//! can be cast to and from the record without copying field by field. The
//! layouts are also the on-disk dump format: changing a field invalidates
//! existing dump files.
//!
//! Producer records all start with an `i32` status field (0 = healthy,
//! 1 = unhealthy); [`status_field`] reads it from a raw image.

use crate::consts::{CPU_ROWS, FAIL_CODE_COUNT, PROC_MAX};
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

/// Liveness and resource usage of every supervised process (`/procstat`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ProcStatRecord {
    /// Number of configured processes.
    pub num: i32,
    /// Failure flag per process (0 = ok, 1 = failed).
    pub stat: [i32; PROC_MAX],
    /// Last sampled CPU usage per process, percent.
    pub cpu: [f32; PROC_MAX],
    /// Last sampled memory usage per process, percent.
    pub mem: [f32; PROC_MAX],
}

/// Board-level resource usage (`/resstat`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ResourceStatRecord {
    /// CPU load percent; row 0 is the aggregate, rows 1.. are cores.
    pub cpu_load: [i32; CPU_ROWS],
    /// Memory load percent.
    pub mem_load: i32,
    /// Root filesystem usage percent.
    pub disk_load: i32,
    /// CPU temperature in millidegrees Celsius.
    pub cpu_therm: i32,
}

/// Fault level per error code (`/failsafeinfo`). Index `code - 1`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FailsafeRecord {
    /// Raw fault levels, see [`crate::failsafe::FaultLevel`].
    pub levels: [i32; FAIL_CODE_COUNT],
}

/// Shared timer origin (`/synchrodata`), a `CLOCK_MONOTONIC` timespec.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct EpochRecord {
    /// Seconds.
    pub tv_sec: i64,
    /// Nanoseconds.
    pub tv_nsec: i64,
}

const_assert_eq!(core::mem::size_of::<ProcStatRecord>(), 1540);
const_assert_eq!(core::mem::size_of::<ResourceStatRecord>(), 64);
const_assert_eq!(core::mem::size_of::<FailsafeRecord>(), 136);
const_assert_eq!(core::mem::size_of::<EpochRecord>(), 16);

impl Default for ProcStatRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Default for ResourceStatRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Default for FailsafeRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl EpochRecord {
    /// An all-zero epoch means no participant has published one yet.
    pub fn is_unset(&self) -> bool {
        self.tv_sec == 0 && self.tv_nsec == 0
    }
}

/// Size in bytes of a record type.
pub const fn record_size<T: Pod>() -> usize {
    core::mem::size_of::<T>()
}

/// Decode a record from the front of `bytes`. Returns `None` if too short.
pub fn decode<T: Pod>(bytes: &[u8]) -> Option<T> {
    let size = core::mem::size_of::<T>();
    bytes
        .get(..size)
        .map(|head| bytemuck::pod_read_unaligned(head))
}

/// Read the leading `i32` status field of a producer record.
pub fn status_field(bytes: &[u8]) -> Option<i32> {
    read_i32_at(bytes, 0)
}

/// Read a native-endian `i32` at byte `offset`.
pub fn read_i32_at(bytes: &[u8], offset: usize) -> Option<i32> {
    let end = offset.checked_add(4)?;
    let field: [u8; 4] = bytes.get(offset..end)?.try_into().ok()?;
    Some(i32::from_ne_bytes(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_field_reads_first_word() {
        let bytes = [1u8, 0, 0, 0, 0xff, 0xff];
        assert_eq!(status_field(&bytes), Some(1));
        assert_eq!(status_field(&bytes[..3]), None);
    }

    #[test]
    fn resource_offsets_match_layout() {
        let mut record = ResourceStatRecord::default();
        record.cpu_load[4] = 90;
        record.cpu_therm = 55_000;
        let bytes = bytemuck::bytes_of(&record);
        assert_eq!(read_i32_at(bytes, 4 * 4), Some(90));
        assert_eq!(read_i32_at(bytes, 15 * 4), Some(55_000));
    }

    #[test]
    fn decode_rejects_short_images() {
        let bytes = [0u8; 8];
        assert!(decode::<EpochRecord>(&bytes).is_none());
        assert!(decode::<EpochRecord>(&[0u8; 16]).unwrap().is_unset());
    }
}
