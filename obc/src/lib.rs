//! # OBC Platform Daemon Library
//!
//! Worker threads of the onboard computer platform. Each role runs on its
//! own OS thread, paces itself with a [`TimerSchedule`] anchored to the
//! shared epoch, and talks to the rest of the system only through named
//! segments in the [`SegmentRegistry`].
//!
//! ## Roles
//!
//! | Role | Period | Publishes |
//! |------|--------|-----------|
//! | [`supervisor`] | 10 ms | `/procstat` ([`ProcStatRecord`]) |
//! | [`resource`] | 10 ms | `/resstat` ([`ResourceStatRecord`]) |
//! | [`failsafe`] | 100 ms | `/failsafeinfo` ([`FailsafeRecord`]) |
//!
//! Configuration and start-up errors end the owning thread; errors inside a
//! cycle are logged and the cycle is retried on the next tick.
//!
//! [`TimerSchedule`]: obc_shared_memory::TimerSchedule
//! [`SegmentRegistry`]: obc_shared_memory::SegmentRegistry
//! [`ProcStatRecord`]: obc_common::records::ProcStatRecord
//! [`ResourceStatRecord`]: obc_common::records::ResourceStatRecord
//! [`FailsafeRecord`]: obc_common::records::FailsafeRecord

pub mod context;
pub mod failsafe;
pub mod procfs;
pub mod resource;
pub mod supervisor;

pub use context::RuntimeContext;
