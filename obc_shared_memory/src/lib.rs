//! # OBC Shared Memory
//!
//! Named shared memory segments coordinated across threads and processes
//! of the onboard computer, plus the periodic timer that keeps their
//! producers and consumers in phase.
//!
//! ## Components
//!
//! - [`SegmentRegistry`]: configured set of POSIX shared memory objects,
//!   each guarded by a named semaphore, reference-counted per process and
//!   write-gated by [`SegmentKind`]
//! - [`TimerSchedule`]: absolute-time periodic sleeps anchored to an epoch
//!   published in a well-known segment
//! - [`persistence`]: byte-image dumps restored at start-up and written at
//!   shutdown
//!
//! ## Usage
//!
//! ```rust,no_run
//! use obc_shared_memory::{SegmentKind, SegmentRegistry, ScheduleId, TimerSchedule};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = SegmentRegistry::new();
//! registry.configure_from_str(
//!     r#"
//! ["/synchrodata"]
//! size = 16
//! kind = 1
//!
//! ["/health"]
//! size = 4
//! kind = 1
//! "#,
//! )?;
//! let report = registry.initialize();
//! assert!(report.is_clean());
//!
//! let health = registry.open("/health", SegmentKind::Platform)?;
//! let mut timer = TimerSchedule::init(&registry, ScheduleId::Custom(1), 100)?;
//! for _ in 0..10 {
//!     registry.write(health, &0i32.to_ne_bytes())?;
//!     timer.wait()?;
//! }
//! registry.close(health)?;
//! registry.destroy_all();
//! # Ok(())
//! # }
//! ```
//!
//! ## Locking
//!
//! The registry's bookkeeping lock is process-local and only held for
//! open/close transitions and handle lookups. Segment contents are guarded
//! by the segment's named semaphore, which every process shares. There is
//! no ordering across segments.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod persistence;
pub mod platform;
pub mod registry;
pub mod segment;
pub mod timer;

pub use error::{ShmError, ShmResult};
pub use registry::{SegmentHandle, SegmentRegistry, SegmentSession, StartupReport};
pub use segment::{SegmentDef, SegmentKind, parse_definitions, validate_segment_name};
pub use timer::{ScheduleId, TimerError, TimerSchedule};

/// Initialize a default tracing subscriber for tools and tests
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
