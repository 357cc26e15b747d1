//! Error types for shared memory operations

use obc::config::ConfigError;
use thiserror::Error;

/// Errors that can occur during shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Segment configuration rejected
    #[error("Segment configuration error: {source}")]
    Config {
        /// Underlying configuration error
        #[from]
        source: ConfigError,
    },

    /// Segment name is not configured
    #[error("Segment not found: {name}")]
    NotFound {
        /// Segment name
        name: String,
    },

    /// Handle does not refer to an open segment
    #[error("Invalid segment handle: {index}")]
    InvalidHandle {
        /// Registry slot carried by the handle
        index: usize,
    },

    /// Segment is configured but not mapped in this process
    #[error("Segment not opened: {name}")]
    NotMapped {
        /// Segment name
        name: String,
    },

    /// Caller buffer larger than the segment
    #[error("Buffer of {requested} bytes exceeds segment {name} ({size} bytes)")]
    BufferTooLarge {
        /// Segment name
        name: String,
        /// Requested length
        requested: usize,
        /// Segment size
        size: usize,
    },

    /// OS object could not be created or attached
    #[error("Segment resource unavailable: {name}: {reason}")]
    ResourceUnavailable {
        /// Segment name
        name: String,
        /// OS error text
        reason: String,
    },

    /// Write attempted under a kind other than the configured one
    #[error("Write denied on {name}: opened as {current:?}, configured as {configured:?}")]
    AccessDenied {
        /// Segment name
        name: String,
        /// Kind recorded when the segment was opened
        current: crate::segment::SegmentKind,
        /// Kind the segment was configured with
        configured: crate::segment::SegmentKind,
    },

    /// Semaphore could not be acquired in time
    #[error("Semaphore timeout on {name}")]
    SemaphoreTimeout {
        /// Segment name
        name: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;
