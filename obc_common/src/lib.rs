//! OBC Common Library
//!
//! Shared constants, segment record layouts and configuration loading
//! utilities for all OBC workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits, errors and the section reader
//! - [`consts`] - System-wide limits, cycle times and well-known segment names
//! - [`records`] - Fixed-layout records published through shared memory
//! - [`failsafe`] - Error-code table and fault levels
//! - [`watchdog`] - Process host contract used by the supervisor
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! obc = { package = "obc_common", path = "../obc_common" }
//! ```
//!
//! ```rust
//! use obc_common::consts::*;
//! use obc_common::config::{ConfigLoader, SectionReader};
//! ```

pub mod config;
pub mod consts;
pub mod failsafe;
pub mod prelude;
pub mod records;
pub mod watchdog;
