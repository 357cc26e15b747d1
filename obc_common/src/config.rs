//! Configuration loading traits and types.
//!
//! Two styles of configuration are supported:
//!
//! - Typed files deserialized straight into a struct through [`ConfigLoader`]
//!   (daemon settings).
//! - Sectioned files (`memory.toml`, `process.toml`, `failsafe.toml`,
//!   `resource.toml`) where every section describes one item and the order
//!   of sections is significant. These are read with [`read_sections`], which
//!   hands each section to a [`SectionReader`] and accumulates every
//!   validation failure instead of stopping at the first one.
//!
//! # Usage
//!
//! ```rust,no_run
//! use obc_common::config::{load_table, read_sections, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let table = load_table(Path::new("/etc/obc/failsafe.toml"))?;
//!     let thresholds = read_sections(&table, |section| {
//!         section.integer_in("Thresh", 0..=i64::from(i32::MAX))
//!     })?;
//!     println!("{} thresholds", thresholds.len());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// One or more sections failed validation.
    #[error("Configuration invalid ({} errors): {}", .0.len(), .0.join("; "))]
    Invalid(Vec<String>),
}

/// Default verbosity of the daemon, written lowercase in `obc.toml`.
///
/// `RUST_LOG` and `--verbose` both take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    /// Only failures: launch errors, denied writes, segment bring-up.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Settings shared by every OBC binary, read from `obc.toml`.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "obc-main"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Defaults to `info`.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance identifier used in log lines.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = read_file(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Any serde-deserializable struct can use ConfigLoader.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound
        } else {
            ConfigError::ParseError(format!("{}: {e}", path.display()))
        }
    })
}

/// Load a sectioned TOML file, keeping section declaration order.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    parse_table(&read_file(path)?)
}

/// Parse sectioned TOML text, keeping section declaration order.
pub fn parse_table(content: &str) -> Result<toml::Table, ConfigError> {
    content
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Run `f` over every section of `table` in declaration order.
///
/// Sections for which `f` returns `None` are dropped. All failures recorded
/// through the [`SectionReader`]s are collected; if there is at least one,
/// the whole file is rejected with [`ConfigError::Invalid`].
pub fn read_sections<T, F>(table: &toml::Table, mut f: F) -> Result<Vec<T>, ConfigError>
where
    F: FnMut(&mut SectionReader<'_>) -> Option<T>,
{
    let mut errors = Vec::new();
    let mut items = Vec::with_capacity(table.len());

    for (name, value) in table {
        let Some(section) = value.as_table() else {
            errors.push(format!("'{name}' is not a section"));
            continue;
        };
        let mut reader = SectionReader {
            name,
            section,
            errors: &mut errors,
        };
        if let Some(item) = f(&mut reader) {
            items.push(item);
        }
    }

    if errors.is_empty() {
        Ok(items)
    } else {
        Err(ConfigError::Invalid(errors))
    }
}

/// Typed access to the keys of one configuration section.
///
/// Every getter records a message on failure and returns `None`, so a caller
/// can read all keys of a section and report everything wrong with it at once.
pub struct SectionReader<'a> {
    name: &'a str,
    section: &'a toml::Table,
    errors: &'a mut Vec<String>,
}

impl SectionReader<'_> {
    /// Section name (the text between the brackets).
    pub fn name(&self) -> &str {
        self.name
    }

    /// Whether the section defines `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.section.contains_key(key)
    }

    /// Record a validation failure against this section.
    pub fn fail(&mut self, message: impl std::fmt::Display) {
        self.errors.push(format!("[{}] {message}", self.name));
    }

    /// Required integer key.
    pub fn integer(&mut self, key: &str) -> Option<i64> {
        match self.section.get(key) {
            Some(toml::Value::Integer(v)) => Some(*v),
            Some(other) => {
                self.fail(format!("{key}: expected integer, found {}", other.type_str()));
                None
            }
            None => {
                self.fail(format!("{key}: missing"));
                None
            }
        }
    }

    /// Required integer key constrained to `range`.
    pub fn integer_in(&mut self, key: &str, range: RangeInclusive<i64>) -> Option<i64> {
        let value = self.integer(key)?;
        if range.contains(&value) {
            Some(value)
        } else {
            self.fail(format!(
                "{key}: {value} out of range {}..={}",
                range.start(),
                range.end()
            ));
            None
        }
    }

    /// Required numeric key; integers are widened to `f64`.
    pub fn number(&mut self, key: &str) -> Option<f64> {
        match self.section.get(key) {
            Some(toml::Value::Integer(v)) => Some(*v as f64),
            Some(toml::Value::Float(v)) => Some(*v),
            Some(other) => {
                self.fail(format!("{key}: expected number, found {}", other.type_str()));
                None
            }
            None => {
                self.fail(format!("{key}: missing"));
                None
            }
        }
    }

    /// Required string key.
    pub fn string(&mut self, key: &str) -> Option<String> {
        match self.section.get(key) {
            Some(toml::Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.fail(format!("{key}: expected string, found {}", other.type_str()));
                None
            }
            None => {
                self.fail(format!("{key}: missing"));
                None
            }
        }
    }

    /// Optional string key. An empty string counts as absent.
    pub fn optional_string(&mut self, key: &str) -> Option<String> {
        match self.section.get(key) {
            Some(toml::Value::String(s)) if s.is_empty() => None,
            Some(toml::Value::String(s)) => Some(s.clone()),
            Some(other) => {
                self.fail(format!("{key}: expected string, found {}", other.type_str()));
                None
            }
            None => None,
        }
    }
}
