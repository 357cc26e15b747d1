//! Segment definitions and `memory.toml` parsing

use obc::config::{ConfigError, SectionReader, read_sections};
use std::fmt;
use std::path::{Path, PathBuf};

/// Largest segment accepted from configuration (16 MiB)
pub const SEGMENT_MAX_SIZE: usize = 16 * 1024 * 1024;

/// Access-control tag deciding which category of writer may mutate a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SegmentKind {
    /// Written by platform components (drivers, monitors)
    Platform = 1,
    /// Written by user applications
    User = 2,
    /// Written by supervised processes
    Process = 3,
}

impl SegmentKind {
    /// Decode the integer used in configuration files
    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(SegmentKind::Platform),
            2 => Some(SegmentKind::User),
            3 => Some(SegmentKind::Process),
            _ => None,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One configured segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDef {
    /// POSIX shared memory name, `/` followed by one path component
    pub name: String,
    /// Size in bytes, fixed for the lifetime of the segment
    pub size: usize,
    /// Kind allowed to write
    pub kind: SegmentKind,
    /// Dump file loaded at start-up and written at shutdown
    pub path: Option<PathBuf>,
}

impl SegmentDef {
    /// Definition without a dump path
    pub fn new(name: impl Into<String>, size: usize, kind: SegmentKind) -> Self {
        Self {
            name: name.into(),
            size,
            kind,
            path: None,
        }
    }

    /// Attach a dump path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Check that `name` is a portable POSIX shared memory / semaphore name
pub fn validate_segment_name(name: &str) -> Result<(), String> {
    let Some(rest) = name.strip_prefix('/') else {
        return Err(format!("name '{name}' must start with '/'"));
    };
    if rest.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if rest.contains('/') {
        return Err(format!("name '{name}' must not contain a second '/'"));
    }
    // sem_open prepends "sem." and NAME_MAX is 255
    if rest.len() > 251 {
        return Err(format!("name '{name}' is too long"));
    }
    if rest.bytes().any(|b| b == 0) {
        return Err(format!("name '{name}' contains NUL"));
    }
    Ok(())
}

fn parent_dir_exists(path: &Path) -> bool {
    match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => true,
        Some(dir) => dir.is_dir(),
        None => false,
    }
}

fn read_definition(section: &mut SectionReader<'_>) -> Option<SegmentDef> {
    let name = section.name().to_string();
    if let Err(e) = validate_segment_name(&name) {
        section.fail(e);
    }

    let size = section.integer_in("size", 1..=SEGMENT_MAX_SIZE as i64);
    let kind = section.integer("kind").and_then(|raw| {
        let kind = SegmentKind::from_raw(raw);
        if kind.is_none() {
            section.fail(format!("kind: {raw} is not 1 (platform), 2 (user) or 3 (process)"));
        }
        kind
    });

    let path = section.optional_string("path").map(PathBuf::from);
    if let Some(p) = &path {
        if !parent_dir_exists(p) {
            section.fail(format!("path: directory of '{}' does not exist", p.display()));
        }
    }

    Some(SegmentDef {
        name,
        size: usize::try_from(size?).ok()?,
        kind: kind?,
        path,
    })
}

/// Parse segment definitions from sectioned TOML, rejecting the whole
/// table if any section is invalid
pub fn parse_definitions(table: &toml::Table) -> Result<Vec<SegmentDef>, ConfigError> {
    read_sections(table, read_definition)
}
