//! Config loading tests.
//!
//! Covers the typed loader for `obc.toml` and the sectioned reader used by
//! the memory, process and failsafe files: ordering, error accumulation
//! and missing-file reporting.

use obc_common::config::{ConfigError, ConfigLoader, LogLevel, load_table, read_sections};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

#[derive(Debug, Deserialize)]
struct DaemonFile {
    shared: obc_common::config::SharedConfig,
}

/// Write `content` as `name` inside `dir`.
fn write_file(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

#[test]
fn daemon_settings_load_with_default_level() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "obc.toml",
        r#"
[shared]
service_name = "obc-main"
"#,
    );

    let cfg = DaemonFile::load(&dir.path().join("obc.toml")).unwrap();
    assert_eq!(cfg.shared.service_name, "obc-main");
    assert_eq!(cfg.shared.log_level, LogLevel::Info);
    assert!(cfg.shared.validate().is_ok());
}

#[test]
fn daemon_settings_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = DaemonFile::load(&dir.path().join("obc.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn failsafe_thresholds_follow_section_order() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "failsafe.toml",
        r#"
[PROC]
Thresh = 0

[CPU]
Thresh = 90

[CPU1]
Thresh = 95
"#,
    );

    let table = load_table(&dir.path().join("failsafe.toml")).unwrap();
    let thresholds = read_sections(&table, |s| s.integer_in("Thresh", 0..=i64::from(i32::MAX)))
        .unwrap();
    assert_eq!(thresholds, vec![0, 90, 95]);
}

#[test]
fn every_bad_section_is_reported() {
    let dir = TempDir::new().unwrap();
    write_file(
        dir.path(),
        "memory.toml",
        r#"
["/a"]
size = 0
kind = 1

["/b"]
size = 16
kind = 9

["/c"]
kind = 1
"#,
    );

    let table = load_table(&dir.path().join("memory.toml")).unwrap();
    let result = read_sections(&table, |s| {
        let size = s.integer_in("size", 1..=i64::from(u32::MAX));
        let kind = s.integer_in("kind", 1..=3);
        Some((size?, kind?))
    });

    let Err(ConfigError::Invalid(errors)) = result else {
        panic!("expected accumulated errors");
    };
    assert_eq!(errors.len(), 3, "{errors:?}");
    assert!(errors.iter().any(|e| e.starts_with("[/a]")));
    assert!(errors.iter().any(|e| e.starts_with("[/b]")));
    assert!(errors.iter().any(|e| e.contains("size: missing")));
}
