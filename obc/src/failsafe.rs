//! # Failsafe Aggregation Engine
//!
//! Every 100 ms each configured error code is judged against its threshold
//! and the resulting [`FaultLevel`] is stored in the aggregate segment
//! (`/failsafeinfo`, one `i32` per code).
//!
//! Sources are looked up through a table of [`SourceField`]s keyed by
//! [`FailCode`]: segment name plus byte offset of the `i32` health value.
//! A source whose segment cannot be opened is skipped for the cycle; its
//! previous level is kept.
//!
//! Levels latch: once a source has gone above its threshold it reports
//! `PastFail` when it recovers and never returns to `Safe` by itself.

use crate::context::RuntimeContext;
use obc_common::config::{ConfigError, load_table, read_sections};
use obc_common::consts::{FAIL_CODE_COUNT, FAILSAFE_CONFIG_FILE, FAILSAFE_CYCLE_MS, FAILSAFE_SEGMENT};
use obc_common::failsafe::{FailCode, FaultLevel, SourceField};
use obc_common::records::{FailsafeRecord, read_i32_at};
use obc_shared_memory::{
    ScheduleId, SegmentKind, SegmentRegistry, ShmError, TimerError, TimerSchedule,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failsafe errors
#[derive(Debug, Error)]
pub enum FailsafeError {
    /// Error code outside the table
    #[error("unknown error code {0}")]
    UnknownCode(u32),

    /// Aggregate holds a value that is not a fault level
    #[error("invalid fault level {raw} stored for code {code}")]
    InvalidLevel { code: u32, raw: i32 },

    #[error("failsafe segment: {0}")]
    Registry(#[from] ShmError),

    #[error("failsafe configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failsafe timer: {0}")]
    Timer(#[from] TimerError),
}

/// One monitored health source
#[derive(Debug, Clone, PartialEq)]
pub struct FailsafeEntry {
    pub code: FailCode,
    pub source: SourceField,
    pub threshold: i32,
    /// Last value read from the source
    pub raw: i32,
    pub level: FaultLevel,
}

// ─── Configuration ──────────────────────────────────────────────────

/// Parse `failsafe.toml`: one `Thresh` per section, in code order.
pub fn parse_thresholds(table: &toml::Table) -> Result<Vec<i32>, ConfigError> {
    let thresholds = read_sections(table, |section| {
        section
            .integer_in("Thresh", 0..=i64::from(i32::MAX))
            .map(|t| t as i32)
    })?;
    if thresholds.len() > FAIL_CODE_COUNT {
        return Err(ConfigError::ValidationError(format!(
            "{} thresholds configured, only {FAIL_CODE_COUNT} error codes exist",
            thresholds.len()
        )));
    }
    Ok(thresholds)
}

/// Load `failsafe.toml`.
pub fn load_thresholds(path: &Path) -> Result<Vec<i32>, ConfigError> {
    parse_thresholds(&load_table(path)?)
}

// ─── Engine ─────────────────────────────────────────────────────────

/// Table-driven aggregation of source health into fault levels.
pub struct FailsafeEngine {
    registry: Arc<SegmentRegistry>,
    aggregate: String,
    sources: HashMap<FailCode, SourceField>,
    entries: Vec<FailsafeEntry>,
    record: FailsafeRecord,
}

impl FailsafeEngine {
    /// Engine over the standard source table, publishing to `/failsafeinfo`.
    /// No code is monitored until thresholds are loaded.
    pub fn new(registry: Arc<SegmentRegistry>) -> Self {
        Self {
            registry,
            aggregate: FAILSAFE_SEGMENT.to_string(),
            sources: FailCode::ALL
                .iter()
                .map(|&code| (code, code.default_source()))
                .collect(),
            entries: Vec::new(),
            record: FailsafeRecord::default(),
        }
    }

    /// Publish to another aggregate segment.
    pub fn with_aggregate_segment(mut self, name: impl Into<String>) -> Self {
        self.aggregate = name.into();
        self
    }

    /// Read `code` from another location.
    pub fn with_source(mut self, code: FailCode, source: SourceField) -> Self {
        self.sources.insert(code, source);
        self
    }

    /// Load thresholds from `failsafe.toml`. Returns the number of codes
    /// now monitored.
    pub fn load_config(&mut self, path: &Path) -> Result<usize, FailsafeError> {
        let thresholds = load_thresholds(path)?;
        self.set_thresholds(&thresholds)?;
        Ok(self.entries.len())
    }

    /// Monitor the first `thresholds.len()` codes with the given thresholds.
    ///
    /// Levels of codes already monitored are kept.
    pub fn set_thresholds(&mut self, thresholds: &[i32]) -> Result<(), FailsafeError> {
        if thresholds.len() > FAIL_CODE_COUNT {
            return Err(ConfigError::ValidationError(format!(
                "{} thresholds for {FAIL_CODE_COUNT} codes",
                thresholds.len()
            ))
            .into());
        }
        if let Some(t) = thresholds.iter().find(|t| **t < 0) {
            return Err(ConfigError::ValidationError(format!("threshold {t} must be >= 0")).into());
        }

        let previous: HashMap<FailCode, FaultLevel> =
            self.entries.iter().map(|e| (e.code, e.level)).collect();
        self.entries = FailCode::ALL
            .iter()
            .zip(thresholds)
            .filter_map(|(&code, &threshold)| {
                let source = self.sources.get(&code)?.clone();
                Some(FailsafeEntry {
                    code,
                    source,
                    threshold,
                    raw: 0,
                    level: previous.get(&code).copied().unwrap_or_default(),
                })
            })
            .collect();

        info!(codes = self.entries.len(), "Failsafe thresholds loaded");
        Ok(())
    }

    /// Judge every monitored code once, in numeric order.
    ///
    /// The aggregate record is written after each code. Sources that cannot
    /// be read are skipped; only an unusable aggregate segment is an error.
    pub fn cycle(&mut self) -> Result<(), FailsafeError> {
        let aggregate = self.registry.session(&self.aggregate, SegmentKind::Platform)?;

        for entry in &mut self.entries {
            let Some(raw) = read_source(&self.registry, &entry.source) else {
                continue;
            };

            let level = FaultLevel::judge(raw, entry.threshold, entry.level);
            if level != entry.level {
                match level {
                    FaultLevel::CurrentFail => {
                        warn!(code = %entry.code, raw, threshold = entry.threshold, "Source above threshold")
                    }
                    _ => info!(code = %entry.code, raw, %level, "Source recovered"),
                }
            }
            entry.raw = raw;
            entry.level = level;
            self.record.levels[entry.code.index()] = level as i32;

            if let Err(e) = aggregate.write_record(&self.record) {
                warn!(segment = %self.aggregate, "Aggregate write failed: {e}");
            }
        }
        Ok(())
    }

    /// Level stored in the aggregate segment for `code`.
    pub fn get_fail_level(&self, code: u32) -> Result<FaultLevel, FailsafeError> {
        read_fail_level(&self.registry, &self.aggregate, code)
    }

    /// Monitored entries in code order.
    pub fn entries(&self) -> &[FailsafeEntry] {
        &self.entries
    }

    /// Aggregate record as last written.
    pub fn record(&self) -> &FailsafeRecord {
        &self.record
    }
}

fn read_source(registry: &SegmentRegistry, source: &SourceField) -> Option<i32> {
    let session = match registry.session(&source.segment, SegmentKind::Platform) {
        Ok(s) => s,
        Err(e) => {
            debug!(segment = %source.segment, "Source not available: {e}");
            return None;
        }
    };
    let mut bytes = vec![0u8; source.read_len()];
    match session.read(&mut bytes) {
        Ok(()) => read_i32_at(&bytes, source.offset),
        Err(e) => {
            debug!(segment = %source.segment, "Source read failed: {e}");
            None
        }
    }
}

/// Read the level of `code` from the aggregate segment `segment`.
pub fn read_fail_level(
    registry: &SegmentRegistry,
    segment: &str,
    code: u32,
) -> Result<FaultLevel, FailsafeError> {
    let code = FailCode::ALL
        .iter()
        .find(|c| c.code() == code)
        .copied()
        .ok_or(FailsafeError::UnknownCode(code))?;

    let record: FailsafeRecord = registry
        .session(segment, SegmentKind::Platform)?
        .read_record()?;
    let raw = record.levels[code.index()];
    FaultLevel::from_raw(raw).ok_or(FailsafeError::InvalidLevel {
        code: code.code(),
        raw,
    })
}

/// Failsafe thread body.
pub fn run(ctx: &RuntimeContext) -> Result<(), FailsafeError> {
    let mut engine = FailsafeEngine::new(ctx.registry_arc());
    engine.load_config(&ctx.config_file(FAILSAFE_CONFIG_FILE))?;
    let mut timer = TimerSchedule::init(ctx.registry(), ScheduleId::Failsafe, FAILSAFE_CYCLE_MS)?;

    while ctx.is_running() {
        if let Err(e) = engine.cycle() {
            warn!("Failsafe cycle skipped: {e}");
        }
        timer.wait()?;
    }
    info!("Failsafe engine stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use obc_common::config::parse_table;

    #[test]
    fn thresholds_keep_section_order() {
        let table = parse_table("[PROC]\nThresh = 0\n[CPU]\nThresh = 90\n[CPU1]\nThresh = 95\n")
            .unwrap();
        assert_eq!(parse_thresholds(&table).unwrap(), vec![0, 90, 95]);
    }

    #[test]
    fn negative_threshold_rejected() {
        let table = parse_table("[PROC]\nThresh = -1\n").unwrap();
        assert!(matches!(
            parse_thresholds(&table),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn too_many_sections_rejected() {
        let text: String = (0..35).map(|i| format!("[s{i}]\nThresh = 1\n")).collect();
        assert!(parse_thresholds(&parse_table(&text).unwrap()).is_err());
    }

    #[test]
    fn unknown_code_is_reported() {
        let registry = SegmentRegistry::new();
        assert!(matches!(
            read_fail_level(&registry, FAILSAFE_SEGMENT, 0),
            Err(FailsafeError::UnknownCode(0))
        ));
        assert!(matches!(
            read_fail_level(&registry, FAILSAFE_SEGMENT, 35),
            Err(FailsafeError::UnknownCode(35))
        ));
    }

    #[test]
    fn entries_follow_code_order() {
        let mut engine = FailsafeEngine::new(Arc::new(SegmentRegistry::new()))
            .with_source(FailCode::Cpu, SourceField::new("/elsewhere", 8));
        engine.set_thresholds(&[1, 2, 3]).unwrap();
        let codes: Vec<_> = engine.entries().iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![FailCode::Proc, FailCode::Cpu, FailCode::Cpu1]);
        assert_eq!(engine.entries()[1].source, SourceField::new("/elsewhere", 8));
        assert!(engine.set_thresholds(&[-5]).is_err());
    }
}
