//! Shared runtime state handed to every worker thread.

use obc_shared_memory::SegmentRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Registry, stop flag and configuration directory shared by all roles.
///
/// Cloning is cheap; every clone observes the same stop flag.
#[derive(Clone)]
pub struct RuntimeContext {
    registry: Arc<SegmentRegistry>,
    running: Arc<AtomicBool>,
    config_dir: PathBuf,
}

impl RuntimeContext {
    /// Context in the running state.
    pub fn new(registry: Arc<SegmentRegistry>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            running: Arc::new(AtomicBool::new(true)),
            config_dir: config_dir.into(),
        }
    }

    /// Segment registry.
    pub fn registry(&self) -> &SegmentRegistry {
        &self.registry
    }

    /// Owned handle to the registry.
    pub fn registry_arc(&self) -> Arc<SegmentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Flag cleared by the termination handler.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// True until [`request_stop`](Self::request_stop) is called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask every loop to exit after its current cycle.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Directory holding `memory.toml`, `process.toml` and friends.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of a file inside the configuration directory.
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_shared_between_clones() {
        let ctx = RuntimeContext::new(Arc::new(SegmentRegistry::new()), "/etc/obc");
        let worker = ctx.clone();
        assert!(worker.is_running());
        ctx.request_stop();
        assert!(!worker.is_running());
        assert_eq!(
            worker.config_file("process.toml"),
            PathBuf::from("/etc/obc/process.toml")
        );
    }
}
