//! Named segment registry with semaphore-guarded access
//!
//! The registry owns every configured segment of this process. Two locks
//! are involved and never nest the other way round:
//!
//! - a process-local mutex over the registry bookkeeping (reference counts,
//!   mappings, current kind), held only for open/close transitions and
//!   handle lookups;
//! - the segment's named semaphore, shared with every other process, held
//!   for the duration of one copy in or out of the segment.
//!
//! Writes are gated by kind: the kind passed to [`SegmentRegistry::open`] on
//! the zero-to-one transition becomes the segment's current kind, and
//! writes succeed only while it equals the configured kind.

use crate::error::{ShmError, ShmResult};
use crate::persistence::{load_dump, save_dump};
use crate::platform::{NamedSemaphore, attach_object, create_object, unlink_object};
use crate::segment::{SegmentDef, SegmentKind, parse_definitions, validate_segment_name};
use bytemuck::Pod;
use memmap2::MmapRaw;
use obc::config::{ConfigError, load_table, parse_table};
use obc::consts::SEM_WAIT_TIMEOUT_MS;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Opaque reference to an open segment, returned by [`SegmentRegistry::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentHandle {
    index: usize,
    generation: u64,
}

/// Mapping and semaphore of a segment open in this process
struct Attachment {
    name: String,
    size: usize,
    map: MmapRaw,
    sem: NamedSemaphore,
}

impl Attachment {
    fn attach(def: &SegmentDef) -> ShmResult<Self> {
        let map = attach_object(&def.name, def.size)?;
        let sem = NamedSemaphore::open(&def.name)?;
        Ok(Self {
            name: def.name.clone(),
            size: def.size,
            map,
            sem,
        })
    }

    /// Run `f` over the segment bytes with the semaphore held. A panic in
    /// `f` still releases the semaphore.
    fn locked<R>(&self, timeout: Duration, f: impl FnOnce(&mut [u8]) -> R) -> ShmResult<R> {
        let guard = self.sem.lock(timeout)?;
        // The semaphore serialises every participant, so this is the only
        // live view of the bytes until it is released.
        let bytes = unsafe { std::slice::from_raw_parts_mut(self.map.as_mut_ptr(), self.size) };
        let out = f(bytes);
        guard.unlock()?;
        Ok(out)
    }
}

struct Slot {
    def: SegmentDef,
    ref_count: usize,
    current_kind: Option<SegmentKind>,
    attachment: Option<Arc<Attachment>>,
}

#[derive(Default)]
struct Inner {
    generation: u64,
    slots: Vec<Slot>,
    by_name: HashMap<String, usize>,
}

impl Inner {
    fn slot(&self, handle: SegmentHandle) -> ShmResult<&Slot> {
        if handle.generation != self.generation {
            return Err(ShmError::InvalidHandle {
                index: handle.index,
            });
        }
        self.slots.get(handle.index).ok_or(ShmError::InvalidHandle {
            index: handle.index,
        })
    }

    fn slot_mut(&mut self, handle: SegmentHandle) -> ShmResult<&mut Slot> {
        if handle.generation != self.generation {
            return Err(ShmError::InvalidHandle {
                index: handle.index,
            });
        }
        self.slots.get_mut(handle.index).ok_or(ShmError::InvalidHandle {
            index: handle.index,
        })
    }

    fn attachment(&self, handle: SegmentHandle) -> ShmResult<Arc<Attachment>> {
        let slot = self.slot(handle)?;
        slot.attachment.clone().ok_or_else(|| ShmError::NotMapped {
            name: slot.def.name.clone(),
        })
    }
}

/// Outcome of bringing up every configured segment
#[derive(Debug, Default)]
pub struct StartupReport {
    results: Vec<(String, ShmResult<()>)>,
}

impl StartupReport {
    /// True when every segment came up
    pub fn is_clean(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    /// Number of segments attempted
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no segment was configured
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Segments that failed, with their errors
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ShmError)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }

    /// Result for one segment
    pub fn result(&self, name: &str) -> Option<&ShmResult<()>> {
        self.results.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }
}

fn validate_definitions(defs: &[SegmentDef]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for def in defs {
        if let Err(e) = validate_segment_name(&def.name) {
            errors.push(e);
        }
        if def.size == 0 {
            errors.push(format!("[{}] size must be > 0", def.name));
        }
        if !seen.insert(def.name.as_str()) {
            errors.push(format!("[{}] defined twice", def.name));
        }
    }
    errors
}

/// Registry of named shared memory segments
pub struct SegmentRegistry {
    inner: Mutex<Inner>,
    sem_timeout: Duration,
}

impl Default for SegmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentRegistry {
    /// Empty registry with the default semaphore timeout
    pub fn new() -> Self {
        Self::with_sem_timeout(Duration::from_millis(SEM_WAIT_TIMEOUT_MS))
    }

    /// Empty registry with a custom bound on semaphore waits
    pub fn with_sem_timeout(sem_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            sem_timeout,
        }
    }

    /// Load segment definitions from a `memory.toml` file
    pub fn configure_from_file(&self, path: &Path) -> ShmResult<()> {
        let table = load_table(path)?;
        self.configure(parse_definitions(&table)?)
    }

    /// Load segment definitions from `memory.toml` text
    pub fn configure_from_str(&self, content: &str) -> ShmResult<()> {
        let table = parse_table(content)?;
        self.configure(parse_definitions(&table)?)
    }

    /// Replace the configured segment set.
    ///
    /// Every definition is validated first; on any error nothing is applied
    /// and all problems are reported together. Fails if a segment of the
    /// current configuration is still open.
    pub fn configure(&self, defs: Vec<SegmentDef>) -> ShmResult<()> {
        let errors = validate_definitions(&defs);
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors).into());
        }

        let mut inner = self.inner.lock();
        if let Some(open) = inner.slots.iter().find(|s| s.ref_count > 0) {
            return Err(ConfigError::ValidationError(format!(
                "cannot reconfigure while {} is open",
                open.def.name
            ))
            .into());
        }

        inner.generation += 1;
        inner.by_name = defs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name.clone(), i))
            .collect();
        inner.slots = defs
            .into_iter()
            .map(|def| Slot {
                def,
                ref_count: 0,
                current_kind: None,
                attachment: None,
            })
            .collect();

        info!(segments = inner.slots.len(), "Segment registry configured");
        Ok(())
    }

    /// Create every configured segment and its semaphore, loading dumps.
    ///
    /// A failing segment does not stop the others; the report carries one
    /// result per segment.
    pub fn initialize(&self) -> StartupReport {
        let defs: Vec<SegmentDef> = self.inner.lock().slots.iter().map(|s| s.def.clone()).collect();
        let mut report = StartupReport::default();

        for def in defs {
            let result = self.initialize_one(&def);
            match &result {
                Ok(()) => debug!(segment = %def.name, size = def.size, "Segment ready"),
                Err(e) => error!(segment = %def.name, "Segment initialisation failed: {e}"),
            }
            report.results.push((def.name, result));
        }

        let failed = report.failures().count();
        if failed == 0 {
            info!(segments = report.len(), "All segments initialised");
        } else {
            error!(
                segments = report.len(),
                failed, "Segment initialisation incomplete, running degraded"
            );
        }
        report
    }

    fn initialize_one(&self, def: &SegmentDef) -> ShmResult<()> {
        create_object(&def.name, def.size)?;
        NamedSemaphore::create(&def.name)?;

        let Some(path) = &def.path else {
            return Ok(());
        };

        let handle = self.open(&def.name, def.kind)?;
        let loaded = self.update(handle, |bytes| -> std::io::Result<bool> {
            bytes.fill(0);
            match load_dump(path, bytes.len())? {
                Some(image) => {
                    bytes[..image.len()].copy_from_slice(&image);
                    Ok(true)
                }
                None => Ok(false),
            }
        });
        let closed = self.close(handle);

        if loaded?? {
            info!(segment = %def.name, path = %path.display(), "Segment restored from dump");
        }
        closed
    }

    /// Open a segment under `kind`, mapping it on first use in this process
    pub fn open(&self, name: &str, kind: SegmentKind) -> ShmResult<SegmentHandle> {
        let mut inner = self.inner.lock();
        let index = *inner.by_name.get(name).ok_or_else(|| ShmError::NotFound {
            name: name.to_string(),
        })?;
        let generation = inner.generation;
        let slot = &mut inner.slots[index];

        if slot.ref_count == 0 {
            let attachment = Attachment::attach(&slot.def)?;
            slot.attachment = Some(Arc::new(attachment));
            slot.current_kind = Some(kind);
            debug!(segment = %name, ?kind, "Segment mapped");
        }
        slot.ref_count += 1;

        Ok(SegmentHandle { index, generation })
    }

    /// Release one reference; unmaps on the last one. Never unlinks.
    pub fn close(&self, handle: SegmentHandle) -> ShmResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner.slot_mut(handle)?;
        if slot.ref_count == 0 {
            return Err(ShmError::InvalidHandle {
                index: handle.index,
            });
        }

        slot.ref_count -= 1;
        if slot.ref_count == 0 {
            slot.attachment = None;
            slot.current_kind = None;
            debug!(segment = %slot.def.name, "Segment unmapped");
        }
        Ok(())
    }

    /// Copy the first `out.len()` bytes of the segment into `out`
    pub fn read(&self, handle: SegmentHandle, out: &mut [u8]) -> ShmResult<()> {
        let attachment = self.inner.lock().attachment(handle)?;
        if out.len() > attachment.size {
            return Err(ShmError::BufferTooLarge {
                name: attachment.name.clone(),
                requested: out.len(),
                size: attachment.size,
            });
        }

        attachment.locked(self.sem_timeout, |bytes| {
            out.copy_from_slice(&bytes[..out.len()]);
        })
    }

    /// Copy `data` to the start of the segment
    pub fn write(&self, handle: SegmentHandle, data: &[u8]) -> ShmResult<()> {
        let attachment = self.writable(handle)?;
        if data.len() > attachment.size {
            return Err(ShmError::BufferTooLarge {
                name: attachment.name.clone(),
                requested: data.len(),
                size: attachment.size,
            });
        }

        attachment.locked(self.sem_timeout, |bytes| {
            bytes[..data.len()].copy_from_slice(data);
        })
    }

    /// Read-modify-write of the whole segment under one semaphore hold.
    ///
    /// Subject to the same kind check as [`write`](Self::write).
    pub fn update<R>(&self, handle: SegmentHandle, f: impl FnOnce(&mut [u8]) -> R) -> ShmResult<R> {
        let attachment = self.writable(handle)?;
        attachment.locked(self.sem_timeout, f)
    }

    fn writable(&self, handle: SegmentHandle) -> ShmResult<Arc<Attachment>> {
        let inner = self.inner.lock();
        let slot = inner.slot(handle)?;
        let attachment = inner.attachment(handle)?;

        let configured = slot.def.kind;
        match slot.current_kind {
            Some(current) if current == configured => Ok(attachment),
            current => {
                let current = current.unwrap_or(configured);
                warn!(segment = %slot.def.name, ?current, ?configured, "Write denied");
                Err(ShmError::AccessDenied {
                    name: slot.def.name.clone(),
                    current,
                    configured,
                })
            }
        }
    }

    /// Decode a record from the start of the segment
    pub fn read_record<T: Pod>(&self, handle: SegmentHandle) -> ShmResult<T> {
        let mut record = T::zeroed();
        self.read(handle, bytemuck::bytes_of_mut(&mut record))?;
        Ok(record)
    }

    /// Store a record at the start of the segment
    pub fn write_record<T: Pod>(&self, handle: SegmentHandle, record: &T) -> ShmResult<()> {
        self.write(handle, bytemuck::bytes_of(record))
    }

    /// Open `name` and close it again when the session is dropped
    pub fn session(&self, name: &str, kind: SegmentKind) -> ShmResult<SegmentSession<'_>> {
        let handle = self.open(name, kind)?;
        Ok(SegmentSession {
            registry: self,
            handle,
        })
    }

    /// Dump, detach and unlink every segment.
    ///
    /// Individual failures are logged and skipped.
    pub fn destroy_all(&self) {
        let defs: Vec<SegmentDef> = self.inner.lock().slots.iter().map(|s| s.def.clone()).collect();

        for def in &defs {
            if let Some(path) = &def.path {
                match self.dump_one(def, path) {
                    Ok(()) => debug!(segment = %def.name, path = %path.display(), "Segment dumped"),
                    Err(e) => error!(segment = %def.name, "Dump failed: {e}"),
                }
            }

            self.detach(&def.name);

            if let Err(e) = NamedSemaphore::unlink(&def.name) {
                error!(segment = %def.name, "Semaphore unlink failed: {e}");
            }
            if let Err(e) = unlink_object(&def.name) {
                error!(segment = %def.name, "Shared memory unlink failed: {e}");
            }
        }

        info!(segments = defs.len(), "Segments destroyed");
    }

    fn dump_one(&self, def: &SegmentDef, path: &Path) -> ShmResult<()> {
        let session = self.session(&def.name, def.kind)?;
        let mut image = vec![0u8; def.size];
        session.read(&mut image)?;
        drop(session);
        save_dump(path, &image)?;
        Ok(())
    }

    fn detach(&self, name: &str) {
        let mut inner = self.inner.lock();
        let Some(&index) = inner.by_name.get(name) else {
            return;
        };
        let slot = &mut inner.slots[index];
        if slot.ref_count > 0 {
            warn!(segment = %name, refs = slot.ref_count, "Detaching segment still in use");
        }
        slot.ref_count = 0;
        slot.current_kind = None;
        slot.attachment = None;
    }

    /// Current reference count of `name` in this process
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        let inner = self.inner.lock();
        inner.by_name.get(name).map(|&i| inner.slots[i].ref_count)
    }

    /// Configuration of `name`
    pub fn definition(&self, name: &str) -> Option<SegmentDef> {
        let inner = self.inner.lock();
        inner.by_name.get(name).map(|&i| inner.slots[i].def.clone())
    }

    /// Configured segment names in declaration order
    pub fn segment_names(&self) -> Vec<String> {
        self.inner.lock().slots.iter().map(|s| s.def.name.clone()).collect()
    }
}

/// Open segment closed on drop
pub struct SegmentSession<'a> {
    registry: &'a SegmentRegistry,
    handle: SegmentHandle,
}

impl SegmentSession<'_> {
    /// Underlying handle
    pub fn handle(&self) -> SegmentHandle {
        self.handle
    }

    /// See [`SegmentRegistry::read`]
    pub fn read(&self, out: &mut [u8]) -> ShmResult<()> {
        self.registry.read(self.handle, out)
    }

    /// See [`SegmentRegistry::write`]
    pub fn write(&self, data: &[u8]) -> ShmResult<()> {
        self.registry.write(self.handle, data)
    }

    /// See [`SegmentRegistry::update`]
    pub fn update<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> ShmResult<R> {
        self.registry.update(self.handle, f)
    }

    /// See [`SegmentRegistry::read_record`]
    pub fn read_record<T: Pod>(&self) -> ShmResult<T> {
        self.registry.read_record(self.handle)
    }

    /// See [`SegmentRegistry::write_record`]
    pub fn write_record<T: Pod>(&self, record: &T) -> ShmResult<()> {
        self.registry.write_record(self.handle, record)
    }
}

impl Drop for SegmentSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.registry.close(self.handle) {
            warn!("Segment session close failed: {e}");
        }
    }
}
