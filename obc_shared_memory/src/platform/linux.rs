//! Linux-specific shared memory and semaphore operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapOptions, MmapRaw};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, clock_gettime};
use std::ffi::CString;
use std::fs::File;
use std::time::Duration;
use tracing::error;

fn unavailable(name: &str, reason: impl ToString) -> ShmError {
    ShmError::ResourceUnavailable {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn c_name(name: &str) -> ShmResult<CString> {
    CString::new(name).map_err(|e| unavailable(name, e))
}

/// Create (or reuse) the shared memory object and size it
pub fn create_object(name: &str, size: usize) -> ShmResult<()> {
    let fd = shm_open(
        name,
        OFlag::O_CREAT | OFlag::O_RDWR,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )
    .map_err(|e| unavailable(name, e))?;

    let file = File::from(fd);
    file.set_len(size as u64)?;
    Ok(())
}

/// Map an existing shared memory object; never creates it
pub fn attach_object(name: &str, size: usize) -> ShmResult<MmapRaw> {
    let fd = shm_open(name, OFlag::O_RDWR, Mode::empty()).map_err(|e| unavailable(name, e))?;
    let file = File::from(fd);

    let actual = file.metadata()?.len();
    if actual < size as u64 {
        return Err(unavailable(
            name,
            format!("object is {actual} bytes, configured {size}"),
        ));
    }

    let map = MmapOptions::new().len(size).map_raw(&file)?;
    Ok(map)
}

/// Remove the shared memory object from the namespace
pub fn unlink_object(name: &str) -> ShmResult<()> {
    shm_unlink(name)?;
    Ok(())
}

/// POSIX named semaphore used as a binary lock
pub struct NamedSemaphore {
    name: String,
    sem: *mut libc::sem_t,
}

// POSIX semaphores may be used from any thread.
unsafe impl Send for NamedSemaphore {}
unsafe impl Sync for NamedSemaphore {}

impl NamedSemaphore {
    /// Create the semaphore with an initial value of 1, or open it if it exists
    pub fn create(name: &str) -> ShmResult<Self> {
        let cname = c_name(name)?;
        let mode: libc::c_uint = 0o600;
        let initial: libc::c_uint = 1;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT, mode, initial) };
        Self::from_raw(name, sem)
    }

    /// Open an existing semaphore
    pub fn open(name: &str) -> ShmResult<Self> {
        let cname = c_name(name)?;
        let sem = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        Self::from_raw(name, sem)
    }

    fn from_raw(name: &str, sem: *mut libc::sem_t) -> ShmResult<Self> {
        if sem == libc::SEM_FAILED {
            return Err(unavailable(name, Errno::last()));
        }
        Ok(Self {
            name: name.to_string(),
            sem,
        })
    }

    /// Acquire, giving up after `timeout`
    pub fn acquire(&self, timeout: Duration) -> ShmResult<()> {
        let now = clock_gettime(ClockId::CLOCK_REALTIME)?;
        let deadline = now + TimeSpec::from_duration(timeout);

        loop {
            let ret = unsafe { libc::sem_timedwait(self.sem, deadline.as_ref()) };
            if ret == 0 {
                return Ok(());
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::ETIMEDOUT => {
                    return Err(ShmError::SemaphoreTimeout {
                        name: self.name.clone(),
                    });
                }
                e => return Err(e.into()),
            }
        }
    }

    /// Acquire and return a guard that releases on drop, including unwinds
    pub fn lock(&self, timeout: Duration) -> ShmResult<SemaphoreGuard<'_>> {
        self.acquire(timeout)?;
        Ok(SemaphoreGuard {
            sem: self,
            held: true,
        })
    }

    /// Release
    pub fn release(&self) -> ShmResult<()> {
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    /// Remove the semaphore name; open handles stay valid until closed
    pub fn unlink(name: &str) -> ShmResult<()> {
        let cname = c_name(name)?;
        if unsafe { libc::sem_unlink(cname.as_ptr()) } != 0 {
            return Err(Errno::last().into());
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Held semaphore, released by [`unlock`](Self::unlock) or on drop
pub struct SemaphoreGuard<'a> {
    sem: &'a NamedSemaphore,
    held: bool,
}

impl SemaphoreGuard<'_> {
    /// Release now and report failure
    pub fn unlock(mut self) -> ShmResult<()> {
        self.held = false;
        self.sem.release()
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.sem.release() {
                error!(segment = %self.sem.name, "Semaphore release failed: {e}");
            }
        }
    }
}
