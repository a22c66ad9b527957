use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use tracing::{debug, info};

use crate::error::{Result, SysvError};
use crate::key::IpcKey;

const OBJECT: &str = "shared memory segment";

/// An attached System V shared memory segment.
///
/// The mapping stays valid until the segment is detached (explicitly via
/// [`SharedSegment::detach`] or on drop). Marking the segment for removal
/// does not invalidate existing attachments; the kernel frees it once the
/// last process detaches.
///
/// The segment hands out a raw pointer only. Callers that share the memory
/// between processes must lay it out with address-independent, atomically
/// accessed fields.
pub struct SharedSegment {
    id: i32,
    key: IpcKey,
    addr: NonNull<u8>,
    len: usize,
}

// SAFETY: the segment is a plain shared mapping. Concurrent access discipline
// is the responsibility of the typed layer built on top (atomics only).
unsafe impl Send for SharedSegment {}
// SAFETY: see above; `&SharedSegment` only exposes the pointer and metadata.
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a fresh, zero-filled segment of `len` bytes and attach it.
    ///
    /// Fails with [`SysvError::AlreadyExists`] if a segment already exists for `key`.
    pub fn create(key: IpcKey, len: usize, mode: u32) -> Result<Self> {
        let flags = libc::IPC_CREAT | libc::IPC_EXCL | (mode & 0o777) as libc::c_int;
        // SAFETY: shmget has no memory-safety preconditions.
        let id = unsafe { libc::shmget(key.raw(), len, flags) };
        if id == -1 {
            let source = std::io::Error::last_os_error();
            return Err(match source.raw_os_error() {
                Some(libc::EEXIST) => SysvError::AlreadyExists {
                    object: OBJECT,
                    key: key.raw(),
                },
                _ => SysvError::Os {
                    op: "shmget",
                    source,
                },
            });
        }

        match Self::attach(id, key, len) {
            Ok(segment) => {
                info!(%key, id, len, "created shared memory segment");
                Ok(segment)
            }
            Err(err) => {
                // The segment is ours and unusable; do not leave it behind.
                let _ = remove_id(id);
                Err(err)
            }
        }
    }

    /// Open and attach the existing segment for `key`.
    pub fn open(key: IpcKey) -> Result<Self> {
        let id = lookup(key)?;
        let len = stat(id)?.shm_segsz;
        let segment = Self::attach(id, key, len)?;
        debug!(%key, id, len, "attached shared memory segment");
        Ok(segment)
    }

    /// Remove the segment for `key`.
    ///
    /// Existing attachments stay valid until detached.
    pub fn remove(key: IpcKey) -> Result<()> {
        let id = lookup(key)?;
        remove_id(id)?;
        info!(%key, id, "removed shared memory segment");
        Ok(())
    }

    /// Whether a segment exists for `key`.
    pub fn exists(key: IpcKey) -> Result<bool> {
        match lookup(key) {
            Ok(_) => Ok(true),
            Err(SysvError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn attach(id: i32, key: IpcKey, len: usize) -> Result<Self> {
        // SAFETY: a null address lets the kernel pick the mapping location.
        let addr = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        if addr as isize == -1 {
            let source = std::io::Error::last_os_error();
            return Err(match source.raw_os_error() {
                Some(libc::EIDRM) => SysvError::Removed { object: OBJECT, id },
                _ => SysvError::Os {
                    op: "shmat",
                    source,
                },
            });
        }

        let addr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| SysvError::Os {
            op: "shmat",
            source: std::io::Error::other("kernel returned a null mapping"),
        })?;

        Ok(Self { id, key, addr, len })
    }

    /// Base address of this process's mapping.
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Size of the segment in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Kernel identifier of the segment.
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn key(&self) -> IpcKey {
        self.key
    }

    /// Mark this segment for removal once the last process detaches.
    pub fn mark_for_removal(&self) -> Result<()> {
        remove_id(self.id)
    }

    /// Detach the mapping, reporting failure instead of swallowing it on drop.
    pub fn detach(self) -> Result<()> {
        let this = ManuallyDrop::new(self);
        // SAFETY: `addr` came from a successful shmat and is detached exactly once
        // because `Drop` is suppressed.
        let rc = unsafe { libc::shmdt(this.addr.as_ptr().cast::<libc::c_void>()) };
        if rc == -1 {
            return Err(SysvError::last_os("shmdt"));
        }
        debug!(key = %this.key, id = this.id, "detached shared memory segment");
        Ok(())
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        // SAFETY: `addr` came from a successful shmat and has not been detached.
        let rc = unsafe { libc::shmdt(self.addr.as_ptr().cast::<libc::c_void>()) };
        if rc == -1 {
            debug!(
                id = self.id,
                error = %std::io::Error::last_os_error(),
                "shmdt failed during drop"
            );
        }
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("len", &self.len)
            .finish()
    }
}

fn lookup(key: IpcKey) -> Result<i32> {
    // SAFETY: shmget has no memory-safety preconditions.
    let id = unsafe { libc::shmget(key.raw(), 0, 0) };
    if id == -1 {
        let source = std::io::Error::last_os_error();
        return Err(match source.raw_os_error() {
            Some(libc::ENOENT) => SysvError::NotFound {
                object: OBJECT,
                key: key.raw(),
            },
            _ => SysvError::Os {
                op: "shmget",
                source,
            },
        });
    }
    Ok(id)
}

fn stat(id: i32) -> Result<libc::shmid_ds> {
    // SAFETY: shmid_ds is plain old data; all-zero is a valid bit pattern.
    let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
    // SAFETY: `ds` is a valid writable shmid_ds for IPC_STAT.
    let rc = unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) };
    if rc == -1 {
        let source = std::io::Error::last_os_error();
        return Err(match source.raw_os_error() {
            Some(libc::EIDRM) | Some(libc::EINVAL) => SysvError::Removed { object: OBJECT, id },
            _ => SysvError::Os {
                op: "shmctl(IPC_STAT)",
                source,
            },
        });
    }
    Ok(ds)
}

fn remove_id(id: i32) -> Result<()> {
    // SAFETY: IPC_RMID ignores the buffer argument.
    let rc = unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
    if rc == -1 {
        let source = std::io::Error::last_os_error();
        return Err(match source.raw_os_error() {
            Some(libc::EIDRM) | Some(libc::EINVAL) => SysvError::Removed { object: OBJECT, id },
            _ => SysvError::Os {
                op: "shmctl(IPC_RMID)",
                source,
            },
        });
    }
    Ok(())
}
