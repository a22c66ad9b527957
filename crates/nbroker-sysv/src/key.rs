use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{Result, SysvError};

/// Integer key naming a System V kernel object.
///
/// All participants must agree on the key out of band. Deriving it from a
/// shared filesystem path with [`IpcKey::from_path`] is the usual way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IpcKey(i32);

impl IpcKey {
    /// Key for an object that can never be opened by key (`IPC_PRIVATE`).
    pub const PRIVATE: IpcKey = IpcKey(libc::IPC_PRIVATE);

    /// Wrap a raw key value.
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Derive a key from an existing path and a project id, like `ftok(3)`.
    ///
    /// Only the low 8 bits of `proj_id` are significant and must not be zero.
    pub fn from_path(path: impl AsRef<Path>, proj_id: u8) -> Result<Self> {
        let path = path.as_ref();
        if proj_id == 0 {
            return Err(SysvError::InvalidPath {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "project id must be non-zero",
                ),
            });
        }

        let c_path =
            CString::new(path.as_os_str().as_bytes()).map_err(|_| SysvError::InvalidPath {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path contains an interior NUL byte",
                ),
            })?;

        // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
        let key = unsafe { libc::ftok(c_path.as_ptr(), libc::c_int::from(proj_id)) };
        if key == -1 {
            return Err(SysvError::InvalidPath {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(Self(key))
    }

    /// The raw key value.
    pub const fn raw(self) -> i32 {
        self.0
    }

    pub fn is_private(self) -> bool {
        self == Self::PRIVATE
    }
}

impl fmt::Display for IpcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<i32> for IpcKey {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}
