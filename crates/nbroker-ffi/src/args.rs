use std::ffi::{CStr, OsStr};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nbroker_core::PAYLOAD_SIZE;

use crate::error;

/// Borrow a filesystem path passed as a C string.
///
/// Paths are raw bytes on Unix, so no UTF-8 check is made.
///
/// # Safety
/// `value` must be null or point to a valid NUL-terminated C string.
pub(crate) unsafe fn path_arg<'a>(value: *const c_char) -> Option<&'a Path> {
    if value.is_null() {
        let _ = error::set_invalid_argument("path cannot be null");
        return None;
    }
    // SAFETY: the caller guarantees a NUL-terminated string.
    let bytes = unsafe { CStr::from_ptr(value) }.to_bytes();
    if bytes.is_empty() {
        let _ = error::set_invalid_argument("path cannot be empty");
        return None;
    }
    Some(Path::new(OsStr::from_bytes(bytes)))
}

/// Borrow a message payload, reading no more than fits in one message.
///
/// # Safety
/// If `len > 0`, `data` must be readable for `len` bytes.
pub(crate) unsafe fn payload_arg<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if data.is_null() {
        let _ = error::set_invalid_argument(format!("data is null but len is {len}"));
        return None;
    }
    // SAFETY: non-null and readable for `len >= min(len, PAYLOAD_SIZE)` bytes.
    Some(unsafe { std::slice::from_raw_parts(data, len.min(PAYLOAD_SIZE)) })
}

/// Write `value` through a required out-pointer.
///
/// # Safety
/// `out` must be null or valid for a write of `T`.
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T, name: &str) -> bool {
    if out.is_null() {
        let _ = error::set_invalid_argument(format!("{name} cannot be null"));
        return false;
    }
    // SAFETY: null was rejected above; the caller guarantees the rest.
    unsafe { out.write(value) };
    true
}
