use std::ffi::c_void;
use std::os::raw::c_char;
use std::sync::Arc;

use nbroker_core::{BrokerConfig, BrokerHandle, IpcKey, Message, Target};

use crate::args;
use crate::error;
use crate::types::{NbHandler, NbMessage, NbResult, UserData};

fn status(result: nbroker_core::Result<()>) -> NbResult {
    match result {
        Ok(()) => NbResult::Ok,
        Err(err) => error::map_broker_error(&err),
    }
}

/// Derive an instance key from an existing filesystem path and project id.
///
/// # Safety
/// `path` must be a valid NUL-terminated C string. `out_key` must be
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn nbroker_key_from_path(
    path: *const c_char,
    proj_id: u8,
    out_key: *mut i32,
) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();

        // SAFETY: null is rejected by the helper.
        let Some(path) = (unsafe { args::path_arg(path) }) else {
            return NbResult::InvalidArgument;
        };
        match IpcKey::from_path(path, proj_id) {
            Ok(key) => {
                // SAFETY: Pointer validity is guaranteed by the caller.
                if unsafe { args::write_out(out_key, key.raw(), "out_key") } {
                    NbResult::Ok
                } else {
                    NbResult::InvalidArgument
                }
            }
            Err(err) => error::map_broker_error(&err.into()),
        }
    })
}

/// Create the instance for `key` with default settings.
#[no_mangle]
pub extern "C" fn nbroker_create(key: i32) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();
        status(nbroker_core::create(IpcKey::new(key)))
    })
}

/// Create the instance for `key` with explicit settings.
#[no_mangle]
pub extern "C" fn nbroker_create_with(
    key: i32,
    capacity: u32,
    wake_signal: i32,
    mode: u32,
) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();
        let config = BrokerConfig::default()
            .with_registry_capacity(capacity as usize)
            .with_wake_signal(wake_signal)
            .with_mode(mode);
        status(nbroker_core::create_with_config(IpcKey::new(key), &config))
    })
}

/// Open the instance for `key`, writing its handle to `out_handle`.
///
/// # Safety
/// `out_handle` must be valid for writes.
#[no_mangle]
pub unsafe extern "C" fn nbroker_open(key: i32, out_handle: *mut i32) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();
        if out_handle.is_null() {
            return error::set_invalid_argument("out_handle cannot be null");
        }
        match nbroker_core::open(IpcKey::new(key)) {
            Ok(handle) => {
                // SAFETY: Null was rejected above; validity is guaranteed by the caller.
                unsafe { args::write_out(out_handle, handle.raw(), "out_handle") };
                NbResult::Ok
            }
            Err(err) => error::map_broker_error(&err),
        }
    })
}

/// Subscribe the calling process to `channel` (which must be negative).
///
/// `handler` is invoked on a library-owned thread with a heap-allocated
/// message that it must release with `nbroker_message_free`, and with
/// `user_data` passed through unchanged.
///
/// # Safety
/// `handler` must be safe to call from another thread, and `user_data` must
/// stay valid until the subscription is closed.
#[no_mangle]
pub unsafe extern "C" fn nbroker_subscribe(
    handle: i32,
    channel: i64,
    handler: NbHandler,
    user_data: *mut c_void,
) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();
        let Some(callback) = handler else {
            return error::set_invalid_argument("handler cannot be null");
        };
        let user_data = UserData(user_data);

        let result = nbroker_core::subscribe_with(
            BrokerHandle::from_raw(handle),
            channel,
            Arc::new(move |message: Message| {
                // Move the Send wrapper, not its raw field.
                let user_data = user_data;
                let owned = Box::into_raw(Box::new(NbMessage::from_message(&message)));
                // SAFETY: The caller guarantees `callback` and `user_data` are usable
                // from this thread; ownership of `owned` passes to the callback.
                unsafe { callback(owned, user_data.0) };
            }),
        );
        status(result)
    })
}

/// Send `len` bytes at `data` to the recipients selected by `target`.
///
/// `target` is 0 for broadcast, a pid for unicast, or a negative channel for
/// multicast. Payloads longer than the fixed message size are truncated.
///
/// # Safety
/// If `len > 0`, `data` must be readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn nbroker_send(
    handle: i32,
    data: *const u8,
    len: usize,
    target: i64,
) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();
        // SAFETY: the helper rejects a null `data` with a non-zero `len`.
        let Some(payload) = (unsafe { args::payload_arg(data, len) }) else {
            return NbResult::InvalidArgument;
        };
        let target = match Target::from_raw(target) {
            Ok(target) => target,
            Err(err) => return error::map_broker_error(&err.into()),
        };
        status(nbroker_core::send(BrokerHandle::from_raw(handle), payload, target).map(|_| ()))
    })
}

/// Close `handle`, dropping this process's subscription on it.
#[no_mangle]
pub extern "C" fn nbroker_close(handle: i32) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();
        status(nbroker_core::close(BrokerHandle::from_raw(handle)))
    })
}

/// Destroy the instance for `key`.
#[no_mangle]
pub extern "C" fn nbroker_remove(key: i32) -> NbResult {
    crate::ffi_boundary(NbResult::Internal, || {
        error::clear_error_state();
        status(nbroker_core::remove(IpcKey::new(key)))
    })
}
