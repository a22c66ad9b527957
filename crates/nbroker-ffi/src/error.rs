use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use nbroker_core::{BrokerError, ErrorKind};

use crate::types::NbResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let sanitized = message.into().replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> NbResult {
    set_error_message(message);
    NbResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_broker_error(err: &BrokerError) -> NbResult {
    set_error_message(err.to_string());
    match err.kind() {
        ErrorKind::AlreadyExists => NbResult::AlreadyExists,
        ErrorKind::NotFound => NbResult::NotFound,
        ErrorKind::InvalidArgument => NbResult::InvalidArgument,
        ErrorKind::NoSubscribers => NbResult::NoSubscribers,
        ErrorKind::ResourceExhausted => NbResult::ResourceExhausted,
        ErrorKind::RecipientUnreachable => NbResult::RecipientUnreachable,
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
