//! nbroker-ffi: C-ABI exports for the notification broker.

mod args;
mod broker;
mod error;
mod message;
mod types;

use std::panic::AssertUnwindSafe;

pub use broker::{
    nbroker_close, nbroker_create, nbroker_create_with, nbroker_key_from_path, nbroker_open,
    nbroker_remove, nbroker_send, nbroker_subscribe,
};
pub use message::{nbroker_message_free, nbroker_message_new};
pub use types::{NbHandler, NbMessage, NbResult, NB_BROADCAST, NB_PAYLOAD_SIZE};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

#[no_mangle]
pub extern "C" fn nbroker_last_error() -> *const std::os::raw::c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}
