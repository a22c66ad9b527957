use nbroker_core::Message;

use crate::args;
use crate::error;
use crate::types::NbMessage;

/// Allocate a message, truncating the payload to the fixed message size.
///
/// Returns null on invalid arguments. Release with `nbroker_message_free`.
///
/// # Safety
/// If `len > 0`, `data` must be readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn nbroker_message_new(
    channel: i64,
    sender: i32,
    data: *const u8,
    len: usize,
) -> *mut NbMessage {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();
        // SAFETY: the helper rejects a null `data` with a non-zero `len`.
        let Some(payload) = (unsafe { args::payload_arg(data, len) }) else {
            return std::ptr::null_mut();
        };
        let message = Message::new(channel, sender, payload);
        Box::into_raw(Box::new(NbMessage::from_message(&message)))
    })
}

/// Free a message allocated by this library.
///
/// # Safety
/// `message` must be null or a pointer obtained from this library that has
/// not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn nbroker_message_free(message: *mut NbMessage) {
    crate::ffi_boundary((), || {
        if message.is_null() {
            return;
        }
        // SAFETY: `message` was allocated with `Box::new` by this library.
        drop(unsafe { Box::from_raw(message) });
    });
}
