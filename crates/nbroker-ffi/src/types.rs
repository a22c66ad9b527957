use std::ffi::c_void;

use nbroker_core::{Message, PAYLOAD_SIZE};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NbResult {
    Ok = 0,
    InvalidArgument = 1,
    AlreadyExists = 2,
    NotFound = 3,
    NoSubscribers = 4,
    ResourceExhausted = 5,
    RecipientUnreachable = 6,
    Internal = 99,
}

pub const NB_BROADCAST: i64 = 0;
pub const NB_PAYLOAD_SIZE: usize = PAYLOAD_SIZE;

/// A delivered notification, owned by the receiver.
///
/// Allocated by the library; release with `nbroker_message_free`.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct NbMessage {
    /// Raw send discriminator: 0, a pid, or a negative channel.
    pub channel: i64,
    /// Process id of the sender.
    pub sender: i32,
    /// Number of meaningful bytes in `data`.
    pub len: u32,
    /// Payload, zero padded.
    pub data: [u8; PAYLOAD_SIZE],
}

impl NbMessage {
    pub(crate) fn from_message(message: &Message) -> Self {
        let payload = message.payload();
        let mut data = [0u8; PAYLOAD_SIZE];
        data[..payload.len()].copy_from_slice(payload);
        Self {
            channel: message.channel(),
            sender: message.sender(),
            len: payload.len() as u32,
            data,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        let len = (self.len as usize).min(PAYLOAD_SIZE);
        &self.data[..len]
    }
}

/// Notification callback. Receives ownership of `message`.
pub type NbHandler = Option<unsafe extern "C" fn(message: *mut NbMessage, user_data: *mut c_void)>;

/// Opaque caller pointer carried to the delivery thread.
#[derive(Clone, Copy)]
pub(crate) struct UserData(pub(crate) *mut c_void);

// SAFETY: the pointer is never dereferenced by the library; the caller
// guarantees it is usable from the delivery thread.
unsafe impl Send for UserData {}
// SAFETY: see above.
unsafe impl Sync for UserData {}
