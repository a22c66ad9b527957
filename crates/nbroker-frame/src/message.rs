use bytes::Bytes;

use crate::error::Result;
use crate::target::Target;

/// Maximum payload carried by one message. Longer input is truncated.
pub const PAYLOAD_SIZE: usize = 256;

/// An immutable notification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    channel: i64,
    sender: i32,
    payload: Bytes,
}

impl Message {
    /// Build a message, truncating `payload` to [`PAYLOAD_SIZE`] bytes.
    ///
    /// `channel` is the raw send discriminator the message was sent with and
    /// `sender` the sending process id.
    pub fn new(channel: i64, sender: i32, payload: impl AsRef<[u8]>) -> Self {
        let payload = payload.as_ref();
        let len = payload.len().min(PAYLOAD_SIZE);
        Self {
            channel,
            sender,
            payload: Bytes::copy_from_slice(&payload[..len]),
        }
    }

    pub(crate) fn from_parts(channel: i64, sender: i32, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= PAYLOAD_SIZE);
        Self {
            channel,
            sender,
            payload,
        }
    }

    /// Raw send discriminator (0, a process id, or a negative channel).
    pub fn channel(&self) -> i64 {
        self.channel
    }

    /// Process id of the sender.
    pub fn sender(&self) -> i32 {
        self.sender
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// How the message was addressed.
    pub fn target(&self) -> Result<Target> {
        Target::from_raw(self.channel)
    }
}

/// A message tagged with the process id it is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    recipient: i32,
    message: Message,
}

impl Envelope {
    pub fn new(recipient: i32, message: Message) -> Self {
        Self { recipient, message }
    }

    /// Process id that may claim this envelope.
    pub fn recipient(&self) -> i32 {
        self.recipient
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}
