use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::{Message, PAYLOAD_SIZE};

/// Header: magic (2) + channel (8) + sender (4) + length (2) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Fixed size of every encoded envelope body.
pub const BODY_SIZE: usize = HEADER_SIZE + PAYLOAD_SIZE;

/// Magic bytes: "NB" (0x4e 0x42).
pub const MAGIC: [u8; 2] = [0x4e, 0x42];

/// Encode a message into a fixed-size envelope body.
///
/// Wire format:
/// ```text
/// ┌────────────┬─────────────┬────────────┬──────────┬──────────────────────┐
/// │ Magic (2B) │ Channel     │ Sender     │ Length   │ Payload (256B,       │
/// │ "NB"       │ (8B LE i64) │ (4B LE i32)│ (2B LE)  │  zero padded)        │
/// └────────────┴─────────────┴────────────┴──────────┴──────────────────────┘
/// ```
pub fn encode_body(message: &Message, dst: &mut BytesMut) {
    let payload = message.payload();
    dst.reserve(BODY_SIZE);
    dst.put_slice(&MAGIC);
    dst.put_i64_le(message.channel());
    dst.put_i32_le(message.sender());
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
    dst.put_bytes(0, PAYLOAD_SIZE - payload.len());
}

/// Decode an envelope body produced by [`encode_body`].
pub fn decode_body(src: &[u8]) -> Result<Message> {
    if src.len() < BODY_SIZE {
        return Err(FrameError::Truncated {
            size: src.len(),
            expected: BODY_SIZE,
        });
    }

    let mut buf = src;
    if buf[..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }
    buf.advance(2);

    let channel = buf.get_i64_le();
    let sender = buf.get_i32_le();
    let len = usize::from(buf.get_u16_le());
    if len > PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: PAYLOAD_SIZE,
        });
    }

    let payload = Bytes::copy_from_slice(&buf[..len]);
    Ok(Message::from_parts(channel, sender, payload))
}
