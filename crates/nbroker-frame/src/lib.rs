//! Fixed-size notification messages and their envelope encoding.
//!
//! Every envelope body placed on the transport is exactly [`BODY_SIZE`] bytes:
//! - A 2-byte magic number ("NB") for sanity checking
//! - The 8-byte little-endian send discriminator (see [`Target`])
//! - The 4-byte little-endian sender process id
//! - A 2-byte little-endian payload length
//! - [`PAYLOAD_SIZE`] payload bytes, zero padded
//!
//! The recipient selector is not part of the body; the transport carries it
//! as the message tag.

pub mod codec;
pub mod error;
pub mod message;
pub mod target;

pub use codec::{decode_body, encode_body, BODY_SIZE, HEADER_SIZE, MAGIC};
pub use error::{FrameError, Result};
pub use message::{Envelope, Message, PAYLOAD_SIZE};
pub use target::{is_channel, Target, BROADCAST};
