//! Local inter-process notification broker.
//!
//! Processes on one host share named notification spaces ("instances").
//! Each instance keeps a registry of subscribed processes and a transport of
//! undelivered messages. A message can be broadcast to every subscriber,
//! unicast to one process, or multicast to every subscriber of a channel;
//! recipients are woken by a signal and handle messages on a background thread.
//!
//! # Crate Structure
//!
//! - [`broker`]: instance lifecycle, subscription, send and delivery
//! - [`frame`]: messages, send targets and the envelope codec
//! - [`sysv`]: System V shared memory, message queues and signalling

/// Re-export broker operations.
pub mod broker {
    pub use nbroker_core::*;
}

/// Re-export message types.
pub mod frame {
    pub use nbroker_frame::*;
}

/// Re-export kernel primitives.
pub mod sysv {
    pub use nbroker_sysv::*;
}

pub use nbroker_core::{
    close, create, create_with_config, open, remove, send, subscribe, BrokerConfig, BrokerError,
    BrokerHandle, ErrorKind, IpcKey, Message, Target,
};
