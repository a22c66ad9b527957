//! Send targets.
//!
//! A send is addressed by one signed discriminator:
//! - `0` broadcasts to every subscriber
//! - a positive value unicasts to the subscriber with that process id
//! - a negative value multicasts to every subscriber of that channel
//!
//! Because zero and positive values are taken by broadcast and unicast,
//! only negative numbers are valid subscription channels.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};

/// Raw discriminator for a broadcast send.
pub const BROADCAST: i64 = 0;

/// Resolved meaning of a send discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum Target {
    /// Every current subscriber.
    Broadcast,
    /// The subscriber with this process id.
    Unicast(i32),
    /// Every subscriber of this (negative) channel.
    Multicast(i64),
}

impl Target {
    /// Interpret a raw signed discriminator.
    pub fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            0 => Ok(Self::Broadcast),
            pid if pid > 0 => i32::try_from(pid)
                .map(Self::Unicast)
                .map_err(|_| FrameError::InvalidTarget(raw)),
            channel => Ok(Self::Multicast(channel)),
        }
    }

    /// Unicast to `pid`, which must be positive.
    pub fn unicast(pid: i32) -> Result<Self> {
        if pid <= 0 {
            return Err(FrameError::InvalidTarget(i64::from(pid)));
        }
        Ok(Self::Unicast(pid))
    }

    /// Multicast to `channel`, which must be negative.
    pub fn multicast(channel: i64) -> Result<Self> {
        if !is_channel(channel) {
            return Err(FrameError::InvalidTarget(channel));
        }
        Ok(Self::Multicast(channel))
    }

    /// The raw signed discriminator.
    pub fn as_raw(self) -> i64 {
        match self {
            Self::Broadcast => BROADCAST,
            Self::Unicast(pid) => i64::from(pid),
            Self::Multicast(channel) => channel,
        }
    }

    pub fn mode_name(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Unicast(_) => "unicast",
            Self::Multicast(_) => "multicast",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::Unicast(pid) => write!(f, "unicast to pid {pid}"),
            Self::Multicast(channel) => write!(f, "multicast to channel {channel}"),
        }
    }
}

/// Returns true if `label` may be used as a subscription channel.
pub fn is_channel(label: i64) -> bool {
    label < 0
}
