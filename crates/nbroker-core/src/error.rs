use nbroker_frame::{FrameError, Target};
use nbroker_sysv::{IpcKey, SysvError};
use serde::Serialize;

use crate::directory::BrokerHandle;

/// Coarse failure categories every broker error falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidArgument,
    NoSubscribers,
    ResourceExhausted,
    RecipientUnreachable,
}

/// Errors that can occur in broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// An instance (or half of one) already exists for this key.
    #[error("broker instance {key} already exists")]
    AlreadyExists { key: IpcKey },

    /// No instance exists for this key.
    #[error("no broker instance exists for key {key}")]
    InstanceNotFound { key: IpcKey },

    /// The handle was never opened by this process, or has been closed.
    #[error("handle {handle} is not open in this process")]
    HandleNotOpen { handle: BrokerHandle },

    /// Only negative channels can be subscribed to.
    #[error("channel {channel} cannot be subscribed to (channels must be negative)")]
    InvalidChannel { channel: i64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The send resolved to an empty recipient set.
    #[error("no subscribers for {target}")]
    NoSubscribers { target: Target },

    /// Every registry slot is taken.
    #[error("registry is full ({capacity} slots)")]
    RegistryFull { capacity: usize },

    /// The transport cannot accept more envelopes right now.
    #[error("transport queue is full")]
    QueueFull,

    /// Some recipients could not be notified. Envelopes for the others were kept.
    #[error(
        "{} recipient(s) unreachable, {delivered} delivered: {unreachable:?}",
        .unreachable.len()
    )]
    RecipientUnreachable {
        unreachable: Vec<i32>,
        delivered: usize,
    },

    /// The shared segment for this key does not hold a broker registry.
    #[error("registry segment is corrupt: {0}")]
    Corrupt(String),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("ipc error: {0}")]
    Sysv(SysvError),
}

impl From<SysvError> for BrokerError {
    fn from(err: SysvError) -> Self {
        match err {
            SysvError::QueueFull { .. } => Self::QueueFull,
            other => Self::Sysv(other),
        }
    }
}

impl BrokerError {
    /// The category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::InstanceNotFound { .. } | Self::HandleNotOpen { .. } => ErrorKind::NotFound,
            Self::InvalidChannel { .. }
            | Self::InvalidArgument(_)
            | Self::Corrupt(_)
            | Self::Frame(_) => ErrorKind::InvalidArgument,
            Self::NoSubscribers { .. } => ErrorKind::NoSubscribers,
            Self::RegistryFull { .. } | Self::QueueFull => ErrorKind::ResourceExhausted,
            Self::RecipientUnreachable { .. } => ErrorKind::RecipientUnreachable,
            Self::Sysv(err) => match err {
                SysvError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
                SysvError::NotFound { .. } | SysvError::Removed { .. } => ErrorKind::NotFound,
                SysvError::MessageTooLarge { .. } | SysvError::InvalidPath { .. } => {
                    ErrorKind::InvalidArgument
                }
                SysvError::Signal { .. } => ErrorKind::RecipientUnreachable,
                SysvError::QueueFull { .. } | SysvError::Os { .. } => {
                    ErrorKind::ResourceExhausted
                }
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_full_converts_to_resource_exhausted() {
        let err: BrokerError = SysvError::QueueFull { id: 1 }.into();
        assert!(matches!(err, BrokerError::QueueFull));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn removed_object_is_not_found() {
        let err: BrokerError = SysvError::Removed {
            object: "message queue",
            id: 9,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn unreachable_display_counts_recipients() {
        let err = BrokerError::RecipientUnreachable {
            unreachable: vec![11, 12],
            delivered: 3,
        };
        assert_eq!(
            err.to_string(),
            "2 recipient(s) unreachable, 3 delivered: [11, 12]"
        );
        assert_eq!(err.kind(), ErrorKind::RecipientUnreachable);
    }

    #[test]
    fn kinds_for_argument_errors() {
        assert_eq!(
            BrokerError::InvalidChannel { channel: 3 }.kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            BrokerError::NoSubscribers {
                target: Target::Broadcast
            }
            .kind(),
            ErrorKind::NoSubscribers
        );
    }
}
