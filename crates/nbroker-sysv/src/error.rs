use std::path::PathBuf;

/// Errors that can occur in System V IPC operations.
#[derive(Debug, thiserror::Error)]
pub enum SysvError {
    /// A kernel object with this key already exists.
    #[error("{object} already exists for key {key:#x}")]
    AlreadyExists { object: &'static str, key: i32 },

    /// No kernel object exists for this key.
    #[error("no {object} exists for key {key:#x}")]
    NotFound { object: &'static str, key: i32 },

    /// The kernel object was removed while still in use.
    #[error("{object} {id} has been removed")]
    Removed { object: &'static str, id: i32 },

    /// The message queue cannot accept more messages right now.
    #[error("message queue {id} is full")]
    QueueFull { id: i32 },

    /// The message body exceeds the queue buffer.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The path cannot be used to derive a key.
    #[error("cannot derive key from {path}: {source}")]
    InvalidPath {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A system call failed.
    #[error("{op} failed: {source}")]
    Os {
        op: &'static str,
        source: std::io::Error,
    },

    /// The target process could not be signaled.
    #[error("cannot signal process {pid}: {source}")]
    Signal { pid: i32, source: std::io::Error },
}

impl SysvError {
    pub(crate) fn last_os(op: &'static str) -> Self {
        Self::Os {
            op,
            source: std::io::Error::last_os_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SysvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_hex_key() {
        let err = SysvError::NotFound {
            object: "message queue",
            key: 0x2a,
        };
        assert_eq!(err.to_string(), "no message queue exists for key 0x2a");
    }
}
