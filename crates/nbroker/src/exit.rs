use std::fmt;
use std::io;

use nbroker_core::{BrokerError, ErrorKind};
use nbroker_sysv::SysvError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const NOT_FOUND: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const USAGE: i32 = 64;
pub const UNAVAILABLE: i32 = 69;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::NotFound => NOT_FOUND,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn broker_error(context: &str, err: BrokerError) -> CliError {
    if let BrokerError::Sysv(SysvError::Os { source, .. }) = &err {
        if source.kind() == io::ErrorKind::PermissionDenied {
            return CliError::new(PERMISSION_DENIED, format!("{context}: {err}"));
        }
    }

    let code = match err.kind() {
        ErrorKind::AlreadyExists => FAILURE,
        ErrorKind::NotFound => NOT_FOUND,
        ErrorKind::InvalidArgument => USAGE,
        ErrorKind::NoSubscribers | ErrorKind::RecipientUnreachable => UNAVAILABLE,
        ErrorKind::ResourceExhausted => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use nbroker_core::{IpcKey, Target};

    use super::*;

    #[test]
    fn broker_errors_map_to_exit_codes() {
        let key = IpcKey::new(0x1234);
        assert_eq!(
            broker_error("open", BrokerError::InstanceNotFound { key }).code,
            NOT_FOUND
        );
        assert_eq!(
            broker_error("create", BrokerError::AlreadyExists { key }).code,
            FAILURE
        );
        assert_eq!(
            broker_error(
                "send",
                BrokerError::NoSubscribers {
                    target: Target::Broadcast
                }
            )
            .code,
            UNAVAILABLE
        );
        assert_eq!(broker_error("send", BrokerError::QueueFull).code, TRANSPORT_ERROR);
    }

    #[test]
    fn permission_denied_is_reported_as_such() {
        let err = BrokerError::Sysv(SysvError::Os {
            op: "shmget",
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });
        assert_eq!(broker_error("open", err).code, PERMISSION_DENIED);
    }
}
