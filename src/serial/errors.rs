use crate::Error;
use serde::Serialize;
use std::fmt;
use std::io::ErrorKind;

/// High-level reason for a serial transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialFailureKind {
    PermissionDenied,
    DeviceMissing,
    Disconnected,
    Timeout,
    Busy,
    Config,
    Unknown,
}

impl SerialFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerialFailureKind::PermissionDenied => "permission_denied",
            SerialFailureKind::DeviceMissing => "device_missing",
            SerialFailureKind::Disconnected => "disconnected",
            SerialFailureKind::Timeout => "timeout",
            SerialFailureKind::Busy => "busy",
            SerialFailureKind::Config => "config",
            SerialFailureKind::Unknown => "unknown",
        }
    }

    /// Whether reopening the port later can help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SerialFailureKind::Config)
    }
}

impl fmt::Display for SerialFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn classify_error(err: &Error) -> SerialFailureKind {
    match err {
        Error::InvalidArgs(_) | Error::Parse(_) => SerialFailureKind::Config,
        Error::Io(io_err) => classify_io_error(io_err),
    }
}

pub fn classify_io_error(err: &std::io::Error) -> SerialFailureKind {
    match err.kind() {
        ErrorKind::PermissionDenied => SerialFailureKind::PermissionDenied,
        ErrorKind::NotFound => SerialFailureKind::DeviceMissing,
        ErrorKind::TimedOut | ErrorKind::WouldBlock => SerialFailureKind::Timeout,
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => SerialFailureKind::Disconnected,
        ErrorKind::InvalidInput => SerialFailureKind::Config,
        _ => match err.raw_os_error() {
            // EACCES, EBUSY, ENODEV/ENXIO, EIO, ETIMEDOUT
            Some(13) => SerialFailureKind::PermissionDenied,
            Some(16) => SerialFailureKind::Busy,
            Some(19) | Some(6) => SerialFailureKind::DeviceMissing,
            Some(5) => SerialFailureKind::Disconnected,
            Some(110) => SerialFailureKind::Timeout,
            _ => SerialFailureKind::Unknown,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_unplugged_gadget() {
        let eio = std::io::Error::from_raw_os_error(5);
        assert_eq!(classify_io_error(&eio), SerialFailureKind::Disconnected);
        let missing = std::io::Error::new(ErrorKind::NotFound, "gone");
        assert_eq!(classify_io_error(&missing), SerialFailureKind::DeviceMissing);
    }

    #[test]
    fn classify_crate_errors() {
        let err = Error::InvalidArgs("bad".into());
        assert_eq!(classify_error(&err), SerialFailureKind::Config);
        assert!(!classify_error(&err).is_retryable());
        let busy = Error::Io(std::io::Error::from_raw_os_error(16));
        assert_eq!(classify_error(&busy), SerialFailureKind::Busy);
        assert!(classify_error(&busy).is_retryable());
    }
}
