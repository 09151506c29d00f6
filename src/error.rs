use core::result;
use std::io;

use nix::{errno::Errno, libc};
use thiserror::Error;

/// A helper type for wrapping a [result::Result] such that we can reduce noise in our signatures.
pub type Result<T> = result::Result<T, Error>;

/// An error representing a failure issuing, resolving or configuring queue operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation on a closed, released or unknown handle")]
    InvalidHandle,
    #[error("no definitive result after {attempts} poll attempts")]
    Timeout { attempts: usize },
    #[error("connection aborted by peer")]
    ConnectionAborted,
    #[error("connection reset by peer")]
    ConnectionReset,
    #[error("failed to parse config: {0}")]
    Config(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("encountered unexpected IO error: {0}")]
    IO(#[source] io::Error),
}

impl Error {
    /// Map a raw OS error number onto the matching error kind, falling back to [Error::IO].
    pub fn from_errno(errno: i32) -> Error {
        match errno {
            libc::ECONNRESET => Error::ConnectionReset,
            libc::ECONNABORTED => Error::ConnectionAborted,
            libc::EBADF => Error::InvalidHandle,
            libc::EINVAL => Error::InvalidArgument(io::Error::from_raw_os_error(errno).to_string()),
            libc::ENOMEM | libc::ENOBUFS => {
                Error::ResourceExhausted(io::Error::from_raw_os_error(errno).to_string())
            }
            _ => Error::IO(io::Error::from_raw_os_error(errno)),
        }
    }

    /// Whether this error reports that the peer terminated the connection. These are delivered as
    /// definitive results and never retried.
    pub fn is_connection_terminated(&self) -> bool {
        matches!(self, Error::ConnectionAborted | Error::ConnectionReset)
    }

    /// Whether this error is the bounded wait running out of attempts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

impl From<i32> for Error {
    fn from(value: i32) -> Self {
        Error::from_errno(value)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        match value.raw_os_error() {
            Some(errno) => Error::from_errno(errno),
            None => Error::IO(value),
        }
    }
}

impl From<Errno> for Error {
    fn from(value: Errno) -> Self {
        Error::from_errno(value as i32)
    }
}

impl From<config::ConfigError> for Error {
    fn from(value: config::ConfigError) -> Self {
        Error::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert!(matches!(Error::from(libc::ECONNRESET), Error::ConnectionReset));
        assert!(matches!(Error::from(libc::ECONNABORTED), Error::ConnectionAborted));
        assert!(matches!(Error::from(libc::EBADF), Error::InvalidHandle));
        assert!(matches!(Error::from(libc::ENOBUFS), Error::ResourceExhausted(_)));
        assert!(matches!(Error::from(libc::EPIPE), Error::IO(_)));
        assert!(matches!(Error::from(Errno::EINVAL), Error::InvalidArgument(_)));
    }

    #[test]
    fn connection_terminated() {
        assert!(Error::ConnectionReset.is_connection_terminated());
        assert!(Error::ConnectionAborted.is_connection_terminated());
        assert!(!Error::InvalidHandle.is_connection_terminated());
        assert!(!Error::Timeout { attempts: 1 }.is_connection_terminated());
    }
}
