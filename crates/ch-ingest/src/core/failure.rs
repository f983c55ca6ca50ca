//! Raw adapter failures, before classification.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What went wrong at the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Credential rejected or expired.
    Unauthorized,
    /// Authenticated but not allowed.
    Forbidden,
    /// Table, file or column does not exist.
    NotFound,
    /// The remote system reported an internal failure.
    Server,
    /// The remote system could not be reached.
    Unreachable,
    /// The call did not complete in time.
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Forbidden => "forbidden",
            FailureKind::NotFound => "not found",
            FailureKind::Server => "server failure",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

/// Failure returned by a source or target adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct AdapterError {
    pub kind: FailureKind,
    pub detail: String,
}

/// Result type for adapter calls.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

impl AdapterError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, detail)
    }

    pub fn server(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Server, detail)
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Unreachable, detail)
    }

    /// Map an HTTP-like status code and response body to a failure.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 => FailureKind::Unauthorized,
            403 => FailureKind::Forbidden,
            404 => FailureKind::NotFound,
            408 | 504 => FailureKind::Timeout,
            _ => FailureKind::Server,
        };
        let body = body.trim();
        let detail = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };
        Self::new(kind, detail)
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::NotFound => FailureKind::NotFound,
            ErrorKind::PermissionDenied => FailureKind::Forbidden,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::AddrNotAvailable
            | ErrorKind::BrokenPipe => FailureKind::Unreachable,
            ErrorKind::TimedOut => FailureKind::Timeout,
            _ => FailureKind::Server,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<csv::Error> for AdapterError {
    fn from(err: csv::Error) -> Self {
        if !err.is_io_error() {
            return Self::server(format!("malformed flat file: {}", err));
        }
        match err.into_kind() {
            csv::ErrorKind::Io(io) => io.into(),
            _ => Self::server("flat file I/O failure"),
        }
    }
}
