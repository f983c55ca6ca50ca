//! Error classification with recovery guidance.
//!
//! Adapter failures are folded into a closed [`ErrorKind`] taxonomy. Each
//! kind has a fixed message and a fixed, ordered list of recovery steps, so
//! callers never have to branch on transport-specific status codes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AdapterError, FailureKind};
use crate::error::{IngestError, ValidationError};

/// Error taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential rejected or expired.
    Auth,
    /// Authenticated but forbidden.
    Permission,
    /// Table or file absent.
    NotFound,
    /// The remote system failed.
    Server,
    /// Unreachable, network failure or timeout.
    Connection,
    /// Local configuration problem.
    Validation,
}

impl ErrorKind {
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "Authentication failed",
            ErrorKind::Permission => "Access denied",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Server => "Server error",
            ErrorKind::Connection => "Cannot connect to server",
            ErrorKind::Validation => "Invalid configuration",
        }
    }

    pub fn recovery_steps(&self) -> &'static [&'static str] {
        match self {
            ErrorKind::Auth => &[
                "Check your access token",
                "Verify your credentials",
                "Ensure the token is not expired",
            ],
            ErrorKind::Permission => &[
                "Check your permissions",
                "Verify database access",
                "Contact your administrator",
            ],
            ErrorKind::NotFound => &[
                "Verify the table or file exists",
                "Check the database name or file path",
                "Ensure the resource is accessible",
            ],
            ErrorKind::Server => &[
                "Try again later",
                "Check server logs",
                "Contact your administrator",
            ],
            ErrorKind::Connection => &[
                "Check the server is running",
                "Verify network connection",
                "Check firewall settings",
            ],
            ErrorKind::Validation => &[
                "Review the transfer configuration",
                "Correct the reported field and retry",
            ],
        }
    }
}

impl From<FailureKind> for ErrorKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Unauthorized => ErrorKind::Auth,
            FailureKind::Forbidden => ErrorKind::Permission,
            FailureKind::NotFound => ErrorKind::NotFound,
            FailureKind::Server => ErrorKind::Server,
            FailureKind::Unreachable | FailureKind::Timeout => ErrorKind::Connection,
        }
    }
}

/// A classified failure, as surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub recovery_steps: Vec<String>,
    /// Underlying failure text from the adapter.
    pub detail: String,
    /// Captured at classification time.
    pub timestamp: DateTime<Utc>,
    /// Rows committed to the target before the failure, for session failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_committed: Option<u64>,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
            recovery_steps: kind.recovery_steps().iter().map(|s| s.to_string()).collect(),
            detail: detail.into(),
            timestamp: Utc::now(),
            records_committed: None,
        }
    }

    pub fn with_records_committed(mut self, records: u64) -> Self {
        self.records_committed = Some(records);
        self
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.message, self.detail)
        }
    }
}

/// Classify an adapter failure.
pub fn classify(err: &AdapterError) -> ErrorReport {
    ErrorReport::new(err.kind.into(), err.detail.clone())
}

/// Report for a local validation failure.
pub fn validation_report(err: &ValidationError) -> ErrorReport {
    ErrorReport::new(ErrorKind::Validation, err.to_string())
}

/// Report for any engine error, for storage in a failed session.
pub fn report_for(err: &IngestError) -> ErrorReport {
    match err {
        IngestError::Classified(report) => report.clone(),
        IngestError::Validation(v) => validation_report(v),
        IngestError::Config(message) => ErrorReport::new(ErrorKind::Validation, message.clone()),
        IngestError::Io(io) => classify(&AdapterError::from(std::io::Error::new(
            io.kind(),
            io.to_string(),
        ))),
        other => ErrorReport::new(ErrorKind::Server, other.to_string()),
    }
}

impl From<AdapterError> for IngestError {
    fn from(err: AdapterError) -> Self {
        IngestError::Classified(classify(&err))
    }
}
