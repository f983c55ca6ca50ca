//! Error types for the ingest library.

use thiserror::Error;

use crate::classify::{ErrorKind, ErrorReport};
use crate::transfer::TransferState;

/// Exit code for configuration and validation errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the source or target cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for rejected or insufficient credentials.
pub const EXIT_AUTH_ERROR: u8 = 3;
/// Exit code when a table or file does not exist.
pub const EXIT_NOT_FOUND: u8 = 4;
/// Exit code when the remote system failed.
pub const EXIT_SERVER_ERROR: u8 = 5;
/// Exit code for local file operations.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for unknown or misused sessions.
pub const EXIT_SESSION_ERROR: u8 = 8;
/// Exit code for a cancelled transfer (128 + SIGINT).
pub const EXIT_CANCELLED: u8 = 130;

/// Reasons a request is rejected before any adapter is contacted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A participating table has no join path to the others.
    #[error("table {table} is not connected to the other joined tables")]
    DisjointTable { table: String },

    /// Two edges join the same unordered pair of tables.
    #[error("duplicate join edge between {left} and {right}")]
    DuplicateEdge { left: String, right: String },

    /// An edge references a table outside the participating set.
    #[error("join edge references unknown table {table}")]
    UnknownTable { table: String },

    /// An edge joins a table with itself.
    #[error("table {table} cannot be joined with itself")]
    SelfJoin { table: String },

    #[error("at least one column must be selected")]
    EmptyColumnSelection,

    #[error("column {column} is selected more than once")]
    DuplicateColumn { column: String },

    /// A selected column is absent from the resolved schema.
    #[error("column {column} does not exist in the resolved schema")]
    UnknownColumn { column: String },

    #[error("joins are only supported for database sources")]
    JoinOnFlatFile,

    /// Any other malformed configuration field.
    #[error("{0}")]
    InvalidConfig(String),
}

/// Main error type for ingest operations.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Local validation failure, returned synchronously.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Adapter failure mapped onto the error taxonomy.
    #[error("{0}")]
    Classified(ErrorReport),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {id} is already {state}")]
    AlreadyTerminal { id: String, state: TransferState },

    #[error("Session {id} is still {state}")]
    SessionActive { id: String, state: TransferState },

    /// Configuration error (invalid YAML, missing file fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transfer cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    /// Shorthand for an [`ValidationError::InvalidConfig`] error.
    pub fn invalid(message: impl Into<String>) -> Self {
        IngestError::Validation(ValidationError::InvalidConfig(message.into()))
    }

    /// The classified report carried by this error, if any.
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            IngestError::Classified(report) => Some(report),
            _ => None,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            IngestError::Validation(_)
            | IngestError::Config(_)
            | IngestError::Yaml(_)
            | IngestError::Json(_) => EXIT_CONFIG_ERROR,
            IngestError::Classified(report) => match report.kind {
                ErrorKind::Validation => EXIT_CONFIG_ERROR,
                ErrorKind::Connection => EXIT_CONNECTION_ERROR,
                ErrorKind::Auth | ErrorKind::Permission => EXIT_AUTH_ERROR,
                ErrorKind::NotFound => EXIT_NOT_FOUND,
                ErrorKind::Server => EXIT_SERVER_ERROR,
            },
            IngestError::Io(_) => EXIT_IO_ERROR,
            IngestError::SessionNotFound(_)
            | IngestError::AlreadyTerminal { .. }
            | IngestError::SessionActive { .. } => EXIT_SESSION_ERROR,
            IngestError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain and recovery steps.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        if let IngestError::Classified(report) = self {
            if !report.detail.is_empty() {
                output.push_str(&format!("  Detail: {}\n", report.detail));
            }
            if let Some(committed) = report.records_committed {
                output.push_str(&format!("  Records committed: {}\n", committed));
            }
            if !report.recovery_steps.is_empty() {
                output.push_str("\nTry:\n");
                for (i, step) in report.recovery_steps.iter().enumerate() {
                    output.push_str(&format!("  {}. {}\n", i + 1, step));
                }
            }
        }

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for ingest operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use crate::core::AdapterError;

    #[test]
    fn test_validation_exit_code() {
        let err = IngestError::from(ValidationError::EmptyColumnSelection);
        assert_eq!(err.exit_code(), EXIT_CONFIG_ERROR);
    }

    #[test]
    fn test_classified_exit_codes() {
        let auth = IngestError::Classified(classify::classify(&AdapterError::from_status(401, "")));
        assert_eq!(auth.exit_code(), EXIT_AUTH_ERROR);

        let missing = IngestError::Classified(classify::classify(&AdapterError::from_status(404, "")));
        assert_eq!(missing.exit_code(), EXIT_NOT_FOUND);
    }

    #[test]
    fn test_format_detailed_lists_recovery_steps() {
        let err = IngestError::Classified(classify::classify(&AdapterError::from_status(
            401,
            "token expired",
        )));
        let text = err.format_detailed();
        assert!(text.contains("Authentication failed"));
        assert!(text.contains("1. "));
        assert!(text.contains("token expired"));
    }

    #[test]
    fn test_disjoint_table_message_names_table() {
        let err = ValidationError::DisjointTable {
            table: "t3".into(),
        };
        assert!(err.to_string().contains("t3"));
    }
}
