//! Archival of released sessions.
//!
//! When a caller releases a terminal session, the engine hands its final
//! report to a [`SessionArchive`]:
//!
//! - [`NoOpArchive`]: discards records (default)
//! - [`JsonFileArchive`]: appends one JSON line per record

mod file;
mod noop;

pub use file::JsonFileArchive;
pub use noop::NoOpArchive;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ErrorReport;
use crate::error::Result;
use crate::transfer::{ProgressReport, SessionId, TransferState};

/// Final record of a released session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub state: TransferState,
    /// `EndpointConfig::describe` of the source.
    pub source: String,
    pub target: String,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_fingerprint: Option<String>,
    pub records_processed: u64,
    pub bytes_transferred: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
    pub released_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn from_report(
        report: &ProgressReport,
        source: &str,
        target: &str,
        columns: &[String],
        join_fingerprint: Option<&str>,
    ) -> Self {
        Self {
            session_id: report.session_id.clone(),
            state: report.state,
            source: source.to_string(),
            target: target.to_string(),
            columns: columns.to_vec(),
            join_fingerprint: join_fingerprint.map(str::to_string),
            records_processed: report.records_processed,
            bytes_transferred: report.bytes_transferred,
            started_at: report.started_at,
            elapsed_seconds: report.elapsed_seconds,
            error: report.error.clone(),
            released_at: Utc::now(),
        }
    }
}

/// Storage for released session records.
///
/// Implementations must be `Send + Sync`; the engine shares one archive
/// across all sessions.
#[async_trait]
pub trait SessionArchive: Send + Sync {
    /// Persist one record.
    async fn store(&self, record: &SessionRecord) -> Result<()>;

    /// Get the backend type name for logging.
    fn backend_type(&self) -> &'static str;
}
