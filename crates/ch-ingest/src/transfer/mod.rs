//! Transfer sessions: state machine, counters and progress reports.
//!
//! A session's runner is the only writer of its [`SessionSnapshot`]; it
//! publishes a new snapshot over a `watch` channel after every committed
//! batch. Progress polls read the latest snapshot and never wait on the
//! batch loop.

mod session;

pub use session::{SessionRunner, TransferSession};

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ErrorReport;
use crate::core::TypeWarning;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random id.
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        SessionId(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        SessionId(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Created,
    Connecting,
    SchemaResolved,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Created => "created",
            TransferState::Connecting => "connecting",
            TransferState::SchemaResolved => "schema_resolved",
            TransferState::Transferring => "transferring",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Cancelled => "cancelled",
        }
    }

    /// Human-readable status line.
    pub fn status_text(&self) -> &'static str {
        match self {
            TransferState::Created => "Session created",
            TransferState::Connecting => "Connecting to source and target",
            TransferState::SchemaResolved => "Schema resolved",
            TransferState::Transferring => "Transferring data",
            TransferState::Completed => "Transfer completed",
            TransferState::Failed => "Transfer failed",
            TransferState::Cancelled => "Transfer cancelled",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest committed state of a session, as published by its runner.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: TransferState,
    pub operation: String,
    pub records_processed: u64,
    pub bytes_transferred: u64,
    pub estimated_total: Option<u64>,
    pub warnings: Vec<TypeWarning>,
    pub error: Option<ErrorReport>,
    pub started_at: DateTime<Utc>,
    started: Instant,
    finished_after: Option<Duration>,
}

impl SessionSnapshot {
    pub fn new() -> Self {
        Self {
            state: TransferState::Created,
            operation: "waiting to start".to_string(),
            records_processed: 0,
            bytes_transferred: 0,
            estimated_total: None,
            warnings: Vec::new(),
            error: None,
            started_at: Utc::now(),
            started: Instant::now(),
            finished_after: None,
        }
    }

    /// Time since start, frozen once the session is terminal.
    pub fn elapsed(&self) -> Duration {
        self.finished_after
            .unwrap_or_else(|| self.started.elapsed())
    }

    /// Move to `state`, freezing the clock on terminal states.
    pub fn enter(&mut self, state: TransferState, operation: impl Into<String>) {
        self.state = state;
        self.operation = operation.into();
        if state.is_terminal() && self.finished_after.is_none() {
            self.finished_after = Some(self.started.elapsed());
        }
    }

    /// Completion percentage derived from committed counters.
    ///
    /// `None` while the total is unknown; always 100 once completed.
    pub fn percentage(&self) -> Option<f64> {
        if self.state == TransferState::Completed {
            return Some(100.0);
        }
        match self.estimated_total {
            Some(0) => None,
            Some(total) => Some((self.records_processed as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }

    /// Estimated seconds remaining, defined only once progress is positive.
    pub fn eta(&self) -> Option<f64> {
        match self.state {
            TransferState::Completed => Some(0.0),
            TransferState::Transferring => match self.percentage() {
                Some(pct) if pct > 0.0 => {
                    Some(self.elapsed().as_secs_f64() * (100.0 - pct) / pct)
                }
                _ => None,
            },
            _ => None,
        }
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of a session, derived on each poll.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub session_id: SessionId,
    pub state: TransferState,
    /// 0-100, non-decreasing while running. `None` when the total is unknown.
    pub percentage: Option<f64>,
    pub status: String,
    pub current_operation: String,
    pub records_processed: u64,
    pub bytes_transferred: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_total: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    /// `None` until the first batch has committed.
    pub eta_seconds: Option<f64>,
    pub warnings: Vec<TypeWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl ProgressReport {
    pub fn from_snapshot(session_id: SessionId, snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id,
            state: snapshot.state,
            percentage: snapshot.percentage(),
            status: snapshot.state.status_text().to_string(),
            current_operation: snapshot.operation.clone(),
            records_processed: snapshot.records_processed,
            bytes_transferred: snapshot.bytes_transferred,
            estimated_total: snapshot.estimated_total,
            started_at: snapshot.started_at,
            elapsed_seconds: snapshot.elapsed().as_secs_f64(),
            eta_seconds: snapshot.eta(),
            warnings: snapshot.warnings.clone(),
            error: snapshot.error.clone(),
        }
    }

    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transferring(records: u64, total: Option<u64>) -> SessionSnapshot {
        let mut snap = SessionSnapshot::new();
        snap.enter(TransferState::Transferring, "writing");
        snap.records_processed = records;
        snap.estimated_total = total;
        snap
    }

    #[test]
    fn test_percentage_known_total() {
        assert_eq!(transferring(250, Some(1000)).percentage(), Some(25.0));
        assert_eq!(transferring(1500, Some(1000)).percentage(), Some(100.0));
    }

    #[test]
    fn test_percentage_indeterminate() {
        assert_eq!(transferring(250, None).percentage(), None);
        assert_eq!(transferring(0, Some(0)).percentage(), None);
    }

    #[test]
    fn test_completed_is_100_with_zero_eta() {
        let mut snap = transferring(10, None);
        snap.enter(TransferState::Completed, "done");
        assert_eq!(snap.percentage(), Some(100.0));
        assert_eq!(snap.eta(), Some(0.0));
    }

    #[test]
    fn test_eta_absent_before_first_batch() {
        assert_eq!(transferring(0, Some(1000)).eta(), None);
        assert!(transferring(100, Some(1000)).eta().is_some());

        let mut connecting = SessionSnapshot::new();
        connecting.enter(TransferState::Connecting, "checking");
        assert_eq!(connecting.eta(), None);
    }

    #[test]
    fn test_elapsed_frozen_when_terminal() {
        let mut snap = transferring(1, Some(2));
        snap.enter(TransferState::Failed, "failed");
        let first = snap.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(snap.elapsed(), first);
    }

    #[test]
    fn test_state_serde() {
        assert_eq!(
            serde_json::to_string(&TransferState::SchemaResolved).unwrap(),
            "\"schema_resolved\""
        );
        assert!(TransferState::Cancelled.is_terminal());
        assert!(!TransferState::Transferring.is_terminal());
    }
}
