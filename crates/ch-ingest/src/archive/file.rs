//! JSON-lines archive file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{SessionArchive, SessionRecord};
use crate::error::{IngestError, Result};

/// Appends each record as one JSON line.
pub struct JsonFileArchive {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back, oldest first.
    pub async fn load_all(&self) -> Result<Vec<SessionRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(IngestError::from))
            .collect()
    }
}

#[async_trait]
impl SessionArchive for JsonFileArchive {
    async fn store(&self, record: &SessionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            "Archived session {} to {}",
            record.session_id,
            self.path.display()
        );
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "jsonl"
    }
}
