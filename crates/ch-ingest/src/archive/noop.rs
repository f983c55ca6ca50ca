//! Archive that keeps nothing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::{SessionArchive, SessionRecord};
use crate::error::Result;

/// Discards released sessions. Logs once on first use.
pub struct NoOpArchive {
    noted: AtomicBool,
}

impl NoOpArchive {
    pub fn new() -> Self {
        Self {
            noted: AtomicBool::new(false),
        }
    }

    fn note_once(&self) {
        if !self.noted.swap(true, Ordering::SeqCst) {
            debug!("No session archive configured: released sessions are discarded");
        }
    }
}

impl Default for NoOpArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionArchive for NoOpArchive {
    async fn store(&self, _record: &SessionRecord) -> Result<()> {
        self.note_once();
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "noop"
    }
}
