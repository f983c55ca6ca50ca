//! Ingest engine: the caller-facing verbs and the active-session registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::AdapterCatalog;
use crate::archive::{JsonFileArchive, NoOpArchive, SessionArchive, SessionRecord};
use crate::classify::{classify, ErrorReport};
use crate::config::validation::{
    validate_columns, validate_endpoint, validate_location, validate_pair,
};
use crate::config::{Config, EngineConfig, SourceConfig, TargetConfig};
use crate::core::{CallContext, ColumnDescriptor, CredentialSupplier, StaticCredential, TargetSystem};
use crate::error::{IngestError, Result, ValidationError};
use crate::join::{JoinPlan, JoinSpec};
use crate::preview::{self, Preview};
use crate::schema;
use crate::transfer::{ProgressReport, SessionId, SessionRunner, TransferSession};

/// Result of probing source and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<ErrorReport>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<ErrorReport>,
    pub healthy: bool,
}

/// Orchestrates schema resolution, previews and transfer sessions.
///
/// Sessions share nothing but this registry. Every terminal session stays
/// queryable until [`IngestEngine::release`] is called for it.
pub struct IngestEngine {
    catalog: Arc<AdapterCatalog>,
    credentials: Arc<dyn CredentialSupplier>,
    config: EngineConfig,
    sessions: RwLock<HashMap<SessionId, TransferSession>>,
    archive: Arc<dyn SessionArchive>,
}

impl IngestEngine {
    /// Engine with the built-in adapters, no bearer supplier and, when
    /// `archive_path` is set, a JSON-lines archive.
    pub fn new(config: EngineConfig) -> Self {
        let archive: Arc<dyn SessionArchive> = match &config.archive_path {
            Some(path) => Arc::new(JsonFileArchive::new(path.clone())),
            None => Arc::new(NoOpArchive::new()),
        };
        Self {
            catalog: Arc::new(AdapterCatalog::with_builtins()),
            credentials: Arc::new(StaticCredential::none()),
            config,
            sessions: RwLock::new(HashMap::new()),
            archive,
        }
    }

    /// Engine configured from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.engine.clone())
    }

    pub fn with_catalog(mut self, catalog: AdapterCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSupplier>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn SessionArchive>) -> Self {
        self.archive = archive;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Context carrying the supplier's bearer value. Adapters fall back to
    /// their configured credential when it is absent.
    fn context(&self) -> CallContext {
        CallContext::new(self.credentials.bearer())
    }

    /// Probe source and target connectivity.
    pub async fn check_connections(
        &self,
        source: &SourceConfig,
        target: &TargetConfig,
    ) -> Result<HealthCheckResult> {
        validate_location("source", source)?;
        validate_endpoint("target", target)?;

        let source_adapter = self.catalog.source(source, &self.config)?;
        let target_adapter = self.catalog.target(target, &self.config)?;
        let ctx = self.context();

        let start = Instant::now();
        let source_result = source_adapter.check_connection(&ctx).await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target_result = target_adapter.check_connection(&ctx).await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        let result = HealthCheckResult {
            source_connected: source_result.is_ok(),
            source_latency_ms,
            source_error: source_result.err().as_ref().map(classify),
            target_connected: target_result.is_ok(),
            target_latency_ms,
            target_error: target_result.err().as_ref().map(classify),
            healthy: false,
        };
        Ok(HealthCheckResult {
            healthy: result.source_connected && result.target_connected,
            ..result
        })
    }

    /// Tables the source can read. A flat file presents one table named
    /// after its file stem.
    pub async fn list_tables(&self, source: &SourceConfig) -> Result<Vec<String>> {
        validate_location("source", source)?;
        let adapter = self.catalog.source(source, &self.config)?;
        let mut tables = adapter.list_tables(&self.context()).await?;
        tables.sort();
        debug!("Listed {} tables from {}", tables.len(), source.describe());
        Ok(tables)
    }

    /// Unified column list of a table or join.
    pub async fn resolve_schema(
        &self,
        source: &SourceConfig,
        join: Option<&JoinSpec>,
    ) -> Result<Vec<ColumnDescriptor>> {
        validate_endpoint("source", source)?;
        let plan = plan_for(source, join)?;
        let scope = schema::read_scope(source, plan.as_ref())?;

        let adapter = self.catalog.source(source, &self.config)?;
        let columns = schema::resolve(adapter.as_ref(), &self.context(), &scope).await?;
        info!("Resolved {} columns from {}", columns.len(), source.describe());
        Ok(columns)
    }

    /// Sample selected columns, checked against the opposite system.
    pub async fn preview(
        &self,
        source: &SourceConfig,
        columns: &[String],
        join: Option<&JoinSpec>,
    ) -> Result<Preview> {
        self.preview_for_target(source, columns, join, source.system().opposite())
            .await
    }

    /// Sample selected columns, checked against `target`.
    pub async fn preview_for_target(
        &self,
        source: &SourceConfig,
        columns: &[String],
        join: Option<&JoinSpec>,
        target: TargetSystem,
    ) -> Result<Preview> {
        validate_endpoint("source", source)?;
        validate_columns(columns)?;
        let plan = plan_for(source, join)?;
        let scope = schema::read_scope(source, plan.as_ref())?;

        let adapter = self.catalog.source(source, &self.config)?;
        let ctx = self.context();
        let resolved = schema::resolve(adapter.as_ref(), &ctx, &scope).await?;

        preview::sample(
            adapter.as_ref(),
            &ctx,
            scope,
            &resolved,
            columns,
            self.config.sample_size,
            target,
        )
        .await
    }

    /// Validate the request and start a session in the background.
    ///
    /// Not idempotent: every call creates a new session.
    pub async fn start_transfer(
        &self,
        source: SourceConfig,
        target: TargetConfig,
        columns: Vec<String>,
        join: Option<JoinSpec>,
    ) -> Result<SessionId> {
        validate_endpoint("source", &source)?;
        validate_endpoint("target", &target)?;
        validate_pair(&source, &target)?;
        validate_columns(&columns)?;
        let plan = plan_for(&source, join.as_ref())?;
        // Multi-table database sources without a join are rejected here too.
        schema::read_scope(&source, plan.as_ref())?;

        let id = SessionId::generate();
        let ctx = self.context();
        info!(
            "Starting session {}: {} -> {} ({} columns)",
            id,
            source.describe(),
            target.describe(),
            columns.len()
        );

        let session = SessionRunner::new(
            self.catalog.clone(),
            self.config.clone(),
            source,
            target,
            columns,
            plan,
            ctx,
        )
        .spawn(id.clone());

        self.sessions.write().await.insert(id.clone(), session);
        Ok(id)
    }

    /// Current progress of a session.
    pub async fn get_progress(&self, id: &SessionId) -> Result<ProgressReport> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| IngestError::SessionNotFound(id.to_string()))?;
        Ok(session.report())
    }

    /// Request cancellation; takes effect at the next batch boundary.
    pub async fn cancel(&self, id: &SessionId) -> Result<()> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(id)
            .ok_or_else(|| IngestError::SessionNotFound(id.to_string()))?;
        session.cancel()?;
        warn!("Cancellation requested for session {}", id);
        Ok(())
    }

    /// Wait until the session reaches a terminal state.
    pub async fn wait(&self, id: &SessionId) -> Result<ProgressReport> {
        let mut progress = {
            let sessions = self.sessions.read().await;
            sessions
                .get(id)
                .ok_or_else(|| IngestError::SessionNotFound(id.to_string()))?
                .subscribe()
        };

        loop {
            let snapshot = progress.borrow_and_update().clone();
            if snapshot.state.is_terminal() {
                return Ok(ProgressReport::from_snapshot(id.clone(), &snapshot));
            }
            if progress.changed().await.is_err() {
                // Runner gone without a terminal state; report what is left.
                let snapshot = progress.borrow().clone();
                return Ok(ProgressReport::from_snapshot(id.clone(), &snapshot));
            }
        }
    }

    /// Remove a terminal session from the registry and archive it.
    pub async fn release(&self, id: &SessionId) -> Result<ProgressReport> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get(id)
                .ok_or_else(|| IngestError::SessionNotFound(id.to_string()))?;
            let state = session.state();
            if !state.is_terminal() {
                return Err(IngestError::SessionActive {
                    id: id.to_string(),
                    state,
                });
            }
            sessions
                .remove(id)
                .ok_or_else(|| IngestError::SessionNotFound(id.to_string()))?
        };

        let report = session.report();
        let record = SessionRecord::from_report(
            &report,
            session.source(),
            session.target(),
            session.columns(),
            session.join_fingerprint(),
        );
        if let Err(e) = self.archive.store(&record).await {
            warn!(
                "Failed to archive session {} ({}): {}",
                id,
                self.archive.backend_type(),
                e
            );
        }
        debug!("Released session {}", id);
        Ok(report)
    }

    /// Ids of every session still in the registry.
    pub async fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Validate a join spec for `source` and build its plan.
fn plan_for(source: &SourceConfig, join: Option<&JoinSpec>) -> Result<Option<JoinPlan>> {
    match join {
        None => Ok(None),
        Some(_) if source.system() == TargetSystem::FlatFile => {
            Err(ValidationError::JoinOnFlatFile.into())
        }
        Some(spec) => Ok(Some(spec.plan()?)),
    }
}
