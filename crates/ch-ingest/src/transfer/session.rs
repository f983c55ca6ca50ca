//! One transfer session: a runner task driving the state machine and a
//! handle the engine keeps in its registry.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ProgressReport, SessionId, SessionSnapshot, TransferState};
use crate::adapters::AdapterCatalog;
use crate::classify::report_for;
use crate::config::{EngineConfig, SourceConfig, TargetConfig};
use crate::core::{
    AdapterResult, Batch, CallContext, Cursor, ReadRequest, SourceAdapter, TargetAdapter,
};
use crate::error::{IngestError, Result};
use crate::join::JoinPlan;
use crate::schema;
use crate::typemap;

/// Handle to a running or finished session.
pub struct TransferSession {
    id: SessionId,
    progress: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    source: String,
    target: String,
    columns: Vec<String>,
    join_fingerprint: Option<String>,
}

impl TransferSession {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.progress.borrow().clone()
    }

    pub fn state(&self) -> TransferState {
        self.progress.borrow().state
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport::from_snapshot(self.id.clone(), &self.progress.borrow())
    }

    /// Receiver for awaiting state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.progress.clone()
    }

    /// Request cancellation. Observed at the next batch boundary.
    pub fn cancel(&self) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(IngestError::AlreadyTerminal {
                id: self.id.to_string(),
                state,
            });
        }
        self.cancel.cancel();
        Ok(())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn join_fingerprint(&self) -> Option<&str> {
        self.join_fingerprint.as_deref()
    }

    /// Whether the runner task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Everything a session needs to run, captured at start.
pub struct SessionRunner {
    catalog: Arc<AdapterCatalog>,
    engine: EngineConfig,
    source: SourceConfig,
    target: TargetConfig,
    columns: Vec<String>,
    plan: Option<JoinPlan>,
    ctx: CallContext,
}

/// Adapters and request produced by the connecting phase.
struct Connected {
    source: Arc<dyn SourceAdapter>,
    target: Arc<dyn TargetAdapter>,
    request: ReadRequest,
}

enum Outcome {
    Completed,
    Cancelled,
}

impl SessionRunner {
    pub fn new(
        catalog: Arc<AdapterCatalog>,
        engine: EngineConfig,
        source: SourceConfig,
        target: TargetConfig,
        columns: Vec<String>,
        plan: Option<JoinPlan>,
        ctx: CallContext,
    ) -> Self {
        Self {
            catalog,
            engine,
            source,
            target,
            columns,
            plan,
            ctx,
        }
    }

    /// Spawn the runner on the current runtime and return its handle.
    pub fn spawn(self, id: SessionId) -> TransferSession {
        let (tx, rx) = watch::channel(SessionSnapshot::new());
        let cancel = CancellationToken::new();

        let source = self.source.describe();
        let target = self.target.describe();
        let columns = self.columns.clone();
        let join_fingerprint = self.plan.as_ref().map(|p| p.fingerprint());

        let task = tokio::spawn(self.run(id.clone(), tx, cancel.clone()));

        TransferSession {
            id,
            progress: rx,
            cancel,
            task,
            source,
            target,
            columns,
            join_fingerprint,
        }
    }

    async fn run(
        self,
        id: SessionId,
        progress: watch::Sender<SessionSnapshot>,
        cancel: CancellationToken,
    ) {
        progress.send_modify(|s| s.enter(TransferState::Connecting, "checking connections"));
        info!(
            "Session {}: connecting {} -> {}",
            id,
            self.source.describe(),
            self.target.describe()
        );

        let connected = match self.connect(&progress, &cancel).await {
            Ok(Some(connected)) => connected,
            Ok(None) => {
                warn!("Session {}: cancelled before any rows were read", id);
                progress.send_modify(|s| s.enter(TransferState::Cancelled, "cancelled"));
                return;
            }
            Err(e) => {
                fail(&id, &progress, &e);
                return;
            }
        };

        let start = Instant::now();
        let result = self.transfer(&id, &connected, &progress, &cancel).await;

        let flushed = connected.target.finish(&self.ctx).await;
        let records = progress.borrow().records_processed;

        match (result, flushed) {
            (Ok(Outcome::Completed), Ok(())) => {
                let elapsed = start.elapsed();
                let rows_per_sec = if elapsed.as_secs_f64() > 0.0 {
                    (records as f64 / elapsed.as_secs_f64()) as u64
                } else {
                    0
                };
                info!(
                    "Session {}: transferred {} rows in {:?} ({} rows/sec)",
                    id, records, elapsed, rows_per_sec
                );
                progress.send_modify(|s| s.enter(TransferState::Completed, "done"));
            }
            (Ok(Outcome::Completed), Err(e)) => fail(&id, &progress, &e.into()),
            (Ok(Outcome::Cancelled), flushed) => {
                if let Err(e) = flushed {
                    warn!("Session {}: flush after cancel failed: {}", id, e);
                }
                warn!("Session {}: cancelled after {} rows", id, records);
                progress.send_modify(|s| s.enter(TransferState::Cancelled, "cancelled"));
            }
            (Err(e), flushed) => {
                if let Err(flush_err) = flushed {
                    debug!("Session {}: flush after failure failed: {}", id, flush_err);
                }
                fail(&id, &progress, &e);
            }
        }
    }

    /// Everything up to `SchemaResolved`. `Ok(None)` means cancellation was
    /// requested while connecting; the session never leaves `Connecting`.
    async fn connect(
        &self,
        progress: &watch::Sender<SessionSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Option<Connected>> {
        let source = self.catalog.source(&self.source, &self.engine)?;
        let target = self.catalog.target(&self.target, &self.engine)?;

        futures::try_join!(
            source.check_connection(&self.ctx),
            target.check_connection(&self.ctx)
        )?;

        progress.send_modify(|s| s.operation = "resolving schema".to_string());
        let scope = schema::read_scope(&self.source, self.plan.as_ref())?;
        let resolved = schema::resolve(source.as_ref(), &self.ctx, &scope).await?;
        let columns = schema::select_columns(&resolved, &self.columns)?;

        let warnings = match target.list_columns(&self.ctx).await? {
            Some(existing) => typemap::check_against_target(&columns, &existing),
            None => typemap::check(&columns, target.system()),
        };
        for warning in &warnings {
            warn!("Type warning: {}", warning);
        }

        let request = ReadRequest::new(scope, columns);
        let total = source.estimate_row_count(&self.ctx, &request).await?;

        if cancel.is_cancelled() {
            return Ok(None);
        }
        progress.send_modify(|s| {
            s.enter(TransferState::SchemaResolved, "schema resolved");
            s.warnings = warnings;
            s.estimated_total = total;
        });

        Ok(Some(Connected {
            source,
            target,
            request,
        }))
    }

    async fn transfer(
        &self,
        id: &SessionId,
        connected: &Connected,
        progress: &watch::Sender<SessionSnapshot>,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let names = connected.request.column_names();
        connected.target.begin(&self.ctx, &names).await?;

        let batch_size = self.engine.batch_size.max(1);
        let (tx, mut rx) = mpsc::channel(self.engine.read_ahead.max(1));

        let reader = tokio::spawn(read_batches(
            connected.source.clone(),
            self.ctx.clone(),
            connected.request.clone(),
            batch_size,
            tx,
        ));

        progress.send_modify(|s| s.enter(TransferState::Transferring, "reading first batch"));
        info!(
            "Session {}: transferring {} columns in batches of {}",
            id,
            names.len(),
            batch_size
        );

        let mut batches = 0usize;
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(Outcome::Cancelled),
                next = rx.recv() => next,
            };

            let batch = match next {
                None => break Ok(Outcome::Completed),
                Some(Err(e)) => break Err(IngestError::from(e)),
                Some(Ok(batch)) => batch,
            };
            if batch.is_empty() {
                continue;
            }

            let ack = match connected
                .target
                .write_batch(&self.ctx, &names, batch.rows)
                .await
            {
                Ok(ack) => ack,
                Err(e) => break Err(e.into()),
            };
            batches += 1;

            progress.send_modify(|s| {
                s.records_processed += ack.rows;
                s.bytes_transferred += ack.bytes;
                s.operation = format!("wrote batch {}", batches);
            });
            debug!(
                "Session {}: batch {} committed {} rows ({} bytes)",
                id, batches, ack.rows, ack.bytes
            );
        };

        reader.abort();
        outcome
    }
}

/// Feed batches into `tx` until the source is exhausted or the receiver is gone.
async fn read_batches(
    source: Arc<dyn SourceAdapter>,
    ctx: CallContext,
    request: ReadRequest,
    limit: usize,
    tx: mpsc::Sender<AdapterResult<Batch>>,
) {
    let mut cursor = Cursor::start();
    loop {
        let result = source.read_batch(&ctx, &request, cursor, limit).await;
        let next = result.as_ref().ok().and_then(|b| b.next);
        if tx.send(result).await.is_err() {
            return;
        }
        match next {
            Some(c) => cursor = c,
            None => return,
        }
    }
}

fn fail(id: &SessionId, progress: &watch::Sender<SessionSnapshot>, err: &IngestError) {
    progress.send_modify(|s| {
        let report = report_for(err).with_records_committed(s.records_processed);
        error!(
            "Session {}: failed after {} rows: {}",
            id, s.records_processed, report
        );
        s.error = Some(report);
        s.enter(TransferState::Failed, "failed");
    });
}
