//! Adapter traits consumed by the engine.
//!
//! - [`SourceAdapter`]: table listing, schema introspection and cursor-based
//!   batch reads
//! - [`TargetAdapter`]: batch writes
//! - [`CredentialSupplier`]: the opaque bearer value attached to every call
//!
//! Adapters own their timeouts. Every failure is an [`AdapterError`] which the
//! engine classifies before surfacing it.

use async_trait::async_trait;

use crate::config::Credential;
use crate::join::JoinPlan;

use super::failure::AdapterResult;
use super::schema::{ColumnDescriptor, TargetSystem};
use super::value::{Batch, Cursor, Row};

/// What a read covers: a single table or a join plan.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadScope {
    Table(String),
    Join(JoinPlan),
}

/// A read of selected columns over a scope.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub scope: ReadScope,
    pub columns: Vec<ColumnDescriptor>,
}

impl ReadRequest {
    pub fn new(scope: ReadScope, columns: Vec<ColumnDescriptor>) -> Self {
        Self { scope, columns }
    }

    /// Output column names, in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Per-call context. Carries the bearer credential without interpreting it.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    bearer: Option<Credential>,
}

impl CallContext {
    pub fn new(bearer: Option<Credential>) -> Self {
        Self { bearer }
    }

    pub fn bearer(&self) -> Option<&Credential> {
        self.bearer.as_ref()
    }
}

/// Supplies the bearer value for adapter calls.
pub trait CredentialSupplier: Send + Sync {
    fn bearer(&self) -> Option<Credential>;
}

/// A fixed credential, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<Credential>);

impl StaticCredential {
    pub fn new(credential: Credential) -> Self {
        Self(Some(credential))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialSupplier for StaticCredential {
    fn bearer(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// Acknowledgement of a committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteAck {
    pub rows: u64,
    pub bytes: u64,
}

/// Read schema and rows from a source system.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The kind of system behind this adapter.
    fn system(&self) -> TargetSystem;

    /// Verify the source is reachable and the credential is accepted.
    async fn check_connection(&self, ctx: &CallContext) -> AdapterResult<()>;

    /// Names of the tables this source can read.
    async fn list_tables(&self, ctx: &CallContext) -> AdapterResult<Vec<String>>;

    /// Column metadata for one table.
    async fn list_columns(&self, ctx: &CallContext, table: &str)
        -> AdapterResult<Vec<ColumnDescriptor>>;

    /// Read at most `limit` rows starting at `cursor`.
    ///
    /// Returns `next: None` once the source is exhausted.
    async fn read_batch(
        &self,
        ctx: &CallContext,
        request: &ReadRequest,
        cursor: Cursor,
        limit: usize,
    ) -> AdapterResult<Batch>;

    /// Total rows the request will produce, if cheaply known.
    async fn estimate_row_count(
        &self,
        _ctx: &CallContext,
        _request: &ReadRequest,
    ) -> AdapterResult<Option<u64>> {
        Ok(None)
    }
}

/// Write rows to a target system.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    fn system(&self) -> TargetSystem;

    async fn check_connection(&self, ctx: &CallContext) -> AdapterResult<()>;

    /// Columns of the existing target table, when the target has a schema.
    async fn list_columns(&self, _ctx: &CallContext) -> AdapterResult<Option<Vec<ColumnDescriptor>>> {
        Ok(None)
    }

    /// Prepare to receive rows for `columns`. Called once before the first
    /// batch, even when the source turns out to be empty.
    async fn begin(&self, _ctx: &CallContext, _columns: &[String]) -> AdapterResult<()> {
        Ok(())
    }

    /// Write one batch. Returning `Ok` means the rows are committed.
    async fn write_batch(
        &self,
        ctx: &CallContext,
        columns: &[String],
        rows: Vec<Row>,
    ) -> AdapterResult<WriteAck>;

    /// Flush and release resources once the transfer stops.
    async fn finish(&self, _ctx: &CallContext) -> AdapterResult<()> {
        Ok(())
    }
}
