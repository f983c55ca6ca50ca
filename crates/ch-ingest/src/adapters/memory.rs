//! In-memory adapters for tests and embedding.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{
    AdapterError, AdapterResult, Batch, CallContext, ColumnDescriptor, Cursor, ReadRequest,
    ReadScope, Row, SourceAdapter, TargetAdapter, TargetSystem, WriteAck,
};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
}

/// A source serving fixed tables.
///
/// Reads of a join scope are answered from the root table only.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: BTreeMap<String, MemoryTable>,
    fail_connect: Option<AdapterError>,
    fail_read_at: Option<(usize, AdapterError)>,
    known_total: bool,
    connect_delay: Option<Duration>,
    read_delay: Option<Duration>,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            known_total: true,
            ..Self::default()
        }
    }

    pub fn with_table(mut self, name: &str, columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        let columns = columns.into_iter().map(|c| c.in_table(name)).collect();
        self.tables
            .insert(name.to_string(), MemoryTable { columns, rows });
        self
    }

    /// Fail `check_connection` with `err`.
    pub fn failing_connect(mut self, err: AdapterError) -> Self {
        self.fail_connect = Some(err);
        self
    }

    /// Fail the `n`th `read_batch` call (zero-based) with `err`.
    pub fn failing_read(mut self, n: usize, err: AdapterError) -> Self {
        self.fail_read_at = Some((n, err));
        self
    }

    /// Do not report a row count up front.
    pub fn without_total(mut self) -> Self {
        self.known_total = false;
        self
    }

    /// Delay `check_connection`, keeping a session in `Connecting`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Number of `read_batch` calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn table_for(&self, scope: &ReadScope) -> AdapterResult<&MemoryTable> {
        let name = match scope {
            ReadScope::Table(name) => name.as_str(),
            ReadScope::Join(plan) => plan.root.as_str(),
        };
        self.tables
            .get(name)
            .ok_or_else(|| AdapterError::not_found(format!("table {} does not exist", name)))
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    fn system(&self) -> TargetSystem {
        TargetSystem::Database
    }

    async fn check_connection(&self, _ctx: &CallContext) -> AdapterResult<()> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_connect {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn list_tables(&self, _ctx: &CallContext) -> AdapterResult<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn list_columns(&self, _ctx: &CallContext, table: &str) -> AdapterResult<Vec<ColumnDescriptor>> {
        self.table_for(&ReadScope::Table(table.to_string()))
            .map(|t| t.columns.clone())
    }

    async fn read_batch(
        &self,
        _ctx: &CallContext,
        request: &ReadRequest,
        cursor: Cursor,
        limit: usize,
    ) -> AdapterResult<Batch> {
        let call = self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((n, err)) = &self.fail_read_at {
            if *n == call {
                return Err(err.clone());
            }
        }

        let table = self.table_for(&request.scope)?;
        let indices = request
            .columns
            .iter()
            .map(|c| {
                table
                    .columns
                    .iter()
                    .position(|t| t.column == c.column)
                    .ok_or_else(|| AdapterError::not_found(format!("column {} not found", c.column)))
            })
            .collect::<AdapterResult<Vec<usize>>>()?;

        let start = (cursor.offset() as usize).min(table.rows.len());
        let end = start.saturating_add(limit).min(table.rows.len());
        let rows = table.rows[start..end]
            .iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Batch::page(rows, cursor, limit))
    }

    async fn estimate_row_count(
        &self,
        _ctx: &CallContext,
        request: &ReadRequest,
    ) -> AdapterResult<Option<u64>> {
        if !self.known_total {
            return Ok(None);
        }
        Ok(Some(self.table_for(&request.scope)?.rows.len() as u64))
    }
}

/// A target collecting rows in memory.
///
/// Plain targets behave like a flat file. Given table columns, the target
/// behaves like a database table and reports them for type checking.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    table: Option<Vec<ColumnDescriptor>>,
    columns: Mutex<Vec<String>>,
    rows: Mutex<Vec<Row>>,
    fail_connect: Option<AdapterError>,
    fail_write_at: Option<(usize, AdapterError)>,
    write_delay: Option<Duration>,
    writes: AtomicUsize,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect(mut self, err: AdapterError) -> Self {
        self.fail_connect = Some(err);
        self
    }

    /// Fail the `n`th `write_batch` call (zero-based) with `err`.
    pub fn failing_write(mut self, n: usize, err: AdapterError) -> Self {
        self.fail_write_at = Some((n, err));
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Present an existing table with these columns.
    pub fn with_table_columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.table = Some(columns);
        self
    }

    /// Rows committed so far.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Column names announced by `begin` or the last write.
    pub fn columns(&self) -> Vec<String> {
        self.columns.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TargetAdapter for MemoryTarget {
    fn system(&self) -> TargetSystem {
        match self.table {
            Some(_) => TargetSystem::Database,
            None => TargetSystem::FlatFile,
        }
    }

    async fn check_connection(&self, _ctx: &CallContext) -> AdapterResult<()> {
        match &self.fail_connect {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn list_columns(&self, _ctx: &CallContext) -> AdapterResult<Option<Vec<ColumnDescriptor>>> {
        Ok(self.table.clone())
    }

    async fn begin(&self, _ctx: &CallContext, columns: &[String]) -> AdapterResult<()> {
        *self
            .columns
            .lock()
            .map_err(|_| AdapterError::server("memory target poisoned"))? = columns.to_vec();
        Ok(())
    }

    async fn write_batch(
        &self,
        _ctx: &CallContext,
        columns: &[String],
        rows: Vec<Row>,
    ) -> AdapterResult<WriteAck> {
        let call = self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((n, err)) = &self.fail_write_at {
            if *n == call {
                return Err(err.clone());
            }
        }

        let bytes = rows
            .iter()
            .flat_map(|r| r.iter())
            .map(|v| v.to_field().len() as u64)
            .sum();
        let count = rows.len() as u64;

        let poisoned = || AdapterError::server("memory target poisoned");
        *self.columns.lock().map_err(|_| poisoned())? = columns.to_vec();
        self.rows.lock().map_err(|_| poisoned())?.extend(rows);

        Ok(WriteAck { rows: count, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    #[tokio::test]
    async fn test_memory_source_pages() {
        let rows: Vec<Row> = (0..5).map(|i| vec![Value::Int(i), Value::Int(i * 10)]).collect();
        let source = MemorySource::new().with_table(
            "t",
            vec![
                ColumnDescriptor::new("a", "Int64", false),
                ColumnDescriptor::new("b", "Int64", false),
            ],
            rows,
        );
        let request = ReadRequest::new(
            ReadScope::Table("t".into()),
            vec![ColumnDescriptor::new("b", "Int64", false)],
        );
        let ctx = CallContext::default();

        let first = source.read_batch(&ctx, &request, Cursor::start(), 3).await.unwrap();
        assert_eq!(first.rows, vec![vec![Value::Int(0)], vec![Value::Int(10)], vec![Value::Int(20)]]);
        let second = source.read_batch(&ctx, &request, first.next.unwrap(), 3).await.unwrap();
        assert_eq!(second.len(), 2);
        assert!(second.next.is_none());
        assert_eq!(source.reads(), 2);
    }
}
