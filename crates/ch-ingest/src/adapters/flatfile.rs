//! Delimited flat-file adapters built on the `csv` crate.
//!
//! File I/O is blocking, so every call runs on the blocking pool. The source
//! keeps its reader open between batches and only reopens the file when a
//! read asks for a cursor other than the one it stopped at.

use std::collections::HashSet;
use std::fs::File;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::config::FlatFileConfig;
use crate::core::{
    AdapterError, AdapterResult, Batch, CallContext, ColumnDescriptor, Cursor, ReadRequest, Row,
    SourceAdapter, TargetAdapter, TargetSystem, Value, WriteAck,
};
use crate::typemap;

fn delimiter(config: &FlatFileConfig) -> AdapterResult<u8> {
    config.delimiter_byte().ok_or_else(|| {
        AdapterError::server(format!("unsupported delimiter '{}'", config.delimiter))
    })
}

fn lock<T>(mutex: &Mutex<T>) -> AdapterResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AdapterError::server("flat file state poisoned by an earlier panic"))
}

async fn blocking<T, F>(f: F) -> AdapterResult<T>
where
    F: FnOnce() -> AdapterResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AdapterError::server(format!("flat file task failed: {}", e)))?
}

/// An open reader and the row it will yield next.
struct OpenReader {
    reader: csv::Reader<File>,
    headers: Vec<String>,
    position: u64,
}

impl OpenReader {
    fn open(config: &FlatFileConfig) -> AdapterResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter(config)?)
            .has_headers(config.header)
            .flexible(false)
            .from_path(&config.path)?;

        let headers = if config.header {
            reader.headers()?.iter().map(str::to_string).collect()
        } else {
            // Peek at the first record for its width, then start over.
            let width = reader.records().next().transpose()?.map_or(0, |r| r.len());
            reader = csv::ReaderBuilder::new()
                .delimiter(delimiter(config)?)
                .has_headers(false)
                .from_path(&config.path)?;
            (1..=width).map(|i| format!("column_{}", i)).collect()
        };

        Ok(Self {
            reader,
            headers: unique_headers(headers),
            position: 0,
        })
    }

    fn skip_to(&mut self, offset: u64) -> AdapterResult<()> {
        let mut record = csv::StringRecord::new();
        while self.position < offset {
            if !self.reader.read_record(&mut record)? {
                break;
            }
            self.position += 1;
        }
        Ok(())
    }
}

/// Suffix repeated header names so every column stays addressable:
/// `id,id,name` reads as `id, id_2, name`. A suffix never reuses a name
/// already present in the header.
fn unique_headers(names: Vec<String>) -> Vec<String> {
    let original: HashSet<String> = names.iter().cloned().collect();
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());

    names
        .into_iter()
        .map(|name| {
            if used.insert(name.clone()) {
                return name;
            }
            let mut n = 2;
            loop {
                let candidate = format!("{}_{}", name, n);
                if !original.contains(&candidate) && used.insert(candidate.clone()) {
                    debug!("Renamed repeated header {} to {}", name, candidate);
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

/// Reads rows from a delimited file.
pub struct CsvSource {
    config: FlatFileConfig,
    sample_size: usize,
    state: Arc<Mutex<Option<OpenReader>>>,
}

impl CsvSource {
    /// `sample_size` bounds the rows scanned for type inference.
    pub fn new(config: FlatFileConfig, sample_size: usize) -> Self {
        Self {
            config,
            sample_size,
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// The table name a flat file presents: its file stem.
    pub fn table_name(config: &FlatFileConfig) -> String {
        config
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    }
}

#[async_trait]
impl SourceAdapter for CsvSource {
    fn system(&self) -> TargetSystem {
        TargetSystem::FlatFile
    }

    async fn check_connection(&self, _ctx: &CallContext) -> AdapterResult<()> {
        let config = self.config.clone();
        blocking(move || OpenReader::open(&config).map(|_| ())).await
    }

    /// A flat file presents exactly one table, named after its file stem.
    async fn list_tables(&self, _ctx: &CallContext) -> AdapterResult<Vec<String>> {
        let config = self.config.clone();
        blocking(move || {
            OpenReader::open(&config)?;
            Ok(vec![CsvSource::table_name(&config)])
        })
        .await
    }

    async fn list_columns(&self, _ctx: &CallContext, _table: &str) -> AdapterResult<Vec<ColumnDescriptor>> {
        let config = self.config.clone();
        let sample_size = self.sample_size;

        blocking(move || {
            let mut open = OpenReader::open(&config)?;
            let mut samples: Vec<Vec<String>> = vec![Vec::new(); open.headers.len()];
            for record in open.reader.records().take(sample_size) {
                let record = record?;
                for (idx, field) in record.iter().enumerate() {
                    if let Some(column) = samples.get_mut(idx) {
                        column.push(field.to_string());
                    }
                }
            }

            let columns = open
                .headers
                .iter()
                .zip(samples.iter())
                .map(|(name, fields)| {
                    let (ty, nullable) =
                        typemap::infer_column_type(fields.iter().map(String::as_str));
                    let mut column = ColumnDescriptor::new(name.clone(), ty, nullable);
                    column.sample_value = fields
                        .iter()
                        .find(|f| !f.is_empty())
                        .map(|f| Value::from_field(f));
                    column
                })
                .collect();
            Ok(columns)
        })
        .await
    }

    async fn read_batch(
        &self,
        _ctx: &CallContext,
        request: &ReadRequest,
        cursor: Cursor,
        limit: usize,
    ) -> AdapterResult<Batch> {
        let config = self.config.clone();
        let state = Arc::clone(&self.state);
        let wanted: Vec<String> = request.columns.iter().map(|c| c.column.clone()).collect();

        blocking(move || {
            let mut guard = lock(&state)?;
            let stale = guard
                .as_ref()
                .map_or(true, |open| open.position != cursor.offset());
            if stale {
                debug!(
                    "Opening {} at row {}",
                    config.path.display(),
                    cursor.offset()
                );
                let mut open = OpenReader::open(&config)?;
                open.skip_to(cursor.offset())?;
                *guard = Some(open);
            }
            let open = match guard.as_mut() {
                Some(open) => open,
                None => return Err(AdapterError::server("flat file reader missing")),
            };

            let indices = wanted
                .iter()
                .map(|name| {
                    open.headers.iter().position(|h| h == name).ok_or_else(|| {
                        AdapterError::not_found(format!(
                            "column {} not found in {}",
                            name,
                            config.path.display()
                        ))
                    })
                })
                .collect::<AdapterResult<Vec<usize>>>()?;

            let mut rows = Vec::with_capacity(limit);
            let mut record = csv::StringRecord::new();
            while rows.len() < limit && open.reader.read_record(&mut record)? {
                open.position += 1;
                let row: Row = indices
                    .iter()
                    .map(|&i| Value::from_field(record.get(i).unwrap_or("")))
                    .collect();
                rows.push(row);
            }

            Ok(Batch::page(rows, cursor, limit))
        })
        .await
    }

    async fn estimate_row_count(
        &self,
        _ctx: &CallContext,
        _request: &ReadRequest,
    ) -> AdapterResult<Option<u64>> {
        let config = self.config.clone();
        blocking(move || {
            let mut open = OpenReader::open(&config)?;
            let mut record = csv::ByteRecord::new();
            let mut count = 0u64;
            while open.reader.read_byte_record(&mut record)? {
                count += 1;
            }
            Ok(Some(count))
        })
        .await
    }
}

/// An open output file and header bytes not yet reported in an ack.
struct OpenWriter {
    writer: csv::Writer<File>,
    pending_bytes: u64,
}

impl OpenWriter {
    /// Create (or truncate) the file and write the header line.
    fn create(config: &FlatFileConfig, columns: &[String]) -> AdapterResult<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter(config)?)
            .from_path(&config.path)?;
        let mut pending_bytes = 0;
        if config.header {
            writer.write_record(columns)?;
            writer.flush()?;
            pending_bytes = record_len(columns.iter().map(String::len));
        }
        Ok(Self {
            writer,
            pending_bytes,
        })
    }
}

/// Writes rows to a delimited file, header first.
///
/// The file is created by `begin`, so an empty source still yields a file
/// holding just the header.
pub struct CsvTarget {
    config: FlatFileConfig,
    writer: Arc<Mutex<Option<OpenWriter>>>,
}

impl CsvTarget {
    pub fn new(config: FlatFileConfig) -> Self {
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl TargetAdapter for CsvTarget {
    fn system(&self) -> TargetSystem {
        TargetSystem::FlatFile
    }

    async fn check_connection(&self, _ctx: &CallContext) -> AdapterResult<()> {
        let parent = match self.config.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => return Ok(()),
        };
        blocking(move || {
            let meta = std::fs::metadata(&parent)?;
            if !meta.is_dir() {
                return Err(AdapterError::not_found(format!(
                    "{} is not a directory",
                    parent.display()
                )));
            }
            if meta.permissions().readonly() {
                return Err(AdapterError::new(
                    crate::core::FailureKind::Forbidden,
                    format!("{} is read-only", parent.display()),
                ));
            }
            Ok(())
        })
        .await
    }

    async fn begin(&self, _ctx: &CallContext, columns: &[String]) -> AdapterResult<()> {
        let config = self.config.clone();
        let writer = Arc::clone(&self.writer);
        let columns = columns.to_vec();

        blocking(move || {
            let mut guard = lock(&writer)?;
            if guard.is_none() {
                debug!("Creating {}", config.path.display());
                *guard = Some(OpenWriter::create(&config, &columns)?);
            }
            Ok(())
        })
        .await
    }

    async fn write_batch(
        &self,
        _ctx: &CallContext,
        columns: &[String],
        rows: Vec<Row>,
    ) -> AdapterResult<WriteAck> {
        let config = self.config.clone();
        let writer = Arc::clone(&self.writer);
        let columns = columns.to_vec();

        blocking(move || {
            let mut guard = lock(&writer)?;
            if guard.is_none() {
                *guard = Some(OpenWriter::create(&config, &columns)?);
            }
            let open = match guard.as_mut() {
                Some(open) => open,
                None => return Err(AdapterError::server("flat file writer missing")),
            };

            let mut bytes = std::mem::take(&mut open.pending_bytes);
            for row in &rows {
                let fields: Vec<_> = row.iter().map(Value::to_field).collect();
                open.writer.write_record(fields.iter().map(|f| f.as_bytes()))?;
                bytes += record_len(fields.iter().map(|f| f.len()));
            }
            // A batch counts as committed only once it reaches the file.
            open.writer.flush()?;

            Ok(WriteAck {
                rows: rows.len() as u64,
                bytes,
            })
        })
        .await
    }

    async fn finish(&self, _ctx: &CallContext) -> AdapterResult<()> {
        let writer = Arc::clone(&self.writer);
        blocking(move || {
            let mut guard = lock(&writer)?;
            if let Some(mut open) = guard.take() {
                open.writer.flush()?;
            }
            Ok(())
        })
        .await
    }
}

/// Unquoted size of one record: fields, separators and newline.
fn record_len(field_lens: impl Iterator<Item = usize>) -> u64 {
    let mut total = 0u64;
    let mut count = 0u64;
    for len in field_lens {
        total += len as u64;
        count += 1;
    }
    total + count.saturating_sub(1) + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReadScope;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> FlatFileConfig {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        FlatFileConfig::new(path)
    }

    fn request(names: &[&str]) -> ReadRequest {
        ReadRequest::new(
            ReadScope::Table("prices".into()),
            names
                .iter()
                .map(|n| ColumnDescriptor::new(*n, "String", false))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_list_columns_infers_types() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_file(
            &dir,
            "prices.csv",
            "price,date,town\n100,2024-01-01,Leeds\n250,2024-01-02,\n",
        );
        let source = CsvSource::new(config, 100);
        let columns = source
            .list_columns(&CallContext::default(), "prices")
            .await
            .unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].source_type, "Int64");
        assert_eq!(columns[1].source_type, "Date");
        assert_eq!(columns[2].source_type, "Nullable(String)");
        assert!(columns[2].nullable);
        assert_eq!(columns[0].sample_value, Some(Value::Text("100".into())));
    }

    #[tokio::test]
    async fn test_read_batches_with_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::from("id,name\n");
        for i in 0..25 {
            content.push_str(&format!("{},n{}\n", i, i));
        }
        let source = CsvSource::new(write_file(&dir, "t.csv", &content), 100);
        let ctx = CallContext::default();
        let req = request(&["name", "id"]);

        let first = source.read_batch(&ctx, &req, Cursor::start(), 10).await.unwrap();
        assert_eq!(first.len(), 10);
        assert_eq!(first.rows[0], vec![Value::Text("n0".into()), Value::Text("0".into())]);
        let next = first.next.unwrap();

        let second = source.read_batch(&ctx, &req, next, 10).await.unwrap();
        assert_eq!(second.rows[0][1], Value::Text("10".into()));

        let third = source.read_batch(&ctx, &req, second.next.unwrap(), 10).await.unwrap();
        assert_eq!(third.len(), 5);
        assert!(third.next.is_none());

        // Rewinding reopens the file.
        let again = source.read_batch(&ctx, &req, Cursor::at(20), 10).await.unwrap();
        assert_eq!(again.rows[0][1], Value::Text("20".into()));

        let count = source.estimate_row_count(&ctx, &req).await.unwrap();
        assert_eq!(count, Some(25));
    }

    #[tokio::test]
    async fn test_missing_column_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSource::new(write_file(&dir, "t.csv", "a,b\n1,2\n"), 100);
        let err = source
            .read_batch(&CallContext::default(), &request(&["zzz"]), Cursor::start(), 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::core::FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let source = CsvSource::new(FlatFileConfig::new("/definitely/not/here.csv"), 100);
        let err = source.check_connection(&CallContext::default()).await.unwrap_err();
        assert_eq!(err.kind, crate::core::FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_headerless_file_gets_positional_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_file(&dir, "t.tsv", "1\tx\n2\ty\n");
        config.header = false;
        config.delimiter = "\t".into();
        let source = CsvSource::new(config, 100);
        let ctx = CallContext::default();
        let columns = source.list_columns(&ctx, "t").await.unwrap();
        assert_eq!(columns[0].name, "column_1");
        assert_eq!(columns[1].name, "column_2");

        let batch = source
            .read_batch(&ctx, &request(&["column_2"]), Cursor::start(), 10)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_target_writes_header_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let mut config = FlatFileConfig::new(&path);
        config.delimiter = ";".into();
        let target = CsvTarget::new(config);
        let ctx = CallContext::default();
        let cols = vec!["price".to_string(), "date".to_string()];

        target.check_connection(&ctx).await.unwrap();
        let ack = target
            .write_batch(&ctx, &cols, vec![vec![Value::Int(100), Value::Text("2024-01-01".into())]])
            .await
            .unwrap();
        assert_eq!(ack.rows, 1);
        target
            .write_batch(&ctx, &cols, vec![vec![Value::Int(200), Value::Null]])
            .await
            .unwrap();
        target.finish(&ctx).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "price;date\n100;2024-01-01\n200;\n");
    }

    #[tokio::test]
    async fn test_target_begin_writes_header_without_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let target = CsvTarget::new(FlatFileConfig::new(&path));
        let ctx = CallContext::default();
        let cols = vec!["price".to_string(), "date".to_string()];

        target.begin(&ctx, &cols).await.unwrap();
        target.finish(&ctx).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "price,date\n");
    }

    #[tokio::test]
    async fn test_header_bytes_reported_with_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let target = CsvTarget::new(FlatFileConfig::new(dir.path().join("out.csv")));
        let ctx = CallContext::default();
        let cols = vec!["a".to_string()];

        target.begin(&ctx, &cols).await.unwrap();
        let first = target
            .write_batch(&ctx, &cols, vec![vec![Value::Int(7)]])
            .await
            .unwrap();
        let second = target
            .write_batch(&ctx, &cols, vec![vec![Value::Int(8)]])
            .await
            .unwrap();
        assert_eq!(first.bytes, 2 + 2);
        assert_eq!(second.bytes, 2);
    }

    #[tokio::test]
    async fn test_repeated_headers_are_suffixed() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSource::new(write_file(&dir, "t.csv", "id,id,name\n1,2,x\n"), 100);
        let ctx = CallContext::default();

        let columns = source.list_columns(&ctx, "t").await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "id_2", "name"]);

        let batch = source
            .read_batch(&ctx, &request(&["id_2", "id"]), Cursor::start(), 10)
            .await
            .unwrap();
        assert_eq!(batch.rows[0], vec![Value::Text("2".into()), Value::Text("1".into())]);
    }

    #[test]
    fn test_unique_headers_skips_existing_names() {
        let names = ["id", "id", "id_2", "id"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_headers(names), vec!["id", "id_3", "id_2", "id_4"]);
    }

    #[tokio::test]
    async fn test_list_tables_is_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvSource::new(write_file(&dir, "prices.csv", "a\n1\n"), 100);
        let tables = source.list_tables(&CallContext::default()).await.unwrap();
        assert_eq!(tables, vec!["prices"]);

        let missing = CsvSource::new(FlatFileConfig::new("/definitely/not/here.csv"), 100);
        let err = missing.list_tables(&CallContext::default()).await.unwrap_err();
        assert_eq!(err.kind, crate::core::FailureKind::NotFound);
    }

    #[test]
    fn test_record_len() {
        assert_eq!(record_len([3usize, 10].into_iter()), 3 + 10 + 1 + 1);
    }
}
