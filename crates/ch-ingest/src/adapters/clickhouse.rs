//! ClickHouse adapter over the HTTP interface.
//!
//! Queries are POSTed as raw SQL and results requested in JSON formats, so
//! no native protocol driver is needed. Credentials travel in the
//! `X-ClickHouse-User` / `X-ClickHouse-Key` headers, never in the URL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::dialect;
use crate::config::{DatabaseConfig, EngineConfig};
use crate::core::{
    AdapterError, AdapterResult, Batch, CallContext, ColumnDescriptor, Cursor, FailureKind,
    ReadRequest, ReadScope, Row, SourceAdapter, TargetAdapter, TargetSystem, Value, WriteAck,
};

/// Server error codes that map to a more specific failure than the HTTP status.
const CODE_UNKNOWN_TABLE: u32 = 60;
const CODE_UNKNOWN_DATABASE: u32 = 81;
const CODE_ACCESS_DENIED: u32 = 497;
const CODE_AUTHENTICATION_FAILED: u32 = 516;
const CODE_TIMEOUT_EXCEEDED: u32 = 159;

/// Source and target adapter for one ClickHouse database.
pub struct ClickHouseAdapter {
    client: reqwest::Client,
    url: String,
    config: DatabaseConfig,
    /// Sorting key per table, looked up once per adapter.
    sorting_keys: Mutex<HashMap<String, Option<String>>>,
}

#[derive(Debug, Deserialize)]
struct DescribeRow {
    name: String,
    #[serde(rename = "type")]
    ty: String,
}

impl ClickHouseAdapter {
    pub fn new(config: &DatabaseConfig, engine: &EngineConfig) -> AdapterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(engine.request_timeout_secs))
            .build()
            .map_err(|e| AdapterError::server(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url(),
            config: config.clone(),
            sorting_keys: Mutex::new(HashMap::new()),
        })
    }

    /// The table's sorting key expression, `None` for engines without one.
    async fn sorting_key(&self, ctx: &CallContext, table: &str) -> AdapterResult<Option<String>> {
        let poisoned = || AdapterError::server("sorting key cache poisoned");
        let cached = self.sorting_keys.lock().map_err(|_| poisoned())?.get(table).cloned();
        if let Some(key) = cached {
            return Ok(key);
        }

        let sql = dialect::sorting_key_sql(&self.config.database, table);
        let body = self.execute(ctx, &sql, None).await?;
        let key = parse_sorting_key(&body);
        debug!("Sorting key of {}: {:?}", table, key);

        self.sorting_keys
            .lock()
            .map_err(|_| poisoned())?
            .insert(table.to_string(), key.clone());
        Ok(key)
    }

    /// Table that receives inserts when used as a target.
    fn insert_table(&self) -> AdapterResult<&str> {
        self.config
            .tables
            .first()
            .map(String::as_str)
            .ok_or_else(|| AdapterError::not_found("no target table configured"))
    }

    /// Run a query. With `data`, the SQL goes in the URL and `data` is the body.
    async fn execute(&self, ctx: &CallContext, sql: &str, data: Option<String>) -> AdapterResult<String> {
        debug!("ClickHouse query: {}", sql);

        let key = ctx
            .bearer()
            .map(|c| c.expose().to_string())
            .unwrap_or_else(|| self.config.credential.expose().to_string());

        let mut rb = self
            .client
            .post(&self.url)
            .query(&[("database", self.config.database.as_str())])
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", key);

        rb = match data {
            Some(body) => rb.query(&[("query", sql)]).body(body),
            None => rb.body(sql.to_string()),
        };

        let response = rb.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(refine_failure(status.as_u16(), &body));
        }
        Ok(body)
    }
}

fn map_transport_error(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::new(FailureKind::Timeout, err.to_string())
    } else if err.is_connect() || err.is_request() {
        AdapterError::unreachable(err.to_string())
    } else {
        AdapterError::server(err.to_string())
    }
}

/// Extract `N` from a `Code: N. DB::Exception: ...` body.
fn server_code(body: &str) -> Option<u32> {
    let rest = &body[body.find("Code: ")? + "Code: ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn refine_failure(status: u16, body: &str) -> AdapterError {
    let mut err = AdapterError::from_status(status, body);
    err.kind = match server_code(body) {
        Some(CODE_UNKNOWN_TABLE) | Some(CODE_UNKNOWN_DATABASE) => FailureKind::NotFound,
        Some(CODE_AUTHENTICATION_FAILED) => FailureKind::Unauthorized,
        Some(CODE_ACCESS_DENIED) => FailureKind::Forbidden,
        Some(CODE_TIMEOUT_EXCEEDED) => FailureKind::Timeout,
        _ => err.kind,
    };
    err
}

fn parse_sorting_key(body: &str) -> Option<String> {
    body.lines()
        .next()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

fn parse_tables(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_rows(body: &str) -> AdapterResult<Vec<Row>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let cells: Vec<serde_json::Value> = serde_json::from_str(line)
                .map_err(|e| AdapterError::server(format!("unexpected row format: {}", e)))?;
            Ok(cells.into_iter().map(Value::from_json).collect())
        })
        .collect()
}

fn encode_rows(rows: &[Row]) -> AdapterResult<String> {
    let mut body = String::new();
    for row in rows {
        let cells: Vec<serde_json::Value> = row.iter().map(Value::to_json).collect();
        let line = serde_json::to_string(&cells)
            .map_err(|e| AdapterError::server(format!("failed to encode row: {}", e)))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

#[async_trait]
impl SourceAdapter for ClickHouseAdapter {
    fn system(&self) -> TargetSystem {
        TargetSystem::Database
    }

    async fn check_connection(&self, ctx: &CallContext) -> AdapterResult<()> {
        self.execute(ctx, "SELECT 1", None).await.map(|_| ())
    }

    async fn list_tables(&self, ctx: &CallContext) -> AdapterResult<Vec<String>> {
        let body = self
            .execute(ctx, &dialect::show_tables_sql(&self.config.database), None)
            .await?;
        Ok(parse_tables(&body))
    }

    async fn list_columns(&self, ctx: &CallContext, table: &str) -> AdapterResult<Vec<ColumnDescriptor>> {
        let sql = format!(
            "{} FORMAT JSONEachRow",
            dialect::describe_sql(&self.config.database, table)
        );
        let body = self.execute(ctx, &sql, None).await?;

        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let row: DescribeRow = serde_json::from_str(line)
                    .map_err(|e| AdapterError::server(format!("unexpected DESCRIBE output: {}", e)))?;
                let nullable = row.ty.starts_with("Nullable(")
                    || row.ty.starts_with("LowCardinality(Nullable(");
                Ok(ColumnDescriptor::new(row.name, row.ty, nullable).in_table(table))
            })
            .collect()
    }

    async fn read_batch(
        &self,
        ctx: &CallContext,
        request: &ReadRequest,
        cursor: Cursor,
        limit: usize,
    ) -> AdapterResult<Batch> {
        let sorting_key = match &request.scope {
            ReadScope::Table(table) => self.sorting_key(ctx, table).await?,
            ReadScope::Join(_) => None,
        };
        let sql = format!(
            "{} FORMAT JSONCompactEachRow",
            dialect::select_sql(
                &self.config.database,
                request,
                sorting_key.as_deref(),
                cursor.offset(),
                limit
            )
        );
        let body = self.execute(ctx, &sql, None).await?;
        let rows = parse_rows(&body)?;
        Ok(Batch::page(rows, cursor, limit))
    }

    async fn estimate_row_count(
        &self,
        ctx: &CallContext,
        request: &ReadRequest,
    ) -> AdapterResult<Option<u64>> {
        let sql = format!(
            "{} FORMAT TabSeparated",
            dialect::count_sql(&self.config.database, request)
        );
        let body = self.execute(ctx, &sql, None).await?;
        Ok(body.trim().parse::<u64>().ok())
    }
}

#[async_trait]
impl TargetAdapter for ClickHouseAdapter {
    fn system(&self) -> TargetSystem {
        TargetSystem::Database
    }

    async fn check_connection(&self, ctx: &CallContext) -> AdapterResult<()> {
        self.execute(ctx, "SELECT 1", None).await.map(|_| ())
    }

    async fn list_columns(&self, ctx: &CallContext) -> AdapterResult<Option<Vec<ColumnDescriptor>>> {
        let table = self.insert_table()?.to_string();
        SourceAdapter::list_columns(self, ctx, &table).await.map(Some)
    }

    async fn write_batch(
        &self,
        ctx: &CallContext,
        columns: &[String],
        rows: Vec<Row>,
    ) -> AdapterResult<WriteAck> {
        if rows.is_empty() {
            return Ok(WriteAck::default());
        }
        let sql = dialect::insert_sql(&self.config.database, self.insert_table()?, columns);
        let body = encode_rows(&rows)?;
        let bytes = body.len() as u64;
        self.execute(ctx, &sql, Some(body)).await?;
        Ok(WriteAck {
            rows: rows.len() as u64,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_code() {
        assert_eq!(
            server_code("Code: 60. DB::Exception: Table uk.nope does not exist."),
            Some(60)
        );
        assert_eq!(server_code("garbage"), None);
    }

    #[test]
    fn test_refine_failure_uses_server_code() {
        let err = refine_failure(
            500,
            "Code: 516. DB::Exception: default: Authentication failed",
        );
        assert_eq!(err.kind, FailureKind::Unauthorized);

        let err = refine_failure(404, "Code: 60. DB::Exception: Table x doesn't exist");
        assert_eq!(err.kind, FailureKind::NotFound);

        let err = refine_failure(502, "bad gateway");
        assert_eq!(err.kind, FailureKind::Server);
    }

    #[test]
    fn test_parse_rows() {
        let rows = parse_rows("[1,\"2024-01-01\",null]\n[2,\"2024-01-02\",[1,2]]\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::Int(1));
        assert!(rows[0][2].is_null());
        assert_eq!(rows[1][2].to_field(), "[1,2]");
    }

    #[test]
    fn test_parse_sorting_key() {
        assert_eq!(
            parse_sorting_key("postcode, date\n"),
            Some("postcode, date".to_string())
        );
        assert_eq!(parse_sorting_key("\n"), None);
        assert_eq!(parse_sorting_key(""), None);
    }

    #[test]
    fn test_parse_tables() {
        assert_eq!(
            parse_tables("price_paid\nusers\n\n"),
            vec!["price_paid".to_string(), "users".to_string()]
        );
    }

    #[test]
    fn test_encode_rows() {
        let body = encode_rows(&[vec![Value::Int(1), Value::Text("a".into()), Value::Null]]).unwrap();
        assert_eq!(body, "[1,\"a\",null]\n");
    }

    #[test]
    fn test_url_respects_secure_flag() {
        let mut config = DatabaseConfig {
            host: "ch.local".into(),
            port: 8443,
            database: "uk".into(),
            user: "default".into(),
            credential: Default::default(),
            secure: true,
            tables: vec!["t".into()],
        };
        let adapter = ClickHouseAdapter::new(&config, &EngineConfig::default()).unwrap();
        assert_eq!(adapter.url, "https://ch.local:8443/");
        config.secure = false;
        assert_eq!(config.url(), "http://ch.local:8443/");
    }
}
