//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::TargetSystem;
use crate::join::JoinSpec;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where rows are read from.
    pub source: SourceConfig,

    /// Where rows are written to.
    pub target: TargetConfig,

    /// Selected columns, in output order.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Optional multi-table join over a database source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinSpec>,

    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Opaque credential. Never printed, never parsed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw value, for adapters that must put it on the wire.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// One side of a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EndpointConfig {
    /// ClickHouse over HTTP.
    Database(DatabaseConfig),
    /// Delimited text file.
    #[serde(rename = "flatfile")]
    FlatFile(FlatFileConfig),
}

/// Source side of a transfer.
pub type SourceConfig = EndpointConfig;

/// Target side of a transfer.
pub type TargetConfig = EndpointConfig;

impl EndpointConfig {
    pub fn system(&self) -> TargetSystem {
        match self {
            EndpointConfig::Database(_) => TargetSystem::Database,
            EndpointConfig::FlatFile(_) => TargetSystem::FlatFile,
        }
    }

    /// The credential configured for this endpoint, if any.
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            EndpointConfig::Database(db) if !db.credential.is_empty() => Some(&db.credential),
            _ => None,
        }
    }

    /// Short human-readable location, safe to log.
    pub fn describe(&self) -> String {
        match self {
            EndpointConfig::Database(db) => format!(
                "database:{}:{}/{}/{}",
                db.host,
                db.port,
                db.database,
                db.tables.join(",")
            ),
            EndpointConfig::FlatFile(file) => format!("flatfile:{}", file.path.display()),
        }
    }
}

/// ClickHouse connection settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,

    /// HTTP interface port (default: 8123).
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Database name (default: "default").
    #[serde(default = "default_database")]
    pub database: String,

    /// Username (default: "default").
    #[serde(default = "default_user")]
    pub user: String,

    /// Opaque credential sent with every request.
    #[serde(default)]
    pub credential: Credential,

    /// Use HTTPS (default: false).
    #[serde(default)]
    pub secure: bool,

    /// Tables to read from, or the single table to insert into.
    #[serde(default)]
    pub tables: Vec<String>,
}

impl DatabaseConfig {
    /// Base URL of the HTTP interface.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}/", scheme, self.host, self.port)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("credential", &self.credential)
            .field("secure", &self.secure)
            .field("tables", &self.tables)
            .finish()
    }
}

/// Delimited file settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFileConfig {
    pub path: PathBuf,

    /// Field delimiter, exactly one character (default: ",").
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// First line holds column names (default: true).
    #[serde(default = "default_true")]
    pub header: bool,
}

impl FlatFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: default_delimiter(),
            header: true,
        }
    }

    /// The delimiter as a byte, if it is a single ASCII character.
    pub fn delimiter_byte(&self) -> Option<u8> {
        match self.delimiter.as_bytes() {
            [b] if b.is_ascii() => Some(*b),
            _ => None,
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows per read/write cycle (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum rows returned by a preview (default: 100).
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Batches read ahead of the writer (default: 1).
    #[serde(default = "default_read_ahead")]
    pub read_ahead: usize,

    /// Per-request timeout for database calls in seconds (default: 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Append released sessions to this JSON-lines file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sample_size: default_sample_size(),
            read_ahead: default_read_ahead(),
            request_timeout_secs: default_request_timeout(),
            archive_path: None,
        }
    }
}

fn default_http_port() -> u16 {
    8123
}

fn default_database() -> String {
    "default".to_string()
}

fn default_user() -> String {
    "default".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    1000
}

fn default_sample_size() -> usize {
    100
}

fn default_read_ahead() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    30
}
