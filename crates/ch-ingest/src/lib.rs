//! # ch-ingest
//!
//! Transfer orchestration between ClickHouse and delimited flat files.
//!
//! This library provides:
//!
//! - **Schema resolution** over a single table or a validated join plan
//! - **Previews** of a bounded row sample with type compatibility warnings
//! - **Transfer sessions** that move rows in batches with live progress,
//!   cooperative cancellation and classified failures
//! - **Pluggable adapters** for ClickHouse over HTTP, CSV files and
//!   in-memory tables
//!
//! ## Example
//!
//! ```rust,no_run
//! use ch_ingest::{Config, IngestEngine};
//!
//! #[tokio::main]
//! async fn main() -> ch_ingest::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let engine = IngestEngine::from_config(&config);
//!     let id = engine
//!         .start_transfer(config.source, config.target, config.columns, config.join)
//!         .await?;
//!     let report = engine.wait(&id).await?;
//!     println!("{}: {} rows", report.state, report.records_processed);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod archive;
pub mod classify;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod join;
pub mod preview;
pub mod schema;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use adapters::AdapterCatalog;
pub use classify::{ErrorKind, ErrorReport};
pub use config::{Config, Credential, EngineConfig, SourceConfig, TargetConfig};
pub use crate::core::{ColumnDescriptor, TargetSystem, TypeWarning, Value};
pub use engine::{HealthCheckResult, IngestEngine};
pub use error::{IngestError, Result, ValidationError};
pub use join::{JoinEdge, JoinPlan, JoinSpec, JoinType};
pub use preview::Preview;
pub use transfer::{ProgressReport, SessionId, TransferState};
