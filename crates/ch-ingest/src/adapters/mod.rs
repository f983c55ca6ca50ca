//! Concrete adapters and the catalog that builds them from configuration.
//!
//! The [`AdapterCatalog`] is constructed explicitly and handed to the engine,
//! so tests can swap in in-memory adapters without touching global state.

pub mod clickhouse;
pub mod dialect;
pub mod flatfile;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{EndpointConfig, EngineConfig};
use crate::core::{AdapterError, AdapterResult, SourceAdapter, TargetAdapter, TargetSystem};

pub use clickhouse::ClickHouseAdapter;
pub use flatfile::{CsvSource, CsvTarget};
pub use memory::{MemorySource, MemoryTarget};

/// Builds adapters for one kind of endpoint.
pub trait AdapterFactory: Send + Sync {
    fn source(&self, config: &EndpointConfig, engine: &EngineConfig) -> AdapterResult<Arc<dyn SourceAdapter>>;

    fn target(&self, config: &EndpointConfig, engine: &EngineConfig) -> AdapterResult<Arc<dyn TargetAdapter>>;
}

/// Factory for ClickHouse over HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClickHouseFactory;

impl AdapterFactory for ClickHouseFactory {
    fn source(&self, config: &EndpointConfig, engine: &EngineConfig) -> AdapterResult<Arc<dyn SourceAdapter>> {
        match config {
            EndpointConfig::Database(db) => Ok(Arc::new(ClickHouseAdapter::new(db, engine)?)),
            other => Err(mismatch(other, TargetSystem::Database)),
        }
    }

    fn target(&self, config: &EndpointConfig, engine: &EngineConfig) -> AdapterResult<Arc<dyn TargetAdapter>> {
        match config {
            EndpointConfig::Database(db) => Ok(Arc::new(ClickHouseAdapter::new(db, engine)?)),
            other => Err(mismatch(other, TargetSystem::Database)),
        }
    }
}

/// Factory for delimited files.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatFileFactory;

impl AdapterFactory for FlatFileFactory {
    fn source(&self, config: &EndpointConfig, engine: &EngineConfig) -> AdapterResult<Arc<dyn SourceAdapter>> {
        match config {
            EndpointConfig::FlatFile(file) => {
                Ok(Arc::new(CsvSource::new(file.clone(), engine.sample_size)))
            }
            other => Err(mismatch(other, TargetSystem::FlatFile)),
        }
    }

    fn target(&self, config: &EndpointConfig, _engine: &EngineConfig) -> AdapterResult<Arc<dyn TargetAdapter>> {
        match config {
            EndpointConfig::FlatFile(file) => Ok(Arc::new(CsvTarget::new(file.clone()))),
            other => Err(mismatch(other, TargetSystem::FlatFile)),
        }
    }
}

/// Hands out shared, pre-built in-memory adapters regardless of config details.
#[derive(Debug, Default, Clone)]
pub struct MemoryFactory {
    pub source: Option<Arc<MemorySource>>,
    pub target: Option<Arc<MemoryTarget>>,
}

impl AdapterFactory for MemoryFactory {
    fn source(&self, _config: &EndpointConfig, _engine: &EngineConfig) -> AdapterResult<Arc<dyn SourceAdapter>> {
        match &self.source {
            Some(source) => Ok(source.clone()),
            None => Err(AdapterError::unreachable("no in-memory source registered")),
        }
    }

    fn target(&self, _config: &EndpointConfig, _engine: &EngineConfig) -> AdapterResult<Arc<dyn TargetAdapter>> {
        match &self.target {
            Some(target) => Ok(target.clone()),
            None => Err(AdapterError::unreachable("no in-memory target registered")),
        }
    }
}

fn mismatch(config: &EndpointConfig, expected: TargetSystem) -> AdapterError {
    AdapterError::server(format!(
        "{} factory cannot build an adapter for {}",
        expected,
        config.system()
    ))
}

/// Registry of adapter factories keyed by endpoint kind.
#[derive(Default, Clone)]
pub struct AdapterCatalog {
    source_factories: HashMap<TargetSystem, Arc<dyn AdapterFactory>>,
    target_factories: HashMap<TargetSystem, Arc<dyn AdapterFactory>>,
}

impl AdapterCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the ClickHouse and flat-file adapters registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(TargetSystem::Database, Arc::new(ClickHouseFactory));
        catalog.register(TargetSystem::FlatFile, Arc::new(FlatFileFactory));
        catalog
    }

    /// Use `factory` for both sources and targets of `system`.
    pub fn register(&mut self, system: TargetSystem, factory: Arc<dyn AdapterFactory>) {
        self.source_factories.insert(system, factory.clone());
        self.target_factories.insert(system, factory);
    }

    pub fn register_source(&mut self, system: TargetSystem, factory: Arc<dyn AdapterFactory>) {
        self.source_factories.insert(system, factory);
    }

    pub fn register_target(&mut self, system: TargetSystem, factory: Arc<dyn AdapterFactory>) {
        self.target_factories.insert(system, factory);
    }

    pub fn source(&self, config: &EndpointConfig, engine: &EngineConfig) -> AdapterResult<Arc<dyn SourceAdapter>> {
        let system = config.system();
        self.source_factories
            .get(&system)
            .ok_or_else(|| AdapterError::server(format!("no source adapter registered for {}", system)))?
            .source(config, engine)
    }

    pub fn target(&self, config: &EndpointConfig, engine: &EngineConfig) -> AdapterResult<Arc<dyn TargetAdapter>> {
        let system = config.system();
        self.target_factories
            .get(&system)
            .ok_or_else(|| AdapterError::server(format!("no target adapter registered for {}", system)))?
            .target(config, engine)
    }

    pub fn has_source(&self, system: TargetSystem) -> bool {
        self.source_factories.contains_key(&system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlatFileConfig;

    #[test]
    fn test_builtins_cover_both_systems() {
        let catalog = AdapterCatalog::with_builtins();
        assert!(catalog.has_source(TargetSystem::Database));
        assert!(catalog.has_source(TargetSystem::FlatFile));

        let config = EndpointConfig::FlatFile(FlatFileConfig::new("x.csv"));
        let source = catalog.source(&config, &EngineConfig::default()).unwrap();
        assert_eq!(source.system(), TargetSystem::FlatFile);
    }

    #[test]
    fn test_empty_catalog_errors() {
        let catalog = AdapterCatalog::new();
        let config = EndpointConfig::FlatFile(FlatFileConfig::new("x.csv"));
        assert!(catalog.target(&config, &EngineConfig::default()).is_err());
    }
}
