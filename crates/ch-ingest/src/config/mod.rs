//! Configuration loading and validation.

mod types;
pub mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// SHA256 of the configuration, used to correlate logs and archive records.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::JoinType;

    const YAML: &str = r#"
source:
  type: database
  host: localhost
  database: uk
  credential: abc123
  tables: [price_paid]
target:
  type: flatfile
  path: /tmp/out.csv
columns: [price, date]
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        match &config.source {
            EndpointConfig::Database(db) => {
                assert_eq!(db.port, 8123);
                assert_eq!(db.user, "default");
                assert_eq!(db.credential.expose(), "abc123");
            }
            other => panic!("unexpected source {:?}", other),
        }
        match &config.target {
            EndpointConfig::FlatFile(file) => {
                assert_eq!(file.delimiter, ",");
                assert!(file.header);
            }
            other => panic!("unexpected target {:?}", other),
        }
        assert_eq!(config.engine.batch_size, 1000);
        assert_eq!(config.engine.sample_size, 100);
    }

    #[test]
    fn test_from_yaml_with_join() {
        let yaml = format!(
            "{}join:\n  tables: [t1, t2]\n  edges:\n    - {{ left_table: t1, right_table: t2, left_key: id, right_key: t1_id, join_type: LEFT }}\n",
            YAML
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let join = config.join.unwrap();
        assert_eq!(join.edges[0].join_type, JoinType::Left);
    }

    #[test]
    fn test_unknown_endpoint_type_rejected() {
        let yaml = YAML.replace("type: flatfile", "type: parquet");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_hash_is_stable() {
        let a = Config::from_yaml(YAML).unwrap();
        let b = Config::from_yaml(YAML).unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }
}
