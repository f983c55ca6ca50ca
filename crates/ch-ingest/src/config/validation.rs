//! Configuration validation.

use std::collections::HashSet;

use super::{Config, EndpointConfig, EngineConfig};
use crate::error::{Result, ValidationError};

type Check = std::result::Result<(), ValidationError>;

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig(message.into())
}

/// Validate the configuration.
///
/// The source may omit its tables, so a config can be used to list them;
/// verbs that read rows check for a table selection themselves.
pub fn validate(config: &Config) -> Result<()> {
    validate_location("source", &config.source)?;
    validate_endpoint("target", &config.target)?;
    validate_pair(&config.source, &config.target)?;
    validate_engine(&config.engine)?;

    if !config.columns.is_empty() {
        validate_columns(&config.columns)?;
    }

    if config.join.is_some() {
        if let EndpointConfig::FlatFile(_) = config.source {
            return Err(ValidationError::JoinOnFlatFile.into());
        }
    }

    Ok(())
}

/// Validate one side of a transfer. `side` prefixes error messages.
pub fn validate_endpoint(side: &str, endpoint: &EndpointConfig) -> Check {
    validate_location(side, endpoint)?;
    if let EndpointConfig::Database(db) = endpoint {
        if db.tables.is_empty() {
            return Err(invalid(format!("{}.tables must name at least one table", side)));
        }
    }
    Ok(())
}

/// Validate how to reach an endpoint, without requiring a table selection.
pub fn validate_location(side: &str, endpoint: &EndpointConfig) -> Check {
    match endpoint {
        EndpointConfig::Database(db) => {
            if db.host.is_empty() {
                return Err(invalid(format!("{}.host is required", side)));
            }
            if db.database.is_empty() {
                return Err(invalid(format!("{}.database is required", side)));
            }
            if db.user.is_empty() {
                return Err(invalid(format!("{}.user is required", side)));
            }
            if db.port == 0 {
                return Err(invalid(format!("{}.port must be non-zero", side)));
            }
            if db.tables.iter().any(|t| t.trim().is_empty()) {
                return Err(invalid(format!("{}.tables contains an empty name", side)));
            }
        }
        EndpointConfig::FlatFile(file) => {
            if file.path.as_os_str().is_empty() {
                return Err(invalid(format!("{}.path is required", side)));
            }
            if file.delimiter.is_empty() {
                return Err(invalid(format!("{}.delimiter must not be empty", side)));
            }
            if file.delimiter_byte().is_none() {
                return Err(invalid(format!(
                    "{}.delimiter must be a single ASCII character, got '{}'",
                    side, file.delimiter
                )));
            }
        }
    }
    Ok(())
}

/// Source and target must not be the same file.
pub fn validate_pair(source: &EndpointConfig, target: &EndpointConfig) -> Check {
    if let (EndpointConfig::FlatFile(src), EndpointConfig::FlatFile(dst)) = (source, target) {
        if src.path == dst.path {
            return Err(invalid("source and target cannot be the same file"));
        }
    }
    Ok(())
}

pub fn validate_engine(engine: &EngineConfig) -> Check {
    if engine.batch_size == 0 {
        return Err(invalid("engine.batch_size must be at least 1"));
    }
    if engine.sample_size == 0 {
        return Err(invalid("engine.sample_size must be at least 1"));
    }
    if engine.read_ahead == 0 {
        return Err(invalid("engine.read_ahead must be at least 1"));
    }
    if engine.request_timeout_secs == 0 {
        return Err(invalid("engine.request_timeout_secs must be at least 1"));
    }
    Ok(())
}

/// Selection must be non-empty and free of duplicates.
pub fn validate_columns(columns: &[String]) -> Check {
    if columns.is_empty() {
        return Err(ValidationError::EmptyColumnSelection);
    }
    let mut seen = HashSet::with_capacity(columns.len());
    for column in columns {
        if column.trim().is_empty() {
            return Err(invalid("column names must not be empty"));
        }
        if !seen.insert(column.as_str()) {
            return Err(ValidationError::DuplicateColumn {
                column: column.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credential, DatabaseConfig, FlatFileConfig};
    use crate::join::{JoinEdge, JoinSpec, JoinType};

    fn valid_config() -> Config {
        Config {
            source: EndpointConfig::Database(DatabaseConfig {
                host: "localhost".to_string(),
                port: 8123,
                database: "uk".to_string(),
                user: "default".to_string(),
                credential: Credential::new("secret-token"),
                secure: false,
                tables: vec!["price_paid".to_string()],
            }),
            target: EndpointConfig::FlatFile(FlatFileConfig::new("out.csv")),
            columns: vec!["price".to_string(), "date".to_string()],
            join: None,
            engine: EngineConfig::default(),
        }
    }

    fn database(config: &mut Config) -> &mut DatabaseConfig {
        match &mut config.source {
            EndpointConfig::Database(db) => db,
            EndpointConfig::FlatFile(_) => panic!("expected database source"),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        database(&mut config).host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_tables() {
        let mut config = valid_config();
        database(&mut config).tables.clear();
        assert!(validate(&config).is_ok());
        assert!(validate_location("source", &config.source).is_ok());
        let err = validate_endpoint("source", &config.source).unwrap_err();
        assert!(err.to_string().contains("source.tables must name at least one table"));
    }

    #[test]
    fn test_empty_delimiter_rejected() {
        let mut config = valid_config();
        config.target = EndpointConfig::FlatFile(FlatFileConfig {
            delimiter: String::new(),
            ..FlatFileConfig::new("out.csv")
        });
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("delimiter must not be empty"));
    }

    #[test]
    fn test_multi_char_delimiter_rejected() {
        let mut config = valid_config();
        config.target = EndpointConfig::FlatFile(FlatFileConfig {
            delimiter: "||".to_string(),
            ..FlatFileConfig::new("out.csv")
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_file_rejected() {
        let mut config = valid_config();
        config.source = EndpointConfig::FlatFile(FlatFileConfig::new("out.csv"));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut config = valid_config();
        config.columns = vec!["price".into(), "price".into()];
        assert!(matches!(
            validate(&config),
            Err(crate::IngestError::Validation(ValidationError::DuplicateColumn { .. }))
        ));
    }

    #[test]
    fn test_join_on_flat_file_rejected() {
        let mut config = valid_config();
        config.source = EndpointConfig::FlatFile(FlatFileConfig::new("in.csv"));
        config.join = Some(JoinSpec {
            tables: vec!["a".into(), "b".into()],
            edges: vec![JoinEdge::new("a", "b", "id", "id", JoinType::Inner)],
        });
        assert!(matches!(
            validate(&config),
            Err(crate::IngestError::Validation(ValidationError::JoinOnFlatFile))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = valid_config();
        config.engine.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_credential() {
        let config = valid_config();
        let debug_output = format!("{:?}", config.source);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("secret-token"),
            "Debug output should not contain actual credential value"
        );
    }
}
