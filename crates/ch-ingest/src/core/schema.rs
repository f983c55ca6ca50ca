//! Column metadata and type warnings.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// The two kinds of system the engine moves data between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetSystem {
    /// A typed columnar database (ClickHouse).
    Database,
    /// An untyped delimited file.
    #[serde(rename = "flatfile")]
    FlatFile,
}

impl TargetSystem {
    /// The other system, the natural counterpart for a transfer.
    pub fn opposite(&self) -> Self {
        match self {
            TargetSystem::Database => TargetSystem::FlatFile,
            TargetSystem::FlatFile => TargetSystem::Database,
        }
    }
}

impl fmt::Display for TargetSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSystem::Database => f.write_str("database"),
            TargetSystem::FlatFile => f.write_str("flatfile"),
        }
    }
}

/// Column metadata as reported by a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDescriptor {
    /// Name, unique within the resolved schema. Qualified as `table.column`
    /// when two joined tables share a column name.
    pub name: String,
    /// Column name inside its table.
    pub column: String,
    /// Originating table, when the source has tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Type in the source system's own notation.
    pub source_type: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_value: Option<Value>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>, nullable: bool) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            table: None,
            source_type: source_type.into(),
            nullable,
            sample_value: None,
        }
    }

    /// Attach the originating table.
    pub fn in_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Rename to `table.column`.
    pub fn qualify(&mut self) {
        if let Some(table) = &self.table {
            self.name = format!("{}.{}", table, self.column);
        }
    }
}

/// Advisory note about a column that may not survive the transfer intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeWarning {
    pub column: String,
    /// Representation the target will use.
    pub expected_type: String,
    /// Type reported by the source.
    pub found_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl TypeWarning {
    pub fn new(
        column: impl Into<String>,
        expected_type: impl Into<String>,
        found_type: impl Into<String>,
        suggestion: Option<&str>,
    ) -> Self {
        Self {
            column: column.into(),
            expected_type: expected_type.into(),
            found_type: found_type.into(),
            suggestion: suggestion.map(str::to_string),
        }
    }
}

impl fmt::Display for TypeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.column, self.found_type, self.expected_type
        )?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualify_uses_table() {
        let mut col = ColumnDescriptor::new("id", "UInt32", false).in_table("orders");
        col.qualify();
        assert_eq!(col.name, "orders.id");
        assert_eq!(col.column, "id");
    }

    #[test]
    fn test_target_system_serde_names() {
        assert_eq!(
            serde_json::to_string(&TargetSystem::FlatFile).unwrap(),
            "\"flatfile\""
        );
        assert_eq!(TargetSystem::Database.opposite(), TargetSystem::FlatFile);
    }
}
