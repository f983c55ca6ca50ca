//! Schema resolution over a single table or a join plan.

use std::collections::HashMap;

use tracing::debug;

use crate::adapters::CsvSource;
use crate::config::EndpointConfig;
use crate::core::{CallContext, ColumnDescriptor, ReadScope, SourceAdapter};
use crate::error::{IngestError, Result, ValidationError};
use crate::join::JoinPlan;

/// What a read over `source` covers, given an optional join plan.
pub fn read_scope(source: &EndpointConfig, plan: Option<&JoinPlan>) -> Result<ReadScope> {
    match (source, plan) {
        (EndpointConfig::FlatFile(_), Some(_)) => Err(ValidationError::JoinOnFlatFile.into()),
        (EndpointConfig::FlatFile(file), None) => Ok(ReadScope::Table(CsvSource::table_name(file))),
        (EndpointConfig::Database(_), Some(plan)) => Ok(ReadScope::Join(plan.clone())),
        (EndpointConfig::Database(db), None) => match db.tables.as_slice() {
            [table] => Ok(ReadScope::Table(table.clone())),
            [] => Err(IngestError::invalid("source.tables must name at least one table")),
            _ => Err(IngestError::invalid(
                "multiple source tables need a join specification",
            )),
        },
    }
}

/// Resolve the unified column list for a scope.
///
/// One `list_columns` call per table, in plan order. Column names shared by
/// several joined tables are qualified as `table.column` on every table that
/// has them; nothing is dropped.
pub async fn resolve(
    source: &dyn SourceAdapter,
    ctx: &CallContext,
    scope: &ReadScope,
) -> Result<Vec<ColumnDescriptor>> {
    let tables: Vec<&str> = match scope {
        ReadScope::Table(table) => vec![table.as_str()],
        ReadScope::Join(plan) => plan.tables().collect(),
    };

    let mut columns = Vec::new();
    for table in &tables {
        let mut listed = source.list_columns(ctx, table).await?;
        debug!("Resolved {} columns for {}", listed.len(), table);
        for column in &mut listed {
            if column.table.is_none() {
                column.table = Some(table.to_string());
            }
        }
        columns.extend(listed);
    }

    if tables.len() > 1 {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for column in &columns {
            *counts.entry(column.column.clone()).or_default() += 1;
        }
        for column in &mut columns {
            if counts.get(&column.column).copied().unwrap_or(0) > 1 {
                column.qualify();
            }
        }
    }

    Ok(columns)
}

/// Pick `selected` out of `schema`, preserving selection order.
pub fn select_columns(
    schema: &[ColumnDescriptor],
    selected: &[String],
) -> std::result::Result<Vec<ColumnDescriptor>, ValidationError> {
    if selected.is_empty() {
        return Err(ValidationError::EmptyColumnSelection);
    }
    selected
        .iter()
        .map(|name| {
            schema
                .iter()
                .find(|c| &c.name == name)
                .cloned()
                .ok_or_else(|| ValidationError::UnknownColumn {
                    column: name.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemorySource;
    use crate::config::{DatabaseConfig, FlatFileConfig};
    use crate::core::AdapterError;
    use crate::join::{JoinEdge, JoinSpec, JoinType};

    fn source() -> MemorySource {
        MemorySource::new()
            .with_table(
                "orders",
                vec![
                    ColumnDescriptor::new("id", "UInt64", false),
                    ColumnDescriptor::new("user_id", "UInt64", false),
                    ColumnDescriptor::new("total", "Float64", false),
                ],
                vec![],
            )
            .with_table(
                "users",
                vec![
                    ColumnDescriptor::new("id", "UInt64", false),
                    ColumnDescriptor::new("name", "String", false),
                ],
                vec![],
            )
    }

    fn db(tables: &[&str]) -> EndpointConfig {
        EndpointConfig::Database(DatabaseConfig {
            host: "localhost".into(),
            port: 8123,
            database: "shop".into(),
            user: "default".into(),
            credential: Default::default(),
            secure: false,
            tables: tables.iter().map(|t| t.to_string()).collect(),
        })
    }

    #[tokio::test]
    async fn test_single_table() {
        let scope = read_scope(&db(&["orders"]), None).unwrap();
        let columns = resolve(&source(), &CallContext::default(), &scope).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "user_id", "total"]);
    }

    #[tokio::test]
    async fn test_join_qualifies_collisions() {
        let plan = JoinSpec::new(
            vec!["orders".into(), "users".into()],
            vec![JoinEdge::new("orders", "users", "user_id", "id", JoinType::Inner)],
        )
        .plan()
        .unwrap();
        let scope = read_scope(&db(&["orders", "users"]), Some(&plan)).unwrap();
        let columns = resolve(&source(), &CallContext::default(), &scope).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["orders.id", "user_id", "total", "users.id", "name"]
        );
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let scope = ReadScope::Table("nope".into());
        let err = resolve(&source(), &CallContext::default(), &scope)
            .await
            .unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.kind, crate::classify::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_auth_failure_is_classified() {
        struct Denied;
        #[async_trait::async_trait]
        impl SourceAdapter for Denied {
            fn system(&self) -> crate::core::TargetSystem {
                crate::core::TargetSystem::Database
            }
            async fn check_connection(&self, _: &CallContext) -> crate::core::AdapterResult<()> {
                Ok(())
            }
            async fn list_tables(&self, _: &CallContext) -> crate::core::AdapterResult<Vec<String>> {
                Err(AdapterError::from_status(401, ""))
            }
            async fn list_columns(
                &self,
                _: &CallContext,
                _: &str,
            ) -> crate::core::AdapterResult<Vec<ColumnDescriptor>> {
                Err(AdapterError::from_status(401, ""))
            }
            async fn read_batch(
                &self,
                _: &CallContext,
                _: &crate::core::ReadRequest,
                _: crate::core::Cursor,
                _: usize,
            ) -> crate::core::AdapterResult<crate::core::Batch> {
                unreachable!()
            }
        }

        let err = resolve(&Denied, &CallContext::default(), &ReadScope::Table("t".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Authentication failed"));
    }

    #[test]
    fn test_scope_rules() {
        let file = EndpointConfig::FlatFile(FlatFileConfig::new("/data/prices.csv"));
        assert_eq!(
            read_scope(&file, None).unwrap(),
            ReadScope::Table("prices".into())
        );
        assert!(matches!(
            read_scope(&file, Some(&JoinPlan::single("x"))),
            Err(IngestError::Validation(ValidationError::JoinOnFlatFile))
        ));
        assert!(read_scope(&db(&["a", "b"]), None).is_err());
    }

    #[test]
    fn test_select_columns() {
        let schema = vec![
            ColumnDescriptor::new("price", "UInt32", false),
            ColumnDescriptor::new("date", "Date", false),
        ];
        let picked = select_columns(&schema, &["date".into(), "price".into()]).unwrap();
        assert_eq!(picked[0].name, "date");

        assert_eq!(
            select_columns(&schema, &["nope".into()]).unwrap_err(),
            ValidationError::UnknownColumn {
                column: "nope".into()
            }
        );
        assert_eq!(
            select_columns(&schema, &[]).unwrap_err(),
            ValidationError::EmptyColumnSelection
        );
    }
}
