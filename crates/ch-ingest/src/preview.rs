//! Bounded sampling of source rows with type checks.

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::{
    CallContext, ColumnDescriptor, Cursor, ReadRequest, ReadScope, Row, SourceAdapter,
    TargetSystem, TypeWarning,
};
use crate::error::Result;
use crate::schema;
use crate::typemap;

/// Sample rows plus the warnings they produced.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    /// Selected columns, each with its first non-null sample.
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
    pub warnings: Vec<TypeWarning>,
}

/// Read at most `bound` rows of `selected` and check them against `target`.
///
/// A single bounded read; nothing is cached between calls.
pub async fn sample(
    source: &dyn SourceAdapter,
    ctx: &CallContext,
    scope: ReadScope,
    resolved: &[ColumnDescriptor],
    selected: &[String],
    bound: usize,
    target: TargetSystem,
) -> Result<Preview> {
    let mut columns = schema::select_columns(resolved, selected)?;
    let request = ReadRequest::new(scope, columns.clone());

    let batch = source
        .read_batch(ctx, &request, Cursor::start(), bound)
        .await?;
    let mut rows = batch.rows;
    rows.truncate(bound);
    debug!("Preview read {} rows (bound {})", rows.len(), bound);

    for (idx, column) in columns.iter_mut().enumerate() {
        column.sample_value = rows
            .iter()
            .filter_map(|row| row.get(idx))
            .find(|v| !v.is_null())
            .cloned();
    }

    let mut warnings = typemap::check(&columns, target);
    warnings.extend(typemap::check_values(&columns, &rows));
    for warning in &warnings {
        warn!("Type warning: {}", warning);
    }

    Ok(Preview {
        columns,
        rows,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemorySource;
    use crate::core::Value;

    fn source(n: i64) -> MemorySource {
        let rows = (0..n)
            .map(|i| {
                vec![
                    Value::Int(i),
                    Value::Text(format!("2024-01-{:02}", (i % 28) + 1)),
                    if i == 0 { Value::Null } else { Value::Text("x".into()) },
                ]
            })
            .collect();
        MemorySource::new().with_table(
            "price_paid",
            vec![
                ColumnDescriptor::new("price", "UInt32", false),
                ColumnDescriptor::new("date", "Date", false),
                ColumnDescriptor::new("note", "Nullable(String)", true),
            ],
            rows,
        )
    }

    async fn run(source: &MemorySource, selected: &[&str], bound: usize) -> Preview {
        let ctx = CallContext::default();
        let scope = ReadScope::Table("price_paid".into());
        let resolved = schema::resolve(source, &ctx, &scope).await.unwrap();
        let selected: Vec<String> = selected.iter().map(|s| s.to_string()).collect();
        sample(source, &ctx, scope, &resolved, &selected, bound, TargetSystem::FlatFile)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_preview_never_exceeds_bound() {
        let source = source(5000);
        let preview = run(&source, &["price", "date"], 100).await;
        assert_eq!(preview.rows.len(), 100);
        assert_eq!(source.reads(), 1);
    }

    #[tokio::test]
    async fn test_preview_small_table() {
        let preview = run(&source(7), &["date"], 100).await;
        assert_eq!(preview.rows.len(), 7);
        assert_eq!(preview.columns.len(), 1);
        assert!(preview.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_sample_value_skips_nulls() {
        let preview = run(&source(3), &["note"], 100).await;
        assert_eq!(preview.columns[0].sample_value, Some(Value::Text("x".into())));
        // nullable column into a flat file
        assert_eq!(preview.warnings.len(), 1);
        assert_eq!(
            preview.warnings[0].suggestion.as_deref(),
            Some(typemap::STRIP_NULLS)
        );
    }
}
