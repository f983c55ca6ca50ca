//! ClickHouse SQL rendering.

use crate::core::{ColumnDescriptor, ReadRequest, ReadScope};
use crate::join::JoinPlan;
use crate::typemap;

/// Quote an identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Single-quoted string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// `database`.`table`
pub fn qualify_table(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

fn from_clause(database: &str, scope: &ReadScope) -> String {
    match scope {
        ReadScope::Table(table) => qualify_table(database, table),
        ReadScope::Join(plan) => join_clause(database, plan),
    }
}

fn join_clause(database: &str, plan: &JoinPlan) -> String {
    let mut sql = format!(
        "{} AS {}",
        qualify_table(database, &plan.root),
        quote_ident(&plan.root)
    );
    for step in &plan.steps {
        sql.push_str(&format!(
            " {} JOIN {} AS {} ON {}.{} = {}.{}",
            step.join_type.as_sql(),
            qualify_table(database, &step.table),
            quote_ident(&step.table),
            quote_ident(&step.on_table),
            quote_ident(&step.on_key),
            quote_ident(&step.table),
            quote_ident(&step.key),
        ));
    }
    sql
}

fn select_list(request: &ReadRequest) -> String {
    request
        .columns
        .iter()
        .map(|c| match (&request.scope, &c.table) {
            (ReadScope::Join(_), Some(table)) => format!(
                "{}.{} AS {}",
                quote_ident(table),
                quote_ident(&c.column),
                quote_ident(&c.name)
            ),
            _ => quote_ident(&c.column),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// ClickHouse cannot compare these, so they never appear in ORDER BY.
fn orderable(column: &ColumnDescriptor) -> bool {
    let (base, _) = typemap::unwrap_type(&column.source_type);
    !["Map(", "JSON", "Object(", "AggregateFunction("]
        .iter()
        .any(|prefix| base.starts_with(prefix))
}

/// ORDER BY terms giving every page the same total order: the table's
/// sorting key first (so reads follow the primary index), then each selected
/// column to break ties.
fn order_terms(request: &ReadRequest, sorting_key: Option<&str>) -> Vec<String> {
    let mut terms = Vec::new();
    if let ReadScope::Table(_) = request.scope {
        if let Some(key) = sorting_key.map(str::trim).filter(|k| !k.is_empty()) {
            terms.push(key.to_string());
        }
    }
    for column in request.columns.iter().filter(|c| orderable(c)) {
        let term = match (&request.scope, &column.table) {
            (ReadScope::Join(_), Some(table)) => {
                format!("{}.{}", quote_ident(table), quote_ident(&column.column))
            }
            _ => quote_ident(&column.column),
        };
        terms.push(term);
    }
    terms
}

/// Paged SELECT for a read request.
///
/// `sorting_key` is the raw expression from `system.tables`; it only applies
/// to single-table reads.
pub fn select_sql(
    database: &str,
    request: &ReadRequest,
    sorting_key: Option<&str>,
    offset: u64,
    limit: usize,
) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list(request),
        from_clause(database, &request.scope)
    );
    let terms = order_terms(request, sorting_key);
    if !terms.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }
    sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    sql
}

/// Sorting key of one table, one TabSeparated line.
pub fn sorting_key_sql(database: &str, table: &str) -> String {
    format!(
        "SELECT sorting_key FROM system.tables WHERE database = {} AND name = {} FORMAT TabSeparated",
        quote_literal(database),
        quote_literal(table)
    )
}

pub fn show_tables_sql(database: &str) -> String {
    format!("SHOW TABLES FROM {} FORMAT TabSeparated", quote_ident(database))
}

/// Row count for a read request.
pub fn count_sql(database: &str, request: &ReadRequest) -> String {
    format!("SELECT count() FROM {}", from_clause(database, &request.scope))
}

pub fn describe_sql(database: &str, table: &str) -> String {
    format!("DESCRIBE TABLE {}", qualify_table(database, table))
}

/// INSERT header; rows follow in the request body.
pub fn insert_sql(database: &str, table: &str, columns: &[String]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) FORMAT JSONCompactEachRow",
        qualify_table(database, table),
        cols
    )
}
