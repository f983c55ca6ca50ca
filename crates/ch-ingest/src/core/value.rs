//! Row values exchanged between adapters.
//!
//! Values are deliberately loose: ClickHouse returns JSON and flat files
//! return text, so the engine moves whatever the source produced and leaves
//! interpretation to the target adapter.

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

/// A single cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    /// Composite values (arrays, maps, tuples) kept in JSON form.
    Json(serde_json::Value),
}

/// One row of values, ordered like the selected columns.
pub type Row = Vec<Value>;

impl Value {
    /// Convert a decoded JSON cell.
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }

    /// Convert a flat-file field. Empty fields become NULL.
    pub fn from_field(field: &str) -> Self {
        if field.is_empty() {
            Value::Null
        } else {
            Value::Text(field.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// JSON form, used for ClickHouse inserts.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::UInt(u) => serde_json::Value::from(*u),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }

    /// Text form for a flat-file field. NULL renders as an empty field.
    pub fn to_field(&self) -> Cow<'_, str> {
        match self {
            Value::Null => Cow::Borrowed(""),
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Value::Int(i) => Cow::Owned(i.to_string()),
            Value::UInt(u) => Cow::Owned(u.to_string()),
            Value::Float(f) => Cow::Owned(f.to_string()),
            Value::Json(v) => Cow::Owned(v.to_string()),
        }
    }

    /// Text view of the value when it is textual, for type conformance checks.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            other => f.write_str(&other.to_field()),
        }
    }
}

/// Position in a source result set, counted in rows from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cursor(u64);

impl Cursor {
    pub fn start() -> Self {
        Cursor(0)
    }

    pub fn at(offset: u64) -> Self {
        Cursor(offset)
    }

    pub fn offset(&self) -> u64 {
        self.0
    }

    /// Cursor after consuming `rows` more rows.
    pub fn advance(&self, rows: usize) -> Self {
        Cursor(self.0 + rows as u64)
    }
}

/// Rows returned by one `read_batch` call.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub rows: Vec<Row>,
    /// Where the next read starts, or `None` once the source is exhausted.
    pub next: Option<Cursor>,
}

impl Batch {
    /// Build a batch, deriving the next cursor from a full page.
    pub fn page(rows: Vec<Row>, cursor: Cursor, limit: usize) -> Self {
        let next = if limit > 0 && rows.len() >= limit {
            Some(cursor.advance(rows.len()))
        } else {
            None
        };
        Self { rows, next }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_numbers() {
        assert_eq!(Value::from_json(json!(42)), Value::Int(42));
        assert_eq!(Value::from_json(json!(u64::MAX)), Value::UInt(u64::MAX));
        assert_eq!(Value::from_json(json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from_json(json!(null)), Value::Null);
    }

    #[test]
    fn test_composite_values_render_as_json() {
        let v = Value::from_json(json!([1, 2, 3]));
        assert_eq!(v.to_field(), "[1,2,3]");
    }

    #[test]
    fn test_empty_field_is_null() {
        assert!(Value::from_field("").is_null());
        assert_eq!(Value::from_field("x"), Value::Text("x".into()));
        assert_eq!(Value::Null.to_field(), "");
    }

    #[test]
    fn test_page_cursor() {
        let full = Batch::page(vec![vec![Value::Int(1)]; 10], Cursor::at(20), 10);
        assert_eq!(full.next, Some(Cursor::at(30)));

        let short = Batch::page(vec![vec![Value::Int(1)]; 3], Cursor::at(30), 10);
        assert_eq!(short.next, None);
    }
}
