//! Type compatibility between ClickHouse types and flat files.
//!
//! Everything here is advisory: no column is rejected, the checker only
//! reports lossy or unknown mappings with a suggested mitigation.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

use crate::core::{ColumnDescriptor, Row, TargetSystem, TypeWarning, Value};

pub const CAST_TO_STRING: &str = "cast to String";
pub const STRIP_NULLS: &str = "strip nulls before export";
pub const SERIALIZE_JSON: &str = "serialize to a JSON string";

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How a base type maps onto a target system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// Value survives unchanged.
    Lossless,
    /// Value is representable only after the suggested mitigation.
    Lossy {
        target_type: &'static str,
        suggestion: &'static str,
    },
}

/// Strip `Nullable(...)` and `LowCardinality(...)` wrappers.
///
/// Returns the inner type and whether any layer was `Nullable`.
pub fn unwrap_type(source_type: &str) -> (&str, bool) {
    let mut current = source_type.trim();
    let mut nullable = false;
    loop {
        if let Some(inner) = strip_wrapper(current, "Nullable") {
            nullable = true;
            current = inner;
        } else if let Some(inner) = strip_wrapper(current, "LowCardinality") {
            current = inner;
        } else {
            return (current, nullable);
        }
    }
}

fn strip_wrapper<'a>(ty: &'a str, wrapper: &str) -> Option<&'a str> {
    ty.strip_prefix(wrapper)?
        .strip_prefix('(')?
        .strip_suffix(')')
        .map(str::trim)
}

/// Type name without parameters: `Decimal(18, 2)` -> `Decimal`.
fn type_head(ty: &str) -> &str {
    ty.split('(').next().unwrap_or(ty).trim()
}

/// Static compatibility table keyed by (base type, target system).
pub fn lookup(base_type: &str, target: TargetSystem) -> Option<Mapping> {
    let head = type_head(base_type);
    match target {
        TargetSystem::FlatFile => match head {
            "String" | "FixedString" | "UUID" | "Bool" | "Boolean" | "Date" | "Date32"
            | "DateTime" | "DateTime64" | "Decimal" | "Decimal32" | "Decimal64"
            | "Decimal128" | "Decimal256" | "Enum" | "Enum8" | "Enum16" | "IPv4" | "IPv6"
            | "Int8" | "Int16" | "Int32" | "UInt8" | "UInt16" | "UInt32" | "Float32"
            | "Float64" => Some(Mapping::Lossless),
            "Int64" | "UInt64" | "Int128" | "UInt128" | "Int256" | "UInt256" => {
                Some(Mapping::Lossy {
                    target_type: "String",
                    suggestion: CAST_TO_STRING,
                })
            }
            "Array" | "Map" | "Tuple" | "Nested" | "JSON" | "Object" => Some(Mapping::Lossy {
                target_type: "String",
                suggestion: SERIALIZE_JSON,
            }),
            _ => None,
        },
        TargetSystem::Database => match head {
            "String" | "FixedString" | "UUID" | "Bool" | "Boolean" | "Date" | "Date32"
            | "DateTime" | "DateTime64" | "Decimal" | "Decimal32" | "Decimal64"
            | "Decimal128" | "Decimal256" | "Enum" | "Enum8" | "Enum16" | "IPv4" | "IPv6"
            | "Int8" | "Int16" | "Int32" | "Int64" | "Int128" | "Int256" | "UInt8"
            | "UInt16" | "UInt32" | "UInt64" | "UInt128" | "UInt256" | "Float32"
            | "Float64" | "Array" | "Map" | "Tuple" | "Nested" | "JSON" | "Object" => {
                Some(Mapping::Lossless)
            }
            _ => None,
        },
    }
}

/// Warnings for moving `columns` into `target`.
pub fn check(columns: &[ColumnDescriptor], target: TargetSystem) -> Vec<TypeWarning> {
    let mut warnings = Vec::new();
    for column in columns {
        let (base, nullable) = unwrap_type(&column.source_type);
        match lookup(base, target) {
            Some(Mapping::Lossless) => {}
            Some(Mapping::Lossy {
                target_type,
                suggestion,
            }) => warnings.push(TypeWarning::new(
                &column.name,
                target_type,
                &column.source_type,
                Some(suggestion),
            )),
            None => warnings.push(TypeWarning::new(
                &column.name,
                "String",
                &column.source_type,
                Some(CAST_TO_STRING),
            )),
        }
        if target == TargetSystem::FlatFile && (nullable || column.nullable) {
            warnings.push(TypeWarning::new(
                &column.name,
                "String",
                &column.source_type,
                Some(STRIP_NULLS),
            ));
        }
    }
    warnings
}

/// Compare source columns with the columns of an existing target table.
pub fn check_against_target(
    columns: &[ColumnDescriptor],
    target_columns: &[ColumnDescriptor],
) -> Vec<TypeWarning> {
    let by_name: HashMap<&str, &ColumnDescriptor> = target_columns
        .iter()
        .map(|c| (c.column.as_str(), c))
        .collect();

    let mut warnings = Vec::new();
    for column in columns {
        let target = match by_name.get(column.name.as_str()) {
            Some(target) => target,
            None => {
                warnings.push(TypeWarning::new(
                    &column.name,
                    "(absent)",
                    &column.source_type,
                    Some("add the column to the target table or deselect it"),
                ));
                continue;
            }
        };

        let (source_base, source_nullable) = unwrap_type(&column.source_type);
        let (target_base, target_nullable) = unwrap_type(&target.source_type);

        if source_base != target_base && type_head(target_base) != "String" {
            let suggestion = format!("cast to {}", target_base);
            warnings.push(TypeWarning::new(
                &column.name,
                &target.source_type,
                &column.source_type,
                Some(suggestion.as_str()),
            ));
        }
        if (source_nullable || column.nullable) && !(target_nullable || target.nullable) {
            warnings.push(TypeWarning::new(
                &column.name,
                &target.source_type,
                &column.source_type,
                Some(STRIP_NULLS),
            ));
        }
    }
    warnings
}

/// Flag sampled values that do not fit their declared column type.
///
/// At most one warning per column.
pub fn check_values(columns: &[ColumnDescriptor], rows: &[Row]) -> Vec<TypeWarning> {
    let mut warnings = Vec::new();
    for (idx, column) in columns.iter().enumerate() {
        let (base, nullable) = unwrap_type(&column.source_type);
        let nullable = nullable || column.nullable;
        for row in rows {
            let value = match row.get(idx) {
                Some(value) => value,
                None => continue,
            };
            if value.is_null() {
                if !nullable {
                    warnings.push(TypeWarning::new(
                        &column.name,
                        &column.source_type,
                        "NULL",
                        Some("fill or drop null values"),
                    ));
                    break;
                }
                continue;
            }
            if !value_conforms(value, base) {
                warnings.push(TypeWarning::new(
                    &column.name,
                    &column.source_type,
                    infer_value_type(value),
                    Some(CAST_TO_STRING),
                ));
                break;
            }
        }
    }
    warnings
}

fn value_conforms(value: &Value, base: &str) -> bool {
    let head = type_head(base);
    let text = value.as_text();
    match head {
        "Int8" | "Int16" | "Int32" | "Int64" | "Int128" | "Int256" | "UInt8" | "UInt16"
        | "UInt32" | "UInt64" | "UInt128" | "UInt256" => integer_conforms(value, head),
        "Float32" | "Float64" | "Decimal" | "Decimal32" | "Decimal64" | "Decimal128"
        | "Decimal256" => match value {
            Value::Int(_) | Value::UInt(_) | Value::Float(_) => true,
            _ => text.map_or(false, |t| t.parse::<f64>().is_ok()),
        },
        "Bool" | "Boolean" => match value {
            Value::Bool(_) => true,
            _ => text.map_or(false, parse_bool),
        },
        "Date" | "Date32" => text.map_or(false, |t| NaiveDate::parse_from_str(t, DATE_FORMAT).is_ok()),
        "DateTime" | "DateTime64" => text.map_or(false, |t| {
            NaiveDateTime::parse_from_str(t, DATETIME_FORMAT).is_ok()
                || NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        }),
        _ => true,
    }
}

/// Inclusive bounds of the integer types that fit in an `i128`.
fn integer_bounds(head: &str) -> Option<(i128, i128)> {
    Some(match head {
        "Int8" => (i8::MIN.into(), i8::MAX.into()),
        "Int16" => (i16::MIN.into(), i16::MAX.into()),
        "Int32" => (i32::MIN.into(), i32::MAX.into()),
        "Int64" => (i64::MIN.into(), i64::MAX.into()),
        "Int128" => (i128::MIN, i128::MAX),
        "UInt8" => (0, u8::MAX.into()),
        "UInt16" => (0, u16::MAX.into()),
        "UInt32" => (0, u32::MAX.into()),
        "UInt64" => (0, u64::MAX.into()),
        _ => return None,
    })
}

fn integer_conforms(value: &Value, head: &str) -> bool {
    let number = match value {
        Value::Int(i) => Some(i128::from(*i)),
        Value::UInt(u) => Some(i128::from(*u)),
        Value::Text(t) => t.trim().parse::<i128>().ok(),
        _ => return false,
    };
    let unsigned = head.starts_with('U');
    match (number, integer_bounds(head)) {
        (Some(n), Some((lo, hi))) => lo <= n && n <= hi,
        (Some(n), None) => !unsigned || n >= 0,
        (None, _) => value.as_text().map_or(false, |t| wide_integer_text(t.trim(), head)),
    }
}

/// Integer text beyond `i128`: only the 128/256-bit types can hold it.
fn wide_integer_text(text: &str, head: &str) -> bool {
    let digits = match head {
        "UInt128" => return text.parse::<u128>().is_ok(),
        "Int256" => text.strip_prefix('-').unwrap_or(text),
        "UInt256" => text,
        _ => return false,
    };
    // 2^256 has 78 decimal digits.
    !digits.is_empty() && digits.len() <= 78 && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_bool(text: &str) -> bool {
    matches!(
        text.to_ascii_lowercase().as_str(),
        "true" | "false" | "1" | "0"
    )
}

fn infer_value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "NULL",
        Value::Bool(_) => "Bool",
        Value::Int(_) => "Int64",
        Value::UInt(_) => "UInt64",
        Value::Float(_) => "Float64",
        Value::Text(t) => infer_type(t),
        Value::Json(_) => "JSON",
    }
}

/// Infer a ClickHouse type for a single flat-file field.
pub fn infer_type(field: &str) -> &'static str {
    let field = field.trim();
    if field.parse::<i64>().is_ok() {
        "Int64"
    } else if field.parse::<f64>().is_ok() {
        "Float64"
    } else if field.eq_ignore_ascii_case("true") || field.eq_ignore_ascii_case("false") {
        "Bool"
    } else if NaiveDate::parse_from_str(field, DATE_FORMAT).is_ok() {
        "Date"
    } else if NaiveDateTime::parse_from_str(field, DATETIME_FORMAT).is_ok() {
        "DateTime"
    } else {
        "String"
    }
}

/// Infer a column type from sampled fields.
///
/// Empty fields make the column nullable and are otherwise ignored.
/// Integer and float samples widen to `Float64`; any other disagreement
/// falls back to `String`.
pub fn infer_column_type<'a>(fields: impl IntoIterator<Item = &'a str>) -> (String, bool) {
    let mut inferred: Option<&'static str> = None;
    let mut nullable = false;
    for field in fields {
        if field.is_empty() {
            nullable = true;
            continue;
        }
        let ty = infer_type(field);
        inferred = Some(match (inferred, ty) {
            (None, ty) => ty,
            (Some(prev), ty) if prev == ty => prev,
            (Some("Int64"), "Float64") | (Some("Float64"), "Int64") => "Float64",
            _ => "String",
        });
    }
    let base = inferred.unwrap_or("String");
    if nullable {
        (format!("Nullable({})", base), true)
    } else {
        (base.to_string(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> ColumnDescriptor {
        ColumnDescriptor::new(name, ty, ty.starts_with("Nullable"))
    }

    #[test]
    fn test_unwrap_type() {
        assert_eq!(unwrap_type("UInt32"), ("UInt32", false));
        assert_eq!(unwrap_type("Nullable(String)"), ("String", true));
        assert_eq!(
            unwrap_type("LowCardinality(Nullable(String))"),
            ("String", true)
        );
        assert_eq!(unwrap_type("Decimal(18, 2)"), ("Decimal(18, 2)", false));
    }

    #[test]
    fn test_lossless_scalars_to_flat_file() {
        let cols = vec![
            col("town", "LowCardinality(String)"),
            col("price", "UInt32"),
            col("date", "Date"),
            col("amount", "Decimal(18, 2)"),
        ];
        assert!(check(&cols, TargetSystem::FlatFile).is_empty());
    }

    #[test]
    fn test_wide_integer_to_flat_file_warns_cast() {
        let warnings = check(&[col("id", "UInt64")], TargetSystem::FlatFile);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some(CAST_TO_STRING));
        assert_eq!(warnings[0].found_type, "UInt64");
        assert_eq!(warnings[0].expected_type, "String");
    }

    #[test]
    fn test_nullable_to_flat_file_warns_strip_nulls() {
        let warnings = check(&[col("note", "Nullable(String)")], TargetSystem::FlatFile);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some(STRIP_NULLS));
    }

    #[test]
    fn test_array_to_flat_file_warns_json() {
        let warnings = check(&[col("tags", "Array(String)")], TargetSystem::FlatFile);
        assert_eq!(warnings[0].suggestion.as_deref(), Some(SERIALIZE_JSON));
    }

    #[test]
    fn test_unknown_type_warns() {
        let warnings = check(&[col("geo", "Point")], TargetSystem::FlatFile);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some(CAST_TO_STRING));

        let warnings = check(&[col("geo", "Point")], TargetSystem::Database);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_inferred_types_to_database_are_lossless() {
        let cols = vec![
            col("a", "Int64"),
            col("b", "Float64"),
            col("c", "Bool"),
            col("d", "Date"),
            col("e", "DateTime"),
            col("f", "Nullable(String)"),
        ];
        assert!(check(&cols, TargetSystem::Database).is_empty());
    }

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type("42"), "Int64");
        assert_eq!(infer_type("4.2"), "Float64");
        assert_eq!(infer_type("TRUE"), "Bool");
        assert_eq!(infer_type("2024-01-31"), "Date");
        assert_eq!(infer_type("2024-01-31 12:00:00"), "DateTime");
        assert_eq!(infer_type("London"), "String");
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(infer_column_type(["1", "2", "3"]), ("Int64".to_string(), false));
        assert_eq!(infer_column_type(["1", "2.5"]), ("Float64".to_string(), false));
        assert_eq!(infer_column_type(["1", "x"]), ("String".to_string(), false));
        assert_eq!(
            infer_column_type(["1", ""]),
            ("Nullable(Int64)".to_string(), true)
        );
        assert_eq!(infer_column_type([]), ("String".to_string(), false));
    }

    #[test]
    fn test_check_values_one_warning_per_column() {
        let cols = vec![col("price", "UInt32")];
        let rows = vec![
            vec![Value::Text("100".into())],
            vec![Value::Text("abc".into())],
            vec![Value::Text("def".into())],
        ];
        let warnings = check_values(&cols, &rows);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].found_type, "String");
    }

    #[test]
    fn test_check_values_null_in_non_nullable() {
        let cols = vec![col("price", "UInt32")];
        let warnings = check_values(&cols, &[vec![Value::Null]]);
        assert_eq!(warnings[0].found_type, "NULL");
    }

    #[test]
    fn test_check_values_accepts_conforming_rows() {
        let cols = vec![col("price", "UInt32"), col("date", "Date"), col("ok", "Bool")];
        let rows = vec![vec![
            Value::UInt(5),
            Value::Text("2024-02-29".into()),
            Value::Bool(true),
        ]];
        assert!(check_values(&cols, &rows).is_empty());
    }

    #[test]
    fn test_check_values_respects_integer_width() {
        let cols = vec![col("small", "Int8"), col("byte", "UInt8"), col("big", "UInt64")];
        let ok = vec![vec![Value::Int(-128), Value::UInt(255), Value::UInt(u64::MAX)]];
        assert!(check_values(&cols, &ok).is_empty());

        let rows = vec![vec![Value::Int(1000), Value::Int(-1), Value::Text("-5".into())]];
        let warnings = check_values(&cols, &rows);
        let flagged: Vec<&str> = warnings.iter().map(|w| w.column.as_str()).collect();
        assert_eq!(flagged, vec!["small", "byte", "big"]);

        let rows = vec![vec![Value::Text("128".into()), Value::Int(256), Value::Int(0)]];
        assert_eq!(check_values(&cols, &rows).len(), 2);
    }

    #[test]
    fn test_check_values_wide_integers() {
        let cols = vec![col("a", "Int64"), col("b", "UInt256"), col("c", "Int128")];
        let huge = "1".repeat(60);
        let rows = vec![vec![
            Value::UInt(u64::MAX),
            Value::Text(huge.clone()),
            Value::Text(huge),
        ]];
        let warnings = check_values(&cols, &rows);
        let flagged: Vec<&str> = warnings.iter().map(|w| w.column.as_str()).collect();
        assert_eq!(flagged, vec!["a", "c"]);
    }

    #[test]
    fn test_check_against_target() {
        let source = vec![col("price", "Int64"), col("town", "String"), col("extra", "Int64")];
        let target = vec![col("price", "UInt32"), col("town", "String")];
        let warnings = check_against_target(&source, &target);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].column, "price");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("cast to UInt32"));
        assert_eq!(warnings[1].expected_type, "(absent)");
    }
}
