//! Schema resolver: reconciles incoming record keys with a list's stored
//! columns, and coerces cell values to their column types.

use std::net::Ipv4Addr;

use chrono::NaiveDate;
use serde_json::Value;

use crate::config::CsvOptions;
use crate::decode::DecodedPayload;
use crate::log::RunLog;
use listmill_store::{ColumnDef, ColumnType, ListColumn, SelectedColumn, SourceFormat};

/// Date formats recognized during inference and coercion, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
];

pub struct ResolveContext<'a> {
    pub format: SourceFormat,
    pub auto_create_columns: bool,
    /// Non-empty turns on JSON selection mode.
    pub selected_columns: &'a [SelectedColumn],
    pub csv: &'a CsvOptions,
}

/// The final, ordered column set for a list after an import. Positions are
/// the slice order, so they always renumber to a contiguous range.
#[derive(Debug)]
pub struct ResolvedSchema {
    pub columns: Vec<ColumnDef>,
}

pub fn resolve_schema(
    existing: &[ListColumn],
    payload: &DecodedPayload,
    ctx: &ResolveContext<'_>,
    log: &mut RunLog,
) -> ResolvedSchema {
    let incoming = effective_fields(payload, ctx, log);

    // Selection mode: the selected set intersected with incoming keys wins;
    // everything else is dropped.
    if ctx.format == SourceFormat::Json && !ctx.selected_columns.is_empty() {
        let mut columns = Vec::new();
        for col in existing {
            let selected = ctx.selected_columns.iter().any(|s| s.name == col.name);
            if selected && incoming.iter().any(|f| f == &col.name) {
                columns.push(ColumnDef {
                    name: col.name.clone(),
                    column_type: col.column_type,
                });
            } else {
                log.info(format!(
                    "Dropping column '{}' (not in the selected set)",
                    col.name
                ));
            }
        }
        for selected in ctx.selected_columns {
            let present = columns.iter().any(|c| c.name == selected.name);
            let arrives = incoming.iter().any(|f| f == &selected.name);
            if !present && arrives {
                columns.push(ColumnDef {
                    name: selected.name.clone(),
                    column_type: selected.column_type,
                });
            } else if !arrives {
                log.warn(format!(
                    "Selected column '{}' is absent from the payload",
                    selected.name
                ));
            }
        }
        return ResolvedSchema { columns };
    }

    let mut columns: Vec<ColumnDef> = existing
        .iter()
        .map(|col| ColumnDef {
            name: col.name.clone(),
            column_type: col.column_type,
        })
        .collect();

    // CSV sources drop stored columns missing from the header by default.
    if ctx.format == SourceFormat::Csv && ctx.csv.remove_unused_columns {
        columns.retain(|col| {
            let keep = incoming.iter().any(|f| f == &col.name);
            if !keep {
                log.info(format!(
                    "Dropping column '{}' (absent from the data source)",
                    col.name
                ));
            }
            keep
        });
    }

    for (index, field) in incoming.iter().enumerate() {
        if columns.iter().any(|c| &c.name == field) {
            continue;
        }
        if !ctx.auto_create_columns {
            log.warn(format!(
                "Key '{field}' has no matching column; its values are dropped"
            ));
            continue;
        }
        let column_type = declared_or_inferred_type(field, index, payload, ctx);
        log.info(format!(
            "Creating column '{field}' ({})",
            column_type.as_str()
        ));
        columns.push(ColumnDef {
            name: field.clone(),
            column_type,
        });
    }

    ResolvedSchema { columns }
}

/// Incoming field names after CSV index filtering.
fn effective_fields(
    payload: &DecodedPayload,
    ctx: &ResolveContext<'_>,
    log: &mut RunLog,
) -> Vec<String> {
    if ctx.format == SourceFormat::Csv && !ctx.csv.columns_to_import.is_empty() {
        let mut fields = Vec::new();
        for &index in &ctx.csv.columns_to_import {
            match payload.fields.get(index) {
                Some(name) if !name.is_empty() => fields.push(name.clone()),
                _ => log.warn(format!("Ignoring invalid column index {index}")),
            }
        }
        return fields;
    }
    payload.fields.clone()
}

fn declared_or_inferred_type(
    field: &str,
    _index: usize,
    payload: &DecodedPayload,
    ctx: &ResolveContext<'_>,
) -> ColumnType {
    // CSV column types are declared by header index.
    if ctx.format == SourceFormat::Csv {
        if let Some(header_index) = payload.fields.iter().position(|f| f == field) {
            if let Some(ty) = ctx.csv.column_types.get(&header_index) {
                return *ty;
            }
        }
        return ColumnType::Text;
    }
    payload
        .records
        .iter()
        .find_map(|record| record.get(field))
        .map(infer_type)
        .unwrap_or(ColumnType::Text)
}

/// Guess a column type from a sample value.
fn infer_type(value: &Value) -> ColumnType {
    match value {
        Value::Number(_) => ColumnType::Number,
        Value::Bool(_) => ColumnType::Boolean,
        Value::String(s) => {
            let s = s.trim();
            if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() {
                ColumnType::Date
            } else if s.parse::<Ipv4Addr>().is_ok() {
                ColumnType::Ip
            } else {
                ColumnType::Text
            }
        }
        _ => ColumnType::Text,
    }
}

/// Project one record onto the resolved columns, coercing each value.
pub fn project_record(
    record: &serde_json::Map<String, Value>,
    columns: &[ColumnDef],
) -> Vec<Option<String>> {
    columns
        .iter()
        .map(|col| {
            record
                .get(&col.name)
                .and_then(|value| coerce_value(value, col.column_type))
        })
        .collect()
}

/// Coerce a payload value to its column type's stored representation.
///
/// Numbers that fail to parse become NULL; recognizable dates normalize to
/// ISO `YYYY-MM-DD`, anything else is kept verbatim; IPs are validated on
/// read, not here.
pub fn coerce_value(value: &Value, column_type: ColumnType) -> Option<String> {
    if value.is_null() {
        return None;
    }
    match column_type {
        ColumnType::Text | ColumnType::Ip => Some(value_to_text(value)),
        ColumnType::Number => match value {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<f64>().ok().map(|_| s.to_string())
            }
            _ => None,
        },
        ColumnType::Date => {
            let text = value_to_text(value);
            Some(normalize_date(text.trim()).unwrap_or(text))
        }
        ColumnType::Boolean => match value {
            Value::Bool(b) => Some(b.to_string()),
            Value::String(s) => Some(match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => "true".to_string(),
                "false" | "0" | "no" => "false".to_string(),
                _ => s.clone(),
            }),
            other => Some(value_to_text(other)),
        },
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        nested => serde_json::to_string(nested).unwrap_or_default(),
    }
}

/// Normalize a recognizable date to ISO `YYYY-MM-DD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedPayload;
    use serde_json::json;

    fn payload(records: Value) -> DecodedPayload {
        let records = records
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect();
        DecodedPayload::from_records(records)
    }

    fn existing(names: &[(&str, ColumnType)]) -> Vec<ListColumn> {
        names
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| ListColumn {
                list_id: 1,
                name: name.to_string(),
                position: i as i64,
                column_type: *ty,
            })
            .collect()
    }

    #[test]
    fn auto_create_appends_missing_columns_in_first_seen_order() {
        let payload = payload(json!([{"a": 1, "b": "x"}, {"c": true}]));
        let ctx = ResolveContext {
            format: SourceFormat::Json,
            auto_create_columns: true,
            selected_columns: &[],
            csv: &CsvOptions::default(),
        };
        let schema = resolve_schema(
            &existing(&[("a", ColumnType::Text)]),
            &payload,
            &ctx,
            &mut RunLog::new(),
        );
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        // Existing column keeps its type; new ones are inferred.
        assert_eq!(schema.columns[0].column_type, ColumnType::Text);
        assert_eq!(schema.columns[2].column_type, ColumnType::Boolean);
    }

    #[test]
    fn selection_mode_intersects_and_drops() {
        let payload = payload(json!([{"id": 1, "n": "a", "extra": 2}]));
        let selected = vec![
            SelectedColumn {
                name: "n".into(),
                column_type: ColumnType::Text,
            },
            SelectedColumn {
                name: "missing".into(),
                column_type: ColumnType::Number,
            },
        ];
        let ctx = ResolveContext {
            format: SourceFormat::Json,
            auto_create_columns: true,
            selected_columns: &selected,
            csv: &CsvOptions::default(),
        };
        let schema = resolve_schema(
            &existing(&[("id", ColumnType::Number)]),
            &payload,
            &ctx,
            &mut RunLog::new(),
        );
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["n"]);
    }

    #[test]
    fn csv_removes_unused_columns_by_default() {
        let payload = payload(json!([{"kept": "1"}]));
        let ctx = ResolveContext {
            format: SourceFormat::Csv,
            auto_create_columns: true,
            selected_columns: &[],
            csv: &CsvOptions::default(),
        };
        let schema = resolve_schema(
            &existing(&[("kept", ColumnType::Text), ("stale", ColumnType::Text)]),
            &payload,
            &ctx,
            &mut RunLog::new(),
        );
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["kept"]);

        let keep_all = CsvOptions {
            remove_unused_columns: false,
            ..Default::default()
        };
        let ctx = ResolveContext {
            format: SourceFormat::Csv,
            auto_create_columns: true,
            selected_columns: &[],
            csv: &keep_all,
        };
        let schema = resolve_schema(
            &existing(&[("kept", ColumnType::Text), ("stale", ColumnType::Text)]),
            &payload,
            &ctx,
            &mut RunLog::new(),
        );
        assert_eq!(schema.columns.len(), 2);
    }

    #[test]
    fn csv_index_filter_and_declared_types() {
        let payload = payload(json!([{"a": "1", "b": "2", "c": "3"}]));
        let csv = CsvOptions {
            columns_to_import: vec![0, 2, 9],
            column_types: [(2, ColumnType::Number)].into_iter().collect(),
            ..Default::default()
        };
        let ctx = ResolveContext {
            format: SourceFormat::Csv,
            auto_create_columns: true,
            selected_columns: &[],
            csv: &csv,
        };
        let schema = resolve_schema(&[], &payload, &ctx, &mut RunLog::new());
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(schema.columns[1].column_type, ColumnType::Number);
    }

    #[test]
    fn without_auto_create_unknown_keys_are_dropped() {
        let payload = payload(json!([{"known": "v", "unknown": "w"}]));
        let ctx = ResolveContext {
            format: SourceFormat::Json,
            auto_create_columns: false,
            selected_columns: &[],
            csv: &CsvOptions::default(),
        };
        let mut log = RunLog::new();
        let schema = resolve_schema(
            &existing(&[("known", ColumnType::Text)]),
            &payload,
            &ctx,
            &mut log,
        );
        assert_eq!(schema.columns.len(), 1);
        assert!(log.lines().iter().any(|l| l.contains("unknown")));
    }

    #[test]
    fn coercion_follows_column_types() {
        assert_eq!(
            coerce_value(&json!("30"), ColumnType::Number),
            Some("30".into())
        );
        assert_eq!(coerce_value(&json!("abc"), ColumnType::Number), None);
        assert_eq!(coerce_value(&Value::Null, ColumnType::Text), None);
        assert_eq!(
            coerce_value(&json!("31/05/2024"), ColumnType::Date),
            Some("2024-05-31".into())
        );
        assert_eq!(
            coerce_value(&json!("not a date"), ColumnType::Date),
            Some("not a date".into())
        );
        assert_eq!(
            coerce_value(&json!("YES"), ColumnType::Boolean),
            Some("true".into())
        );
        assert_eq!(
            coerce_value(&json!("999.999.1.1"), ColumnType::Ip),
            Some("999.999.1.1".into())
        );
        assert_eq!(
            coerce_value(&json!({"nested": 1}), ColumnType::Text),
            Some(r#"{"nested":1}"#.into())
        );
    }

    #[test]
    fn projection_aligns_values_with_columns() {
        let record = json!({"b": "2", "a": "1"});
        let columns = vec![ColumnDef::text("a"), ColumnDef::text("b"), ColumnDef::text("c")];
        let row = project_record(record.as_object().unwrap(), &columns);
        assert_eq!(
            row,
            vec![Some("1".to_string()), Some("2".to_string()), None]
        );
    }
}
