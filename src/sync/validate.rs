//! Structural validation of interchange documents.
//!
//! Serde alone would reject a malformed document, but its messages point at
//! byte offsets. Validation walks the raw JSON first so the error names the
//! table and field at fault.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::storage::value::json_type_name;
use crate::sync::types::{JsonDatabase, SyncMode};

const DOCUMENT_KEYS: &[&str] = &[
    "database",
    "version",
    "encrypted",
    "mode",
    "tables",
    "views",
    "overwrite",
];
const TABLE_KEYS: &[&str] = &["name", "schema", "indexes", "triggers", "values"];
const COLUMN_KEYS: &[&str] = &["column", "foreignkey", "constraint", "value"];
const INDEX_KEYS: &[&str] = &["name", "value", "mode", "condition"];
const TRIGGER_KEYS: &[&str] = &["name", "timeevent", "condition", "logic"];
const VIEW_KEYS: &[&str] = &["name", "value"];

/// Check `text` is a well-formed document, without side effects.
///
/// # Errors
///
/// Returns `Validation` naming the first defect.
pub fn is_json_valid(text: &str) -> Result<()> {
    parse_document(text).map(|_| ())
}

/// Parse and validate a document.
///
/// # Errors
///
/// Returns `Validation` naming the first defect.
pub fn parse_document(text: &str) -> Result<JsonDatabase> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| Error::Validation(format!("document is not valid JSON: {e}")))?;
    validate_document(&raw)?;
    serde_json::from_value(raw).map_err(|e| Error::Validation(e.to_string()))
}

/// Validate an already parsed document.
///
/// # Errors
///
/// Returns `Validation` naming the first defect.
pub fn validate_document(raw: &Value) -> Result<()> {
    let doc = as_object(raw, "document")?;
    check_keys(doc, DOCUMENT_KEYS, "document")?;

    let database = require_str(doc, "database", "document")?;
    if database.trim().is_empty() {
        return Err(invalid("document: database must not be empty"));
    }
    let version = require(doc, "version", "document")?
        .as_i64()
        .ok_or_else(|| invalid("document: version must be an integer"))?;
    if version < 0 {
        return Err(invalid("document: version must be >= 0"));
    }
    require_bool(doc, "encrypted", "document")?;
    optional_bool(doc, "overwrite", "document")?;

    let mode = require_str(doc, "mode", "document")?;
    let mode: SyncMode = mode
        .parse()
        .map_err(|_| invalid(format!("document: mode must be full or partial, got {mode}")))?;

    let tables = require_array(doc, "tables", "document")?;
    if tables.is_empty() && mode == SyncMode::Full {
        return Err(invalid("document: tables must not be empty"));
    }
    for (i, table) in tables.iter().enumerate() {
        validate_table(table, i, mode)?;
    }

    if let Some(views) = doc.get("views") {
        let views = views
            .as_array()
            .ok_or_else(|| invalid("document: views must be an array"))?;
        for (i, view) in views.iter().enumerate() {
            let ctx = format!("views[{i}]");
            let view = as_object(view, &ctx)?;
            check_keys(view, VIEW_KEYS, &ctx)?;
            require_str(view, "name", &ctx)?;
            require_str(view, "value", &ctx)?;
        }
    }
    Ok(())
}

fn validate_table(raw: &Value, position: usize, mode: SyncMode) -> Result<()> {
    let ctx = format!("tables[{position}]");
    let table = as_object(raw, &ctx)?;
    check_keys(table, TABLE_KEYS, &ctx)?;
    let name = require_str(table, "name", &ctx)?;
    let ctx = format!("table {name}");

    let schema = optional_array(table, "schema", &ctx)?;
    for (i, column) in schema.iter().enumerate() {
        validate_column(column, &format!("{ctx} schema[{i}]"))?;
    }

    for (i, index) in optional_array(table, "indexes", &ctx)?.iter().enumerate() {
        let ctx = format!("{ctx} indexes[{i}]");
        let index = as_object(index, &ctx)?;
        check_keys(index, INDEX_KEYS, &ctx)?;
        require_str(index, "name", &ctx)?;
        require_str(index, "value", &ctx)?;
        if let Some(m) = index.get("mode") {
            if !m.as_str().is_some_and(|m| m.eq_ignore_ascii_case("UNIQUE")) {
                return Err(invalid(format!("{ctx}: mode must be UNIQUE")));
            }
        }
        if index.get("condition").is_some_and(|c| !c.is_string()) {
            return Err(invalid(format!("{ctx}: condition must be a string")));
        }
    }

    for (i, trigger) in optional_array(table, "triggers", &ctx)?.iter().enumerate() {
        let ctx = format!("{ctx} triggers[{i}]");
        let trigger = as_object(trigger, &ctx)?;
        check_keys(trigger, TRIGGER_KEYS, &ctx)?;
        require_str(trigger, "name", &ctx)?;
        require_str(trigger, "timeevent", &ctx)?;
        require_str(trigger, "logic", &ctx)?;
        if let Some(c) = trigger.get("condition") {
            if !c.is_string() {
                return Err(invalid(format!("{ctx}: condition must be a string")));
            }
        }
    }

    let values = optional_array(table, "values", &ctx)?;
    if !values.is_empty() && schema.is_empty() && mode == SyncMode::Full {
        return Err(invalid(format!("{ctx}: has values but no schema")));
    }
    let mut width = None;
    for (r, row) in values.iter().enumerate() {
        let cells = row
            .as_array()
            .ok_or_else(|| invalid(format!("{ctx} values[{r}]: row must be an array")))?;
        if *width.get_or_insert(cells.len()) != cells.len() {
            return Err(invalid(format!(
                "{ctx} values[{r}]: row has {} cells, expected {}",
                cells.len(),
                width.unwrap_or_default()
            )));
        }
        for (c, cell) in cells.iter().enumerate() {
            if matches!(cell, Value::Bool(_) | Value::Array(_) | Value::Object(_)) {
                return Err(invalid(format!(
                    "{ctx} values[{r}][{c}]: {} is not a storable cell",
                    json_type_name(cell)
                )));
            }
        }
    }

    let bare = TABLE_KEYS[1..]
        .iter()
        .all(|k| table.get(*k).and_then(Value::as_array).is_none_or(Vec::is_empty));
    if bare {
        return Err(invalid(format!("{ctx}: has nothing but a name")));
    }
    Ok(())
}

fn validate_column(raw: &Value, ctx: &str) -> Result<()> {
    let column = as_object(raw, ctx)?;
    check_keys(column, COLUMN_KEYS, ctx)?;
    let kinds = ["column", "foreignkey", "constraint"]
        .iter()
        .filter(|k| column.contains_key(**k))
        .count();
    if kinds != 1 {
        return Err(invalid(format!(
            "{ctx}: needs exactly one of column, foreignkey or constraint"
        )));
    }
    for key in ["column", "foreignkey", "constraint"] {
        if column.contains_key(key) {
            require_str(column, key, ctx)?;
        }
    }
    require_str(column, "value", ctx)?;
    Ok(())
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Validation(msg.into())
}

fn as_object<'a>(value: &'a Value, ctx: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| invalid(format!("{ctx}: expected an object, found {}", json_type_name(value))))
}

fn check_keys(obj: &Map<String, Value>, allowed: &[&str], ctx: &str) -> Result<()> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(invalid(format!("{ctx}: unknown key {key}"))),
        None => Ok(()),
    }
}

fn require<'a>(obj: &'a Map<String, Value>, key: &str, ctx: &str) -> Result<&'a Value> {
    obj.get(key)
        .ok_or_else(|| invalid(format!("{ctx}: missing {key}")))
}

fn require_str<'a>(obj: &'a Map<String, Value>, key: &str, ctx: &str) -> Result<&'a str> {
    require(obj, key, ctx)?
        .as_str()
        .ok_or_else(|| invalid(format!("{ctx}: {key} must be a string")))
}

fn require_bool(obj: &Map<String, Value>, key: &str, ctx: &str) -> Result<bool> {
    require(obj, key, ctx)?
        .as_bool()
        .ok_or_else(|| invalid(format!("{ctx}: {key} must be a boolean")))
}

fn optional_bool(obj: &Map<String, Value>, key: &str, ctx: &str) -> Result<()> {
    match obj.get(key) {
        Some(v) if !v.is_boolean() => Err(invalid(format!("{ctx}: {key} must be a boolean"))),
        _ => Ok(()),
    }
}

fn require_array<'a>(obj: &'a Map<String, Value>, key: &str, ctx: &str) -> Result<&'a [Value]> {
    require(obj, key, ctx)?
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| invalid(format!("{ctx}: {key} must be an array")))
}

fn optional_array<'a>(obj: &'a Map<String, Value>, key: &str, ctx: &str) -> Result<&'a [Value]> {
    match obj.get(key) {
        None => Ok(&[]),
        Some(_) => require_array(obj, key, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(tables: Value) -> Value {
        json!({
            "database": "app",
            "version": 1,
            "encrypted": false,
            "mode": "full",
            "tables": tables,
        })
    }

    fn message(raw: &Value) -> String {
        match validate_document(raw) {
            Err(Error::Validation(msg)) => msg,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_minimal_document_is_valid() {
        let raw = doc(json!([{
            "name": "users",
            "schema": [{"column": "id", "value": "INTEGER PRIMARY KEY"}],
            "values": [[1], [2]]
        }]));
        validate_document(&raw).unwrap();
        let parsed = parse_document(&raw.to_string()).unwrap();
        assert_eq!(parsed.tables[0].values.len(), 2);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut raw = doc(json!([{"name": "t", "values": [[1]], "schema": [{"column": "a", "value": "TEXT"}]}]));
        raw["extra"] = json!(1);
        assert!(message(&raw).contains("unknown key extra"));
    }

    #[test]
    fn test_bad_mode_is_rejected() {
        let mut raw = doc(json!([]));
        raw["mode"] = json!("delta");
        assert!(message(&raw).contains("mode"));
    }

    #[test]
    fn test_empty_tables_only_in_full_mode() {
        let mut raw = doc(json!([]));
        assert!(message(&raw).contains("tables must not be empty"));
        raw["mode"] = json!("partial");
        validate_document(&raw).unwrap();
    }

    #[test]
    fn test_column_needs_exactly_one_kind() {
        let raw = doc(json!([{"name": "t", "schema": [{"value": "TEXT"}]}]));
        assert!(message(&raw).contains("exactly one"));
        let raw = doc(json!([{"name": "t", "schema": [{"column": "a", "constraint": "c", "value": "TEXT"}]}]));
        assert!(message(&raw).contains("exactly one"));
    }

    #[test]
    fn test_boolean_cell_is_rejected() {
        let raw = doc(json!([{"name": "t", "schema": [{"column": "a", "value": "TEXT"}], "values": [[true]]}]));
        assert!(message(&raw).contains("boolean is not a storable cell"));
    }

    #[test]
    fn test_values_without_schema_in_full_mode() {
        let raw = doc(json!([{"name": "t", "values": [[1]]}]));
        assert!(message(&raw).contains("values but no schema"));
    }

    #[test]
    fn test_name_only_table_is_rejected() {
        let mut raw = doc(json!([{"name": "t"}]));
        raw["mode"] = json!("partial");
        assert!(message(&raw).contains("nothing but a name"));
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let raw = doc(json!([{"name": "t", "schema": [{"column": "a", "value": "TEXT"}], "values": [[1, 2], [3]]}]));
        assert!(message(&raw).contains("expected 2"));
    }

    #[test]
    fn test_not_json() {
        assert!(matches!(is_json_valid("{nope"), Err(Error::Validation(_))));
        assert!(matches!(is_json_valid("[]"), Err(Error::Validation(_))));
    }
}
