//! Typed values bound to statements and stored in interchange rows.
//!
//! The bridge hands over loosely typed JSON; only text, integer, real and
//! null survive the boundary. Everything else is rejected here, before a
//! statement reaches the engine.

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A bound parameter or row cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Convert a JSON value at `position` of a parameter list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameterType` for booleans, arrays and objects.
    pub fn from_json(value: &serde_json::Value, position: usize) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Real(f))
                } else {
                    Err(Error::InvalidParameterType {
                        position,
                        found: format!("number {n}"),
                    })
                }
            }
            other => Err(Error::InvalidParameterType {
                position,
                found: json_type_name(other).to_string(),
            }),
        }
    }

    /// Convert a whole JSON array of parameters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameterType` naming the first offending position.
    pub fn from_json_list(values: &[serde_json::Value]) -> Result<Vec<Self>> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Self::from_json(v, i))
            .collect()
    }

    /// Read an engine cell. Returns `None` for BLOBs, which have no
    /// interchange representation.
    #[must_use]
    pub fn from_cell(cell: ValueRef<'_>) -> Option<Self> {
        match cell {
            ValueRef::Null => Some(Self::Null),
            ValueRef::Integer(i) => Some(Self::Integer(i)),
            ValueRef::Real(f) => Some(Self::Real(f)),
            ValueRef::Text(t) => Some(Self::Text(String::from_utf8_lossy(t).into_owned())),
            ValueRef::Blob(_) => None,
        }
    }

    /// Render as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Real(f) => serde_json::Value::from(*f),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Query cells as JSON. BLOBs come back as byte arrays.
#[must_use]
pub fn cell_to_json(cell: ValueRef<'_>) -> serde_json::Value {
    match cell {
        ValueRef::Blob(bytes) => serde_json::Value::Array(
            bytes.iter().map(|b| serde_json::Value::from(*b)).collect(),
        ),
        other => SqlValue::from_cell(other).map_or(serde_json::Value::Null, |v| v.to_json()),
    }
}

pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_json_is_accepted() {
        let values = SqlValue::from_json_list(&[json!("a"), json!(3), json!(1.5), json!(null)])
            .unwrap();
        assert_eq!(
            values,
            vec![
                SqlValue::Text("a".into()),
                SqlValue::Integer(3),
                SqlValue::Real(1.5),
                SqlValue::Null
            ]
        );
    }

    #[test]
    fn test_boolean_is_rejected_with_position() {
        let err = SqlValue::from_json_list(&[json!(1), json!(true)]).unwrap_err();
        match err {
            Error::InvalidParameterType { position, found } => {
                assert_eq!(position, 1);
                assert_eq!(found, "boolean");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nested_values_are_rejected() {
        assert!(SqlValue::from_json(&json!([1, 2]), 0).is_err());
        assert!(SqlValue::from_json(&json!({"a": 1}), 0).is_err());
    }

    #[test]
    fn test_untagged_serde_shape() {
        let row: Vec<SqlValue> = serde_json::from_str(r#"[1, "x", 2.5, null]"#).unwrap();
        assert_eq!(row[0], SqlValue::Integer(1));
        assert_eq!(row[1], SqlValue::Text("x".into()));
        assert_eq!(row[2], SqlValue::Real(2.5));
        assert!(row[3].is_null());
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"[1,"x",2.5,null]"#);
    }

    #[test]
    fn test_blob_cells_have_no_interchange_form() {
        assert!(SqlValue::from_cell(ValueRef::Blob(&[1, 2])).is_none());
        assert_eq!(cell_to_json(ValueRef::Blob(&[1, 2])), json!([1, 2]));
    }
}
