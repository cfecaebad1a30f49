//! Interchange document types.
//!
//! A document carries one database's schema and content:
//!
//! ```json
//! {"database": "app", "version": 2, "encrypted": false, "mode": "full",
//!  "tables": [{"name": "users",
//!              "schema": [{"column": "id", "value": "INTEGER PRIMARY KEY NOT NULL"}],
//!              "values": [[1]]}]}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::SqlValue;

/// Import/export mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Whole database; import drops and recreates user objects.
    #[default]
    Full,
    /// Changes since the last sync date; import upserts.
    Partial,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            _ => Err(Error::InvalidArgument(format!(
                "mode must be full or partial, got {s}"
            ))),
        }
    }
}

/// A whole interchange document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonDatabase {
    pub database: String,
    pub version: i64,
    pub encrypted: bool,
    pub mode: SyncMode,
    pub tables: Vec<JsonTable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub views: Vec<JsonView>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub overwrite: bool,
}

/// One table's schema and rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonTable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema: Vec<JsonColumn>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<JsonIndex>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<JsonTrigger>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<SqlValue>>,
}

impl JsonTable {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether the entry carries nothing but its name.
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.schema.is_empty()
            && self.indexes.is_empty()
            && self.triggers.is_empty()
            && self.values.is_empty()
    }
}

/// A schema entry: exactly one of column, foreign key or table constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonColumn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreignkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    pub value: String,
}

impl JsonColumn {
    #[must_use]
    pub fn column(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: Some(name.into()),
            foreignkey: None,
            constraint: None,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn foreign_key(columns: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: None,
            foreignkey: Some(columns.into()),
            constraint: None,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn constraint(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: None,
            foreignkey: None,
            constraint: Some(name.into()),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonIndex {
    pub name: String,
    /// Indexed column list, without the surrounding parentheses.
    pub value: String,
    /// `UNIQUE` for unique indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// `WHERE ...` clause of a partial index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonTrigger {
    pub name: String,
    /// e.g. `AFTER UPDATE`.
    pub timeevent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Body from `BEGIN` to `END`.
    pub logic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonView {
    pub name: String,
    /// The `SELECT` the view is defined by.
    pub value: String,
}
