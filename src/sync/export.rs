//! Database → interchange document.
//!
//! # Modes
//!
//! - **Full**: every user table with its schema, indexes, triggers and rows,
//!   plus every view.
//! - **Partial**: only what changed since the sync date. Each table needs a
//!   `last_modified` column (epoch seconds). A table whose rows all changed
//!   is exported like in full mode; one with some changed rows carries just
//!   those rows; an unchanged table is left out. A partial export needs a
//!   sync date and at least one changed table.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage::connection::{schema_version, table_columns};
use crate::storage::statements::quote_identifier;
use crate::storage::{Database, SqlValue};
use crate::sync::schema::{
    parse_index, parse_table_definition, parse_trigger, parse_view, table_indexes, table_triggers,
    user_tables, views, CatalogEntry,
};
use crate::sync::tracker;
use crate::sync::types::{JsonDatabase, JsonTable, SyncMode};

/// Column partial exports compare against the sync date.
pub const LAST_MODIFIED: &str = "last_modified";

/// How a table changed since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableChange {
    Unchanged,
    /// Every row is newer than the sync date.
    Created,
    Modified,
}

/// Exporter for one open database.
pub struct Exporter<'a> {
    db: &'a Database,
}

impl<'a> Exporter<'a> {
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Export the database in `mode`.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if the handle is closed, `Export` when there are no
    /// tables, a cell is a BLOB, a partial export has no sync date, no
    /// changes, or meets a table without a `last_modified` column, or the
    /// document fails its shape check.
    pub fn export(&self, mode: SyncMode) -> Result<JsonDatabase> {
        let conn = self.db.connection()?;
        let catalog = user_tables(conn)?;
        if catalog.is_empty() {
            return Err(Error::Export(format!(
                "database {} has no tables to export",
                self.db.name()
            )));
        }

        let tables = match mode {
            SyncMode::Full => catalog
                .iter()
                .map(|entry| full_table(conn, entry))
                .collect::<Result<Vec<_>>>()?,
            SyncMode::Partial => partial_tables(conn, &catalog)?,
        };
        if tables.is_empty() {
            return Err(Error::Export(format!(
                "database {} has no changes since the last sync",
                self.db.name()
            )));
        }
        let views = match mode {
            SyncMode::Full => views(conn)?
                .iter()
                .map(parse_view)
                .collect::<Result<Vec<_>>>()?,
            SyncMode::Partial => Vec::new(),
        };

        let document = JsonDatabase {
            database: self.db.name().to_string(),
            version: schema_version(conn)?,
            encrypted: self.db.encrypted(),
            mode,
            tables,
            views,
            overwrite: false,
        };
        check_shape(&document)?;

        info!(
            database = self.db.name(),
            %mode,
            tables = document.tables.len(),
            "Exported database"
        );
        Ok(document)
    }
}

fn full_table(conn: &Connection, entry: &CatalogEntry) -> Result<JsonTable> {
    let mut table = JsonTable::new(&entry.name);
    table.schema = parse_table_definition(&entry.sql)?;
    table.indexes = table_indexes(conn, &entry.name)?
        .iter()
        .map(parse_index)
        .collect::<Result<_>>()?;
    table.triggers = table_triggers(conn, &entry.name)?
        .iter()
        .map(|t| parse_trigger(&entry.name, t))
        .collect::<Result<_>>()?;
    table.values = table_rows(conn, &entry.name, None)?;
    Ok(table)
}

fn partial_tables(conn: &Connection, catalog: &[CatalogEntry]) -> Result<Vec<JsonTable>> {
    let since = tracker::sync_date(conn)?;
    if since <= 0 {
        return Err(Error::Export(
            "no sync date found, set one before a partial export".to_string(),
        ));
    }
    let mut tables = Vec::new();
    for entry in catalog {
        match table_change(conn, &entry.name, since)? {
            TableChange::Unchanged => {
                debug!(table = %entry.name, "Unchanged since last sync");
            }
            TableChange::Created => tables.push(full_table(conn, entry)?),
            TableChange::Modified => {
                let mut table = JsonTable::new(&entry.name);
                table.values = table_rows(conn, &entry.name, Some(since))?;
                tables.push(table);
            }
        }
    }
    Ok(tables)
}

fn table_change(conn: &Connection, table: &str, since: i64) -> Result<TableChange> {
    if !table_columns(conn, table)?.iter().any(|c| c == LAST_MODIFIED) {
        return Err(Error::Export(format!(
            "table {table} has no {LAST_MODIFIED} column, required for partial export"
        )));
    }
    let quoted = quote_identifier(table);
    let total: i64 = conn.query_row(&format!("SELECT count(*) FROM {quoted}"), [], |row| {
        row.get(0)
    })?;
    let modified: i64 = conn.query_row(
        &format!("SELECT count(*) FROM {quoted} WHERE {LAST_MODIFIED} > ?1"),
        [since],
        |row| row.get(0),
    )?;
    Ok(match modified {
        0 => TableChange::Unchanged,
        m if m == total => TableChange::Created,
        _ => TableChange::Modified,
    })
}

fn table_rows(conn: &Connection, table: &str, since: Option<i64>) -> Result<Vec<Vec<SqlValue>>> {
    let columns = table_columns(conn, table)?;
    let quoted = quote_identifier(table);
    let sql = match since {
        Some(_) => format!("SELECT * FROM {quoted} WHERE {LAST_MODIFIED} > ?1"),
        None => format!("SELECT * FROM {quoted}"),
    };
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = match since {
        Some(since) => stmt.query([since])?,
        None => stmt.query([])?,
    };

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let cell = SqlValue::from_cell(row.get_ref(i)?).ok_or_else(|| {
                Error::Export(format!("table {table} column {column} holds a BLOB"))
            })?;
            cells.push(cell);
        }
        out.push(cells);
    }
    Ok(out)
}

fn check_shape(document: &JsonDatabase) -> Result<()> {
    let value = serde_json::to_value(document)?;
    let keys = value.as_object().map_or(0, serde_json::Map::len);
    if !(5..=6).contains(&keys) {
        return Err(Error::Export(format!(
            "exported document has {keys} top-level keys, expected 5 or 6"
        )));
    }
    Ok(())
}
