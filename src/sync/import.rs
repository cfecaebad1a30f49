//! Interchange document → database.
//!
//! The whole import runs in one transaction with foreign keys deferred to
//! commit, so tables may arrive in any order.
//!
//! # Modes
//!
//! - **Full**: existing user tables and views are dropped first (the sync
//!   table survives), then everything is recreated and rows are inserted.
//!   Triggers and views are created once every table holds its rows.
//! - **Partial**: missing schema is created and rows are upserted, matched
//!   on the value of their first column.

use rusqlite::{params_from_iter, Transaction};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage::connection::{schema_version, set_schema_version, table_columns, total_changes};
use crate::storage::statements::quote_identifier;
use crate::storage::{Changes, Database, SqlValue};
use crate::sync::schema::{build_create_table, build_index, build_trigger, build_view, user_tables, views};
use crate::sync::types::{JsonDatabase, JsonTable, SyncMode};

/// Importer writing into one open database.
pub struct Importer<'a> {
    db: &'a mut Database,
}

impl<'a> Importer<'a> {
    #[must_use]
    pub fn new(db: &'a mut Database) -> Self {
        Self { db }
    }

    /// Apply `doc` to the database.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if the handle is closed, `Import` for a row whose
    /// width does not match its table, `Execution` for engine failures.
    /// Nothing is written on failure.
    pub fn import(&mut self, doc: &JsonDatabase) -> Result<Changes> {
        let name = self.db.name().to_string();
        let conn = self.db.connection_mut()?;
        let before = total_changes(conn)?;

        let tx = conn.transaction()?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

        if doc.mode == SyncMode::Full {
            drop_user_objects(&tx)?;
        }
        for table in &doc.tables {
            import_table(&tx, table, doc.mode)?;
        }
        // Triggers go in after every row so imported rows never fire them.
        for table in &doc.tables {
            for trigger in &table.triggers {
                tx.execute_batch(&build_trigger(&table.name, trigger))?;
            }
        }
        for view in &doc.views {
            tx.execute_batch(&build_view(view))?;
        }
        if doc.mode == SyncMode::Full || doc.version > schema_version(&tx)? {
            set_schema_version(&tx, doc.version)?;
        }
        tx.commit()?;

        let changes = Changes {
            changes: total_changes(conn)? - before,
            last_id: conn.last_insert_rowid(),
        };
        info!(
            database = %name,
            mode = %doc.mode,
            tables = doc.tables.len(),
            changes = changes.changes,
            "Imported document"
        );
        Ok(changes)
    }
}

fn drop_user_objects(tx: &Transaction<'_>) -> Result<()> {
    for view in views(tx)? {
        tx.execute_batch(&format!("DROP VIEW IF EXISTS {};", quote_identifier(&view.name)))?;
    }
    for table in user_tables(tx)? {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote_identifier(&table.name)))?;
    }
    Ok(())
}

fn import_table(tx: &Transaction<'_>, table: &JsonTable, mode: SyncMode) -> Result<()> {
    if !table.schema.is_empty() {
        tx.execute_batch(&build_create_table(&table.name, &table.schema))?;
    }
    for index in &table.indexes {
        tx.execute_batch(&build_index(&table.name, index))?;
    }
    if table.values.is_empty() {
        return Ok(());
    }

    let columns = table_columns(tx, &table.name)?;
    if columns.is_empty() {
        return Err(Error::Import(format!(
            "table {} has rows but does not exist",
            table.name
        )));
    }
    for (i, row) in table.values.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(Error::Import(format!(
                "table {} row {i} has {} values for {} columns",
                table.name,
                row.len(),
                columns.len()
            )));
        }
        match mode {
            SyncMode::Full => insert_row(tx, &table.name, &columns, row)?,
            SyncMode::Partial => upsert_row(tx, &table.name, &columns, row)?,
        }
    }
    debug!(table = %table.name, rows = table.values.len(), "Imported rows");
    Ok(())
}

fn insert_row(tx: &Transaction<'_>, table: &str, columns: &[String], row: &[SqlValue]) -> Result<()> {
    let names: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        names.join(", "),
        placeholders.join(", ")
    );
    tx.prepare_cached(&sql)?.execute(params_from_iter(row.iter()))?;
    Ok(())
}

fn upsert_row(tx: &Transaction<'_>, table: &str, columns: &[String], row: &[SqlValue]) -> Result<()> {
    let quoted = quote_identifier(table);
    let key = quote_identifier(&columns[0]);
    let exists: i64 = tx
        .prepare_cached(&format!("SELECT count(*) FROM {quoted} WHERE {key} = ?1"))?
        .query_row([&row[0]], |r| r.get(0))?;
    if exists == 0 {
        return insert_row(tx, table, columns, row);
    }

    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, c)| format!("{} = ?{}", quote_identifier(c), i + 1))
        .collect();
    if assignments.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "UPDATE {quoted} SET {} WHERE {key} = ?1",
        assignments.join(", ")
    );
    tx.prepare_cached(&sql)?.execute(params_from_iter(row.iter()))?;
    Ok(())
}
