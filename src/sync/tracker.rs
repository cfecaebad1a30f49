//! The in-database record of the last sync.
//!
//! `sync_table` holds a single row (`id = 1`) whose `sync_date` is the epoch
//! second partial exports are computed against.

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::connection::table_exists;

/// Reserved table name, never exported or dropped by a full import.
pub const SYNC_TABLE: &str = "sync_table";

/// Create `sync_table` if absent, seeded with the current time.
///
/// Returns the number of rows written: 1 when created, 0 when it existed.
///
/// # Errors
///
/// Returns `Execution` if the table cannot be created.
pub fn create_sync_table(conn: &Connection) -> Result<i64> {
    if table_exists(conn, SYNC_TABLE)? {
        return Ok(0);
    }
    let now = chrono::Utc::now().timestamp();
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_table (
            id INTEGER PRIMARY KEY NOT NULL,
            sync_date INTEGER
        );",
    )?;
    let changes = tx.execute(
        "INSERT INTO sync_table (id, sync_date) VALUES (1, ?1)",
        [now],
    )?;
    tx.commit()?;
    debug!(sync_date = now, "Created sync table");
    Ok(i64::try_from(changes).unwrap_or(i64::MAX))
}

/// Set the last sync date (epoch seconds).
///
/// # Errors
///
/// Returns `Sync` if the table is missing or no row was updated.
pub fn set_sync_date(conn: &Connection, epoch: i64) -> Result<()> {
    if !table_exists(conn, SYNC_TABLE)? {
        return Err(Error::Sync("sync table does not exist".to_string()));
    }
    let changed = conn.execute("UPDATE sync_table SET sync_date = ?1 WHERE id = 1", [epoch])?;
    if changed == 0 {
        return Err(Error::Sync("sync date was not updated".to_string()));
    }
    Ok(())
}

/// The last sync date, 0 when the table or its row is absent.
///
/// # Errors
///
/// Returns `Execution` if the table cannot be read.
pub fn sync_date(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, SYNC_TABLE)? {
        return Ok(0);
    }
    let date: Option<Option<i64>> = conn
        .query_row("SELECT sync_date FROM sync_table WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    Ok(date.flatten().unwrap_or(0))
}
