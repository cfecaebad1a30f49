//! One named database file and its (optional) open connection.
//!
//! A `Database` is owned by the connection registry and only lent out for
//! the duration of a single call. Every statement-level operation requires
//! the handle to be open.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::storage::connection::{
    close_connection, encrypt_in_place, open_connection, schema_version, table_exists,
    total_changes, OpenMode,
};
use crate::storage::migrations::{run_upgrades, UpgradeTable};
use crate::storage::statements::normalize_statements;
use crate::storage::value::{cell_to_json, SqlValue};

/// A query result row: column name → value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
    /// Rows changed by the call.
    pub changes: i64,
    /// Rowid of the most recent successful insert on this connection.
    pub last_id: i64,
}

/// One statement of an ordered set, with positional values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStatement {
    pub statement: String,
    #[serde(default)]
    pub values: Vec<SqlValue>,
}

impl SetStatement {
    #[must_use]
    pub fn new(statement: impl Into<String>, values: Vec<SqlValue>) -> Self {
        Self {
            statement: statement.into(),
            values,
        }
    }
}

/// A named database handle.
#[derive(Debug)]
pub struct Database {
    name: String,
    path: PathBuf,
    encrypted: bool,
    mode: OpenMode,
    version: i64,
    upgrades: UpgradeTable,
    busy_timeout: Duration,
    conn: Option<Connection>,
}

impl Database {
    /// Create a closed handle.
    #[must_use]
    pub fn new(
        name: &str,
        path: PathBuf,
        encrypted: bool,
        mode: OpenMode,
        version: i64,
        upgrades: UpgradeTable,
        busy_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            path,
            encrypted,
            mode,
            version,
            upgrades,
            busy_timeout,
            conn: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    #[must_use]
    pub const fn encrypted(&self) -> bool {
        self.encrypted
    }

    #[must_use]
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Declared schema version.
    #[must_use]
    pub const fn version(&self) -> i64 {
        self.version
    }

    /// Whether this handle needs the stored secret to open.
    #[must_use]
    pub fn needs_secret(&self) -> bool {
        self.encrypted && self.mode != OpenMode::NoEncryption
    }

    /// Open the file and bring its schema up to the declared version.
    ///
    /// Opening an already-open handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Secret` when a needed secret is missing or wrong,
    /// `MigrationGap`/`Execution` when upgrading fails. The handle stays
    /// closed on failure.
    pub fn open(&mut self, secret: Option<&str>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let mut conn = self.connect(secret)?;
        let applied = run_upgrades(&mut conn, &self.name, self.version, &self.upgrades)?;
        if applied > 0 {
            info!(database = %self.name, steps = applied, version = self.version, "Schema upgraded");
        }
        self.conn = Some(conn);
        Ok(())
    }

    /// Open the file without consulting the upgrade table.
    ///
    /// # Errors
    ///
    /// Same as [`Database::open`], minus migration failures.
    pub fn open_raw(&mut self, secret: Option<&str>) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        self.conn = Some(self.connect(secret)?);
        Ok(())
    }

    fn connect(&mut self, secret: Option<&str>) -> Result<Connection> {
        let key = if self.needs_secret() {
            Some(secret.ok_or_else(|| {
                Error::Secret(format!(
                    "database {} is encrypted but no passphrase is stored",
                    self.name
                ))
            })?)
        } else {
            None
        };

        if let (Some(key), OpenMode::Encryption) = (key, self.mode) {
            encrypt_in_place(&self.path, key, self.busy_timeout)?;
            self.mode = OpenMode::Secret;
        }

        open_connection(&self.path, key, self.busy_timeout)
    }

    /// Close the connection. Closing a closed handle is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Execution` if a transaction is still pending or the engine
    /// refuses to close; the handle stays open in that case.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if !conn.is_autocommit() {
            self.conn = Some(conn);
            return Err(Error::Execution(format!(
                "database {} failed to close: still in transaction",
                self.name
            )));
        }
        match close_connection(conn) {
            Ok(()) => {
                debug!(database = %self.name, "Closed database");
                Ok(())
            }
            Err((conn, e)) => {
                self.conn = Some(conn);
                Err(e)
            }
        }
    }

    /// Borrow the open connection.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if the handle is closed.
    pub fn connection(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| Error::NotOpen {
            name: self.name.clone(),
        })
    }

    /// Mutably borrow the open connection.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if the handle is closed.
    pub fn connection_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(|| Error::NotOpen {
            name: self.name.clone(),
        })
    }

    /// Stored schema version.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if closed.
    pub fn stored_version(&self) -> Result<i64> {
        schema_version(self.connection()?)
    }

    /// Execute one or more statements separated by `;`/newlines.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if closed, `Execution` carrying the engine message
    /// otherwise. With `transaction`, nothing is written on failure.
    pub fn execute_sql(&mut self, statements: &str, transaction: bool) -> Result<Changes> {
        let script = normalize_statements(statements);
        let conn = self.connection_mut()?;
        if transaction {
            let tx = conn.transaction()?;
            let changes = execute_batch(&tx, &script)?;
            tx.commit()?;
            Ok(changes)
        } else {
            execute_batch(conn, &script)
        }
    }

    /// Run a single statement with positional values.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if closed, `Execution` on engine failure.
    pub fn run_sql(
        &mut self,
        statement: &str,
        values: &[SqlValue],
        transaction: bool,
    ) -> Result<Changes> {
        let conn = self.connection_mut()?;
        if transaction {
            let tx = conn.transaction()?;
            let changes = run_statement(&tx, statement, values)?;
            tx.commit()?;
            Ok(changes)
        } else {
            run_statement(conn, statement, values)
        }
    }

    /// Run an ordered set of statements.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if closed, `Execution` naming the failing position.
    /// With `transaction`, the whole set is rolled back on failure.
    pub fn exec_set(&mut self, set: &[SetStatement], transaction: bool) -> Result<Changes> {
        let conn = self.connection_mut()?;
        if transaction {
            let tx = conn.transaction()?;
            let changes = run_set(&tx, set)?;
            tx.commit()?;
            Ok(changes)
        } else {
            run_set(conn, set)
        }
    }

    /// Run a query and return every row.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if closed, `Execution` on engine failure.
    pub fn select_sql(&self, statement: &str, values: &[SqlValue]) -> Result<Vec<Row>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(statement)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(values.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = Row::new();
            for (i, name) in names.iter().enumerate() {
                obj.insert(name.clone(), cell_to_json(row.get_ref(i)?));
            }
            out.push(obj);
        }
        Ok(out)
    }

    /// Whether `table` exists in this database.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if closed.
    pub fn is_table_exists(&self, table: &str) -> Result<bool> {
        table_exists(self.connection()?, table)
    }
}

fn execute_batch(conn: &Connection, script: &str) -> Result<Changes> {
    let before = total_changes(conn)?;
    conn.execute_batch(script)?;
    Ok(Changes {
        changes: total_changes(conn)? - before,
        last_id: conn.last_insert_rowid(),
    })
}

fn run_statement(conn: &Connection, statement: &str, values: &[SqlValue]) -> Result<Changes> {
    let mut stmt = conn.prepare(statement)?;
    let changed = stmt.execute(params_from_iter(values.iter()))?;
    Ok(Changes {
        changes: i64::try_from(changed).unwrap_or(i64::MAX),
        last_id: conn.last_insert_rowid(),
    })
}

fn run_set(conn: &Connection, set: &[SetStatement]) -> Result<Changes> {
    let mut total = Changes::default();
    for (i, item) in set.iter().enumerate() {
        let changes = run_statement(conn, &item.statement, &item.values)
            .map_err(|e| Error::Execution(format!("set statement {i}: {e}")))?;
        total.changes += changes.changes;
        total.last_id = changes.last_id;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> Database {
        let mut db = Database::new(
            "test",
            dir.path().join("test.db"),
            false,
            OpenMode::NoEncryption,
            0,
            UpgradeTable::new(),
            Duration::from_secs(1),
        );
        db.open(None).unwrap();
        db.execute_sql(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL);",
            false,
        )
        .unwrap();
        db
    }

    #[test]
    fn test_closed_handle_rejects_statements() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        db.close().unwrap();
        assert!(!db.is_open());
        assert!(matches!(
            db.execute_sql("SELECT 1", false),
            Err(Error::NotOpen { .. })
        ));
        assert!(matches!(db.select_sql("SELECT 1", &[]), Err(Error::NotOpen { .. })));
        // Closing twice is fine.
        db.close().unwrap();
    }

    #[test]
    fn test_execute_counts_changes() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let changes = db
            .execute_sql(
                "INSERT INTO users (name) VALUES ('a');\n  INSERT INTO users (name) VALUES ('b');",
                true,
            )
            .unwrap();
        assert_eq!(changes.changes, 2);
        assert_eq!(changes.last_id, 2);
    }

    #[test]
    fn test_execute_surfaces_engine_message() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let err = db.execute_sql("INSERT INTO nowhere VALUES (1);", false).unwrap_err();
        match err {
            Error::Execution(msg) => assert!(msg.contains("nowhere")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_run_and_select_with_values() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        db.run_sql(
            "INSERT INTO users (name, score) VALUES (?1, ?2)",
            &[SqlValue::from("ann"), SqlValue::from(9.5)],
            false,
        )
        .unwrap();
        let rows = db
            .select_sql("SELECT name, score FROM users WHERE name = ?1", &["ann".into()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "ann");
        assert_eq!(rows[0]["score"], 9.5);
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, ["name", "score"]);
    }

    #[test]
    fn test_failed_set_in_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let set = vec![
            SetStatement::new("INSERT INTO users (name) VALUES (?1)", vec!["a".into()]),
            SetStatement::new("INSERT INTO users (name) VALUES (?1)", vec![SqlValue::Null]),
            SetStatement::new("INSERT INTO users (name) VALUES (?1)", vec!["c".into()]),
        ];
        let err = db.exec_set(&set, true).unwrap_err();
        assert!(err.to_string().contains("set statement 1"));
        let rows = db.select_sql("SELECT count(*) AS n FROM users", &[]).unwrap();
        assert_eq!(rows[0]["n"], 0);
    }

    #[test]
    fn test_failed_set_without_transaction_keeps_prefix() {
        let dir = TempDir::new().unwrap();
        let mut db = open_db(&dir);
        let set = vec![
            SetStatement::new("INSERT INTO users (name) VALUES (?1)", vec!["a".into()]),
            SetStatement::new("INSERT INTO users (name) VALUES (?1)", vec![SqlValue::Null]),
        ];
        assert!(db.exec_set(&set, false).is_err());
        let rows = db.select_sql("SELECT count(*) AS n FROM users", &[]).unwrap();
        assert_eq!(rows[0]["n"], 1);
    }

    #[test]
    fn test_is_table_exists() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        assert!(db.is_table_exists("users").unwrap());
        assert!(!db.is_table_exists("ghosts").unwrap());
    }

    #[test]
    fn test_encrypted_handle_without_secret_fails() {
        let dir = TempDir::new().unwrap();
        let mut db = Database::new(
            "enc",
            dir.path().join("enc.db"),
            true,
            OpenMode::Secret,
            0,
            UpgradeTable::new(),
            Duration::from_secs(1),
        );
        assert!(matches!(db.open(None), Err(Error::Secret(_))));
        assert!(!db.is_open());
    }
}
