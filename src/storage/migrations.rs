//! Versioned schema upgrades driven by `PRAGMA user_version`.
//!
//! Callers register steps keyed by the version they start from. Opening a
//! handle walks the chain from the stored version up to the declared one,
//! applying each step exactly once inside its own transaction.

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::storage::connection::{schema_version, set_schema_version};
use crate::storage::database::SetStatement;
use crate::storage::statements::normalize_statements;

/// One upgrade from `from_version` to `to_version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeStep {
    pub from_version: i64,
    pub to_version: i64,
    pub statement: String,
    #[serde(default)]
    pub set: Vec<SetStatement>,
}

impl UpgradeStep {
    /// Check the step moves the schema forward.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `to_version <= from_version` or a
    /// version is negative.
    pub fn validate(&self) -> Result<()> {
        if self.from_version < 0 {
            return Err(Error::InvalidArgument(format!(
                "upgrade fromVersion must be >= 0, got {}",
                self.from_version
            )));
        }
        if self.to_version <= self.from_version {
            return Err(Error::InvalidArgument(format!(
                "upgrade toVersion ({}) must be greater than fromVersion ({})",
                self.to_version, self.from_version
            )));
        }
        Ok(())
    }
}

/// Upgrade steps keyed by `from_version`.
pub type UpgradeTable = BTreeMap<i64, UpgradeStep>;

/// Build a table from a list of steps. Later steps replace earlier ones
/// with the same `from_version`.
///
/// # Errors
///
/// Returns `InvalidArgument` if any step is invalid.
pub fn upgrade_table(steps: impl IntoIterator<Item = UpgradeStep>) -> Result<UpgradeTable> {
    let mut table = UpgradeTable::new();
    for step in steps {
        step.validate()?;
        table.insert(step.from_version, step);
    }
    Ok(table)
}

/// Bring `conn` up to `declared`, returning the number of steps applied.
///
/// A stored version above `declared` is left alone.
///
/// # Errors
///
/// Returns `MigrationGap` when no step starts at the current version, or
/// `Execution` if a step fails. A failed step leaves the stored version at
/// the last successful step.
pub fn run_upgrades(
    conn: &mut Connection,
    name: &str,
    declared: i64,
    table: &UpgradeTable,
) -> Result<usize> {
    let mut current = schema_version(conn)?;
    if current > declared {
        warn!(
            database = name,
            stored = current,
            declared,
            "Stored schema is newer than declared, leaving it untouched"
        );
        return Ok(0);
    }

    let mut applied = 0;
    while current < declared {
        let step = table.get(&current).ok_or_else(|| Error::MigrationGap {
            name: name.to_string(),
            from: current,
            target: declared,
        })?;

        info!(database = name, from = step.from_version, to = step.to_version, "Applying upgrade");
        apply_step(conn, step).map_err(|e| {
            Error::Execution(format!(
                "upgrade of {name} from {} to {} failed: {e}",
                step.from_version, step.to_version
            ))
        })?;

        current = step.to_version;
        applied += 1;
    }
    Ok(applied)
}

fn apply_step(conn: &mut Connection, step: &UpgradeStep) -> Result<()> {
    let tx = conn.transaction()?;
    let script = normalize_statements(&step.statement);
    if !script.is_empty() {
        tx.execute_batch(&script)?;
    }
    for item in &step.set {
        let mut stmt = tx.prepare(&item.statement)?;
        stmt.execute(rusqlite::params_from_iter(item.values.iter()))?;
    }
    set_schema_version(&tx, step.to_version)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::value::SqlValue;

    fn step(from: i64, to: i64, statement: &str) -> UpgradeStep {
        UpgradeStep {
            from_version: from,
            to_version: to,
            statement: statement.to_string(),
            set: Vec::new(),
        }
    }

    #[test]
    fn test_chained_steps_apply_in_order() {
        let mut conn = Connection::open_in_memory().unwrap();
        let table = upgrade_table([
            step(0, 1, "CREATE TABLE a (id INTEGER PRIMARY KEY);"),
            step(1, 2, "ALTER TABLE a ADD COLUMN name TEXT;"),
        ])
        .unwrap();

        assert_eq!(run_upgrades(&mut conn, "t", 2, &table).unwrap(), 2);
        assert_eq!(schema_version(&conn).unwrap(), 2);
        // Re-running at the declared version does nothing.
        assert_eq!(run_upgrades(&mut conn, "t", 2, &table).unwrap(), 0);
    }

    #[test]
    fn test_missing_step_is_a_gap() {
        let mut conn = Connection::open_in_memory().unwrap();
        let table = upgrade_table([step(0, 1, "CREATE TABLE a (id INTEGER);")]).unwrap();
        let err = run_upgrades(&mut conn, "t", 3, &table).unwrap_err();
        assert!(matches!(err, Error::MigrationGap { from: 1, target: 3, .. }));
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_failed_step_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        let table = upgrade_table([step(
            0,
            1,
            "CREATE TABLE a (id INTEGER);\nINSERT INTO missing VALUES (1);",
        )])
        .unwrap();
        assert!(run_upgrades(&mut conn, "t", 1, &table).is_err());
        assert_eq!(schema_version(&conn).unwrap(), 0);
        let tables: i64 = conn
            .query_row("SELECT count(*) FROM sqlite_master WHERE name = 'a'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn test_step_set_runs_with_values() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut first = step(0, 1, "CREATE TABLE kv (k TEXT, v INTEGER);");
        first.set = vec![SetStatement::new(
            "INSERT INTO kv VALUES (?1, ?2)",
            vec![SqlValue::from("seed"), SqlValue::from(7_i64)],
        )];
        let table = upgrade_table([first]).unwrap();
        run_upgrades(&mut conn, "t", 1, &table).unwrap();
        let v: i64 = conn
            .query_row("SELECT v FROM kv WHERE k = 'seed'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(v, 7);
    }

    #[test]
    fn test_newer_stored_version_is_untouched() {
        let mut conn = Connection::open_in_memory().unwrap();
        set_schema_version(&conn, 5).unwrap();
        assert_eq!(run_upgrades(&mut conn, "t", 2, &UpgradeTable::new()).unwrap(), 0);
        assert_eq!(schema_version(&conn).unwrap(), 5);
    }

    #[test]
    fn test_backwards_step_is_invalid() {
        assert!(step(2, 2, "").validate().is_err());
        assert!(step(-1, 2, "").validate().is_err());
        assert!(upgrade_table([step(3, 1, "")]).is_err());
    }

    #[test]
    fn test_step_deserializes_camel_case() {
        let step: UpgradeStep = serde_json::from_str(
            r#"{"fromVersion": 0, "toVersion": 1, "statement": "CREATE TABLE t (id INTEGER);"}"#,
        )
        .unwrap();
        assert_eq!(step.to_version, 1);
        assert!(step.set.is_empty());
    }
}
