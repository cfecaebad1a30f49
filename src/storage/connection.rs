//! Engine primitive: opening, keying and inspecting SQLite files.
//!
//! Encrypted files are keyed with `PRAGMA key`, which only means something
//! when the crate links SQLCipher (`--features sqlcipher`). A plain SQLite
//! build ignores the pragma silently, so keying always confirms the cipher
//! is present before trusting it.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Source of the encryption secret for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenMode {
    /// Plain SQLite file.
    #[default]
    NoEncryption,
    /// Encrypted file, keyed with the stored secret.
    Secret,
    /// Plain file that is encrypted with the stored secret on first open.
    Encryption,
}

impl std::fmt::Display for OpenMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEncryption => write!(f, "no-encryption"),
            Self::Secret => write!(f, "secret"),
            Self::Encryption => write!(f, "encryption"),
        }
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no-encryption" => Ok(Self::NoEncryption),
            "secret" => Ok(Self::Secret),
            "encryption" => Ok(Self::Encryption),
            _ => Err(Error::InvalidArgument(format!("unknown open mode: {s}"))),
        }
    }
}

/// Open a database file, keying it when `key` is given.
///
/// # Errors
///
/// Returns `Secret` if a key is given but SQLCipher is unavailable or the
/// key does not decrypt the file, `Execution` for other engine failures.
pub fn open_connection(path: &Path, key: Option<&str>, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;

    if let Some(key) = key {
        apply_key(&conn, key)?;
    }

    // Reading the schema forces the header to be decoded, which is where a
    // wrong key (or a plaintext key against an encrypted file) surfaces.
    if let Err(e) = conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    }) {
        return Err(if key.is_some() {
            Error::Secret(format!("cannot decrypt {}: {e}", path.display()))
        } else {
            Error::Execution(format!("cannot read {}: {e}", path.display()))
        });
    }

    conn.pragma_update(None, "foreign_keys", true)?;
    debug!(path = %path.display(), encrypted = key.is_some(), "Opened database file");
    Ok(conn)
}

/// Close a connection, handing it back if the engine refuses.
///
/// # Errors
///
/// Returns the connection and `Execution` if a statement is still pending.
pub fn close_connection(conn: Connection) -> std::result::Result<(), (Connection, Error)> {
    conn.close().map_err(|(conn, e)| (conn, Error::from(e)))
}

/// Whether an existing file cannot be read without a key.
///
/// A missing file is not encrypted.
///
/// # Errors
///
/// Returns `Execution` if the file cannot be opened at all.
pub fn is_encrypted_file(path: &Path, busy_timeout: Duration) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    let readable = conn
        .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .is_ok();
    close_connection(conn).map_err(|(_, e)| e)?;
    Ok(!readable)
}

/// Whether the linked engine is SQLCipher.
///
/// # Errors
///
/// Returns an error if the pragma cannot be evaluated.
pub fn cipher_available(conn: &Connection) -> Result<bool> {
    let version: Option<String> = conn
        .query_row("PRAGMA cipher_version", [], |row| row.get(0))
        .optional()?;
    Ok(version.is_some_and(|v| !v.is_empty()))
}

fn apply_key(conn: &Connection, key: &str) -> Result<()> {
    if !cipher_available(conn)? {
        return Err(Error::Secret(
            "encryption requested but SQLCipher support is not compiled in".to_string(),
        ));
    }
    conn.pragma_update(None, "key", key)?;
    Ok(())
}

/// Encrypt a plaintext database file in place with `key`.
///
/// A missing file, or one that is already unreadable without a key, is left
/// alone. Returns whether a conversion happened.
///
/// # Errors
///
/// Returns `Secret` without SQLCipher, `Execution`/`Io` if the export or
/// the final rename fails. The original file is untouched on failure.
pub fn encrypt_in_place(path: &Path, key: &str, busy_timeout: Duration) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    if !cipher_available(&conn)? {
        return Err(Error::Secret(
            "encryption requested but SQLCipher support is not compiled in".to_string(),
        ));
    }
    if conn
        .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .is_err()
    {
        // Already encrypted.
        return Ok(false);
    }

    let temp = encrypting_path(path);
    let temp_str = temp
        .to_str()
        .ok_or_else(|| Error::Config(format!("non UTF-8 path: {}", temp.display())))?;
    let version = schema_version(&conn)?;

    conn.execute("ATTACH DATABASE ?1 AS encrypted KEY ?2", [temp_str, key])?;
    let exported = conn
        .query_row("SELECT sqlcipher_export('encrypted')", [], |_| Ok(()))
        .and_then(|()| conn.execute_batch(&format!("PRAGMA encrypted.user_version = {version};")))
        .and_then(|()| conn.execute_batch("DETACH DATABASE encrypted;"));
    if let Err(e) = exported {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    close_connection(conn).map_err(|(_, e)| e)?;

    fs::rename(&temp, path)?;
    info!(path = %path.display(), "Encrypted database in place");
    Ok(true)
}

fn encrypting_path(path: &Path) -> PathBuf {
    let stem = path
        .file_name()
        .map_or_else(|| "database".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{stem}.{}.encrypting", uuid::Uuid::new_v4()))
}

/// Re-key a file encrypted with `old` so it opens with `new`.
///
/// Returns `false` when the file is not readable with `old` (plaintext, or
/// another key) or when SQLCipher is not linked, in which case no file can
/// be encrypted in the first place.
///
/// # Errors
///
/// Returns `Execution` if the rekey pragma fails.
pub fn rekey_file(path: &Path, old: &str, new: &str, busy_timeout: Duration) -> Result<bool> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    if !cipher_available(&conn)? {
        return Ok(false);
    }
    conn.pragma_update(None, "key", old)?;
    if conn
        .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .is_err()
    {
        return Ok(false);
    }
    conn.pragma_update(None, "rekey", new)?;
    debug!(path = %path.display(), "Re-keyed database file");
    Ok(true)
}

/// Stored schema version (`PRAGMA user_version`), 0 when unset.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Persist the schema version.
///
/// # Errors
///
/// Returns an error if the pragma cannot be written.
pub fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Number of rows changed since the connection was opened.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn total_changes(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT total_changes()", [], |row| row.get(0))?)
}

/// Whether a table named `table` exists.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Column names of `table` in declaration order. Empty when the table is absent.
///
/// # Errors
///
/// Returns an error if the pragma query fails.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp(dir: &TempDir) -> Connection {
        open_connection(&dir.path().join("t.db"), None, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_open_mode_round_trip() {
        for mode in [OpenMode::NoEncryption, OpenMode::Secret, OpenMode::Encryption] {
            assert_eq!(mode.to_string().parse::<OpenMode>().unwrap(), mode);
        }
        assert!("plain".parse::<OpenMode>().is_err());
    }

    #[test]
    fn test_schema_version_defaults_to_zero() {
        let dir = TempDir::new().unwrap();
        let conn = open_temp(&dir);
        assert_eq!(schema_version(&conn).unwrap(), 0);
        set_schema_version(&conn, 4).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 4);
    }

    #[test]
    fn test_table_introspection() {
        let dir = TempDir::new().unwrap();
        let conn = open_temp(&dir);
        conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);")
            .unwrap();
        assert!(table_exists(&conn, "users").unwrap());
        assert!(!table_exists(&conn, "missing").unwrap());
        assert_eq!(table_columns(&conn, "users").unwrap(), vec!["id", "name", "age"]);
        assert!(table_columns(&conn, "missing").unwrap().is_empty());
    }

    #[test]
    fn test_total_changes_counts_rows() {
        let dir = TempDir::new().unwrap();
        let conn = open_temp(&dir);
        conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2);")
            .unwrap();
        assert_eq!(total_changes(&conn).unwrap(), 2);
    }

    #[test]
    fn test_encrypted_file_detection() {
        let dir = TempDir::new().unwrap();
        let timeout = Duration::from_secs(1);
        let plain = dir.path().join("plain.db");
        drop(open_connection(&plain, None, timeout).unwrap());
        assert!(!is_encrypted_file(&plain, timeout).unwrap());
        assert!(!is_encrypted_file(&dir.path().join("missing.db"), timeout).unwrap());
        assert!(!dir.path().join("missing.db").exists());

        // Anything SQLite cannot read without a key counts as encrypted.
        let opaque = dir.path().join("opaque.db");
        fs::write(&opaque, vec![0x5a_u8; 4096]).unwrap();
        assert!(is_encrypted_file(&opaque, timeout).unwrap());
    }

    #[cfg(not(feature = "sqlcipher"))]
    #[test]
    fn test_keying_without_sqlcipher_is_refused() {
        let dir = TempDir::new().unwrap();
        let err = open_connection(&dir.path().join("e.db"), Some("pw"), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, Error::Secret(_)));
    }

    #[cfg(not(feature = "sqlcipher"))]
    #[test]
    fn test_rekey_without_sqlcipher_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.db");
        drop(open_connection(&path, None, Duration::from_secs(1)).unwrap());
        assert!(!rekey_file(&path, "a", "b", Duration::from_secs(1)).unwrap());
    }
}
