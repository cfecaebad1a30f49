//! Configuration management.
//!
//! Resolves where database files live and how long a connection waits on a
//! locked file. Every database the registry manages sits in one directory,
//! as `<dir>/<name>.db`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default busy timeout for every connection.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_dir: PathBuf,
    pub busy_timeout: Duration,
}

impl Config {
    /// Configuration rooted at `database_dir` with default settings.
    #[must_use]
    pub fn new(database_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_dir: database_dir.into(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    /// Resolve configuration from flags and environment.
    ///
    /// # Errors
    ///
    /// Returns `Config` if no database directory can be determined or
    /// `SQLKEEP_BUSY_TIMEOUT_MS` is not a number.
    pub fn resolve(explicit_dir: Option<&Path>) -> Result<Self> {
        let database_dir = resolve_database_dir(explicit_dir).ok_or_else(|| {
            Error::Config("cannot determine a home directory for databases".to_string())
        })?;
        Ok(Self {
            database_dir,
            busy_timeout: busy_timeout_from_env()?,
        })
    }
}

/// Get the global sqlkeep directory location (`~/.sqlkeep/`).
#[must_use]
pub fn global_sqlkeep_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".sqlkeep"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `SQLKEEP_TEST_DB=1` (or any non-empty
/// value other than `0`/`false`).
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("SQLKEEP_TEST_DB")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Resolve the database directory.
///
/// Priority:
/// 1. If `explicit_dir` is provided, use it directly
/// 2. `SQLKEEP_TEST_DB` → `~/.sqlkeep/test`
/// 3. `SQLKEEP_DIR` environment variable
/// 4. Global location: `~/.sqlkeep/databases`
#[must_use]
pub fn resolve_database_dir(explicit_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = explicit_dir {
        return Some(dir.to_path_buf());
    }

    if is_test_mode() {
        return global_sqlkeep_dir().map(|dir| dir.join("test"));
    }

    if let Ok(dir) = std::env::var("SQLKEEP_DIR") {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir));
        }
    }

    global_sqlkeep_dir().map(|dir| dir.join("databases"))
}

fn busy_timeout_from_env() -> Result<Duration> {
    match std::env::var("SQLKEEP_BUSY_TIMEOUT_MS") {
        Ok(raw) if !raw.trim().is_empty() => parse_busy_timeout(&raw),
        _ => Ok(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)),
    }
}

fn parse_busy_timeout(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| Error::Config(format!("SQLKEEP_BUSY_TIMEOUT_MS is not a number: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let dir = Path::new("/tmp/sqlkeep-explicit");
        assert_eq!(resolve_database_dir(Some(dir)), Some(dir.to_path_buf()));
    }

    #[test]
    fn test_parse_busy_timeout() {
        assert_eq!(parse_busy_timeout(" 250 ").unwrap(), Duration::from_millis(250));
        assert!(matches!(parse_busy_timeout("soon"), Err(Error::Config(_))));
    }

    #[test]
    fn test_new_uses_default_timeout() {
        let config = Config::new("/tmp/x");
        assert_eq!(config.busy_timeout, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
    }
}
