//! The connection registry: every named database handle, by name.
//!
//! The registry is the only owner of [`Database`] handles. Callers address a
//! handle by name and only touch it for the duration of one call. The
//! name → handle map sits behind one `RwLock`: lookups share it, structural
//! changes (create, close, delete, consistency reset, secret rotation) take
//! it exclusively. Each handle has its own `Mutex` so statements against
//! one file are serialized.
//!
//! Names are canonicalized everywhere (`app.db` and `app` are the same).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_BUSY_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::files::{canonical_name, Filesystem, LocalFilesystem, DB_SUFFIX};
use crate::secret::SecretStore;
use crate::storage::connection::rekey_file;
use crate::storage::{
    Changes, Database, OpenMode, Row, SetStatement, SqlValue, UpgradeStep, UpgradeTable,
};
use crate::sync::{parse_document, tracker, Exporter, Importer, JsonDatabase, SyncMode};

type ConnectionMap = HashMap<String, Mutex<Database>>;

/// Owner of every database handle.
pub struct ConnectionRegistry {
    connections: RwLock<ConnectionMap>,
    pending_upgrades: Mutex<HashMap<String, UpgradeTable>>,
    secrets: Arc<dyn SecretStore>,
    files: Arc<dyn Filesystem>,
    busy_timeout: Duration,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(secrets: Arc<dyn SecretStore>, files: Arc<dyn Filesystem>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            pending_upgrades: Mutex::new(HashMap::new()),
            secrets,
            files,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }

    /// Create a registry over a local database directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub fn from_config(config: &Config, secrets: Arc<dyn SecretStore>) -> Result<Self> {
        let files = LocalFilesystem::create(&config.database_dir)?;
        Ok(Self::new(secrets, Arc::new(files)).with_busy_timeout(config.busy_timeout))
    }

    #[must_use]
    pub const fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Create a handle for `name`, bringing its schema up to `version`.
    ///
    /// Upgrade steps registered earlier with
    /// [`add_upgrade_statement`](Self::add_upgrade_statement) are merged with
    /// `upgrades`; the latter win on a shared `from_version`. The handle is
    /// left closed.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` for a duplicate name, `InvalidArgument` for a
    /// bad upgrade step, and any open or migration failure. No handle is
    /// retained on failure.
    pub fn create_connection(
        &self,
        name: &str,
        encrypted: bool,
        mode: OpenMode,
        version: i64,
        upgrades: Vec<UpgradeStep>,
    ) -> Result<()> {
        let name = canonical_name(name);
        let mut map = self.write_map()?;
        if map.contains_key(&name) {
            return Err(Error::AlreadyExists { name });
        }

        let mut table = self
            .pending_upgrades
            .lock()
            .map_err(poisoned)?
            .get(&name)
            .cloned()
            .unwrap_or_default();
        for step in upgrades {
            step.validate()?;
            table.insert(step.from_version, step);
        }

        let path = self.files.resolve_database_path(&name);
        let mut db = Database::new(&name, path, encrypted, mode, version, table, self.busy_timeout);
        let secret = self.secret_for(&db)?;
        db.open(secret.as_deref())?;
        db.close()?;

        self.pending_upgrades.lock().map_err(poisoned)?.remove(&name);
        info!(database = %name, encrypted, %mode, version, "Created connection");
        map.insert(name, Mutex::new(db));
        Ok(())
    }

    /// Open the handle, applying any pending upgrades.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no handle, or the open failure.
    pub fn open(&self, name: &str) -> Result<()> {
        self.with_database(name, |db| {
            let secret = self.secret_for(db)?;
            db.open(secret.as_deref())?;
            debug!(database = db.name(), "Opened connection");
            Ok(())
        })
    }

    /// Close the handle, keeping it registered.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no handle, `Execution` if a transaction
    /// is pending.
    pub fn close(&self, name: &str) -> Result<()> {
        self.with_database(name, Database::close)
    }

    /// Close the handle and forget it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no handle, `Execution` if it cannot be
    /// closed, in which case it stays registered.
    pub fn close_connection(&self, name: &str) -> Result<()> {
        let name = canonical_name(name);
        let mut map = self.write_map()?;
        let cell = map
            .get_mut(&name)
            .ok_or_else(|| Error::NotFound { name: name.clone() })?;
        cell.get_mut().map_err(poisoned)?.close()?;
        map.remove(&name);
        info!(database = %name, "Closed connection");
        Ok(())
    }

    /// Close and forget every handle.
    ///
    /// Every handle is removed even when one fails to close; the first
    /// failure is reported.
    ///
    /// # Errors
    ///
    /// Returns the first close failure.
    pub fn close_all_connections(&self) -> Result<()> {
        let mut map = self.write_map()?;
        close_all_locked(&mut map)
    }

    /// Whether a handle is registered for `name`.
    #[must_use]
    pub fn is_connection(&self, name: &str) -> bool {
        self.read_map()
            .is_ok_and(|map| map.contains_key(&canonical_name(name)))
    }

    /// Registered names, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Consistency` if the registry lock is poisoned.
    pub fn connection_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.read_map()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Reconcile the registry against the names an outside layer believes
    /// are connected. Returns `true` when both agree.
    ///
    /// - no expected names: everything is closed, inconsistent
    /// - fewer handles than expected: everything is closed, inconsistent
    /// - more handles than expected: handles not expected are dropped
    ///   without an explicit close, then the sets are compared
    /// - any remaining difference: everything is closed, inconsistent
    ///
    /// # Errors
    ///
    /// Returns `Consistency` if resetting the registry fails.
    pub fn check_connections_consistency<S: AsRef<str>>(&self, expected: &[S]) -> Result<bool> {
        let expected: HashSet<String> = expected
            .iter()
            .map(|n| canonical_name(n.as_ref()))
            .collect();
        let mut map = self.write_map()?;

        if expected.is_empty() {
            reset(&mut map, "no connections expected")?;
            return Ok(false);
        }
        if map.len() < expected.len() {
            reset(&mut map, "fewer connections than expected")?;
            return Ok(false);
        }
        if map.len() > expected.len() {
            map.retain(|name, _| {
                let keep = expected.contains(name);
                if !keep {
                    warn!(database = %name, "Dropping connection unknown to caller");
                }
                keep
            });
        }

        let consistent =
            map.len() == expected.len() && map.keys().all(|name| expected.contains(name));
        if !consistent {
            reset(&mut map, "connection names differ")?;
        }
        Ok(consistent)
    }

    // ── Statements ──────────────────────────────────────────

    /// Execute one or more statements.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotOpen` or `Execution`.
    pub fn execute(&self, name: &str, statements: &str, transaction: bool) -> Result<Changes> {
        self.with_database(name, |db| db.execute_sql(statements, transaction))
    }

    /// Run one statement with positional values.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotOpen` or `Execution`.
    pub fn run(
        &self,
        name: &str,
        statement: &str,
        values: &[SqlValue],
        transaction: bool,
    ) -> Result<Changes> {
        self.with_database(name, |db| db.run_sql(statement, values, transaction))
    }

    /// Run an ordered set of statements.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotOpen` or `Execution`.
    pub fn execute_set(
        &self,
        name: &str,
        set: &[SetStatement],
        transaction: bool,
    ) -> Result<Changes> {
        self.with_database(name, |db| db.exec_set(set, transaction))
    }

    /// Run a query.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotOpen` or `Execution`.
    pub fn query(&self, name: &str, statement: &str, values: &[SqlValue]) -> Result<Vec<Row>> {
        self.with_database(name, |db| db.select_sql(statement, values))
    }

    // ── Introspection ───────────────────────────────────────

    /// # Errors
    ///
    /// Returns `NotFound` if there is no handle.
    pub fn is_db_open(&self, name: &str) -> Result<bool> {
        self.with_database(name, |db| Ok(db.is_open()))
    }

    /// Whether the file behind a registered handle exists.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no handle.
    pub fn is_db_exists(&self, name: &str) -> Result<bool> {
        self.with_database(name, |db| Ok(self.files.exists(db.path())))
    }

    /// Whether a database file exists for `name`, registered or not.
    #[must_use]
    pub fn is_database(&self, name: &str) -> bool {
        self.files.exists(&self.files.resolve_database_path(name))
    }

    /// # Errors
    ///
    /// Returns `NotFound` or `NotOpen`.
    pub fn is_table_exists(&self, name: &str, table: &str) -> Result<bool> {
        self.with_database(name, |db| db.is_table_exists(table))
    }

    /// Stored schema version of an open handle.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `NotOpen`.
    pub fn get_version(&self, name: &str) -> Result<i64> {
        self.with_database(name, |db| db.stored_version())
    }

    /// Database file names in the database directory, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be read.
    pub fn get_database_list(&self) -> Result<Vec<String>> {
        self.files.list_files(self.files.database_dir(), DB_SUFFIX)
    }

    /// Close the handle, delete its file and forget it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is no handle, `Execution` if it cannot be
    /// closed, `Io` if the file cannot be removed.
    pub fn delete_database(&self, name: &str) -> Result<()> {
        let name = canonical_name(name);
        let mut map = self.write_map()?;
        let cell = map
            .get_mut(&name)
            .ok_or_else(|| Error::NotFound { name: name.clone() })?;
        let db = cell.get_mut().map_err(poisoned)?;
        db.close()?;
        let path = db.path().to_path_buf();
        if self.files.exists(&path) {
            self.files.remove(&path)?;
        }
        map.remove(&name);
        info!(database = %name, "Deleted database");
        Ok(())
    }

    /// Register an upgrade step for a connection created later.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a step that does not move forward.
    pub fn add_upgrade_statement(&self, name: &str, step: UpgradeStep) -> Result<()> {
        step.validate()?;
        let name = canonical_name(name);
        debug!(database = %name, from = step.from_version, to = step.to_version, "Registered upgrade");
        self.pending_upgrades
            .lock()
            .map_err(poisoned)?
            .entry(name)
            .or_default()
            .insert(step.from_version, step);
        Ok(())
    }

    // ── Documents ───────────────────────────────────────────

    /// Validate a document without side effects.
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the first defect.
    pub fn is_json_valid(&self, text: &str) -> Result<()> {
        crate::sync::is_json_valid(text)
    }

    /// Import a document into the database it names.
    ///
    /// The import uses its own short-lived handle, closed before returning.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a malformed document, `Import` if the
    /// registry holds an open handle for the database (or any handle, for an
    /// overwrite) or the rows do not fit, and any open or engine failure.
    pub fn import_from_json(&self, text: &str) -> Result<Changes> {
        let doc = parse_document(text)?;
        let name = canonical_name(&doc.database);

        // Held for the whole import so nobody creates the handle meanwhile.
        let map = self.read_map()?;
        if let Some(cell) = map.get(&name) {
            if cell.lock().map_err(poisoned)?.is_open() {
                return Err(Error::Import(format!(
                    "database {name} is open, close it before importing"
                )));
            }
            // The handle's version and upgrades describe the file about to go.
            if doc.overwrite {
                return Err(Error::Import(format!(
                    "database {name} has a connection, remove it before an overwrite import"
                )));
            }
        }

        let path = self.files.resolve_database_path(&name);
        if doc.overwrite && self.files.exists(&path) {
            self.files.remove(&path)?;
            debug!(database = %name, "Removed database before overwrite");
        }

        let mode = if doc.encrypted {
            OpenMode::Secret
        } else {
            OpenMode::NoEncryption
        };
        let mut db = Database::new(
            &name,
            path,
            doc.encrypted,
            mode,
            doc.version,
            UpgradeTable::new(),
            self.busy_timeout,
        );
        let secret = self.secret_for(&db)?;
        db.open_raw(secret.as_deref())?;
        let imported = Importer::new(&mut db).import(&doc);
        let closed = db.close();
        drop(map);

        let changes = imported?;
        closed?;
        if changes.changes < 0 {
            return Err(Error::Import(format!(
                "import into {name} reported {} changes",
                changes.changes
            )));
        }
        Ok(changes)
    }

    /// Export an open database.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotOpen` or `Export`.
    pub fn export_to_json(&self, name: &str, mode: SyncMode) -> Result<JsonDatabase> {
        self.with_database(name, |db| Exporter::new(db).export(mode))
    }

    /// Create the sync table; 1 when created, 0 when it existed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotOpen` or `Execution`.
    pub fn create_sync_table(&self, name: &str) -> Result<i64> {
        self.with_database(name, |db| tracker::create_sync_table(db.connection()?))
    }

    /// # Errors
    ///
    /// Returns `NotFound`, `NotOpen` or `Sync`.
    pub fn set_sync_date(&self, name: &str, epoch: i64) -> Result<()> {
        self.with_database(name, |db| tracker::set_sync_date(db.connection()?, epoch))
    }

    /// Last sync date in epoch seconds, 0 when never set.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `NotOpen`.
    pub fn get_sync_date(&self, name: &str) -> Result<i64> {
        self.with_database(name, |db| tracker::sync_date(db.connection()?))
    }

    // ── Secrets ─────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `Secret` if the store cannot be read.
    pub fn is_secret_stored(&self) -> Result<bool> {
        self.secrets.has()
    }

    /// Store the first passphrase. Every connection is closed first.
    ///
    /// # Errors
    ///
    /// Returns `Secret` if the passphrase is empty or one is already stored.
    pub fn set_encryption_secret(&self, passphrase: &str) -> Result<()> {
        if passphrase.is_empty() {
            return Err(Error::Secret("passphrase must not be empty".to_string()));
        }
        if self.secrets.has()? {
            return Err(Error::Secret(
                "a passphrase is already stored, change it instead".to_string(),
            ));
        }
        self.close_all_connections()?;
        self.secrets.set(passphrase)?;
        info!("Stored encryption secret");
        Ok(())
    }

    /// Replace the passphrase and re-key every database encrypted with it.
    ///
    /// Every connection is closed first, whether or not the rotation then
    /// succeeds. Files already re-keyed are rolled back if a later one fails.
    ///
    /// # Errors
    ///
    /// Returns `Secret` if `old` is wrong, `new` is empty, or re-keying
    /// fails. The previous passphrase stays in effect on failure.
    pub fn change_encryption_secret(&self, new: &str, old: &str) -> Result<()> {
        let mut map = self.write_map()?;
        close_all_locked(&mut map)
            .map_err(|e| Error::Secret(format!("cannot close connections: {e}")))?;

        if new.is_empty() {
            return Err(Error::Secret("new passphrase must not be empty".to_string()));
        }
        match self.secrets.passphrase()? {
            Some(current) if current == old => {}
            _ => return Err(Error::Secret("the given old passphrase is wrong".to_string())),
        }

        let dir = self.files.database_dir().to_path_buf();
        let mut rekeyed: Vec<PathBuf> = Vec::new();
        for file in self.files.list_files(&dir, DB_SUFFIX)? {
            let path = dir.join(&file);
            match rekey_file(&path, old, new, self.busy_timeout) {
                Ok(true) => rekeyed.push(path),
                Ok(false) => {}
                Err(e) => {
                    self.roll_back_rekey(&rekeyed, new, old);
                    return Err(Error::Secret(format!("re-keying {file} failed: {e}")));
                }
            }
        }

        if let Err(e) = self.secrets.change(old, new) {
            self.roll_back_rekey(&rekeyed, new, old);
            return Err(e);
        }
        info!(files = rekeyed.len(), "Rotated encryption secret");
        Ok(())
    }

    fn roll_back_rekey(&self, paths: &[PathBuf], from: &str, to: &str) {
        for path in paths {
            if let Err(e) = rekey_file(path, from, to, self.busy_timeout) {
                warn!(path = %path.display(), error = %e, "Rolling back re-key failed");
            }
        }
    }

    // ── Internals ───────────────────────────────────────────

    fn read_map(&self) -> Result<RwLockReadGuard<'_, ConnectionMap>> {
        self.connections.read().map_err(poisoned)
    }

    fn write_map(&self) -> Result<RwLockWriteGuard<'_, ConnectionMap>> {
        self.connections.write().map_err(poisoned)
    }

    fn with_database<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Database) -> Result<T>,
    ) -> Result<T> {
        let name = canonical_name(name);
        let map = self.read_map()?;
        let cell = map.get(&name).ok_or(Error::NotFound { name })?;
        let mut db = cell.lock().map_err(poisoned)?;
        f(&mut db)
    }

    fn secret_for(&self, db: &Database) -> Result<Option<String>> {
        if !db.needs_secret() {
            return Ok(None);
        }
        match self.secrets.passphrase()? {
            Some(p) if !p.is_empty() => Ok(Some(p)),
            _ => Err(Error::Secret(format!(
                "database {} is encrypted but no passphrase is stored",
                db.name()
            ))),
        }
    }
}

fn close_all_locked(map: &mut ConnectionMap) -> Result<()> {
    let mut first_error = None;
    for (name, cell) in map.drain() {
        let closed = cell.into_inner().map_err(poisoned).and_then(|mut db| db.close());
        if let Err(e) = closed {
            warn!(database = %name, error = %e, "Failed to close connection");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn reset(map: &mut ConnectionMap, reason: &str) -> Result<()> {
    warn!(reason, open = map.len(), "Connections inconsistent, closing all");
    close_all_locked(map).map_err(|e| Error::Consistency(format!("{reason}: {e}")))
}

fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::Consistency("connection registry lock poisoned".to_string())
}
