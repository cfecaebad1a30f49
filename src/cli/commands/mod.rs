//! Command implementations.
//!
//! Every invocation builds a fresh [`Workspace`]: a registry over the
//! resolved database directory, with the `--secret` passphrase (if any)
//! in a process-local store.

pub mod database;
pub mod document;
pub mod version;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::files::{canonical_name, Filesystem, LocalFilesystem};
use crate::registry::ConnectionRegistry;
use crate::secret::{MemorySecretStore, SecretStore};
use crate::storage::connection::{
    close_connection, is_encrypted_file, open_connection, schema_version,
};
use crate::storage::OpenMode;

/// Registry plus the settings it was built from.
pub struct Workspace {
    config: Config,
    secret: Option<String>,
    registry: ConnectionRegistry,
}

impl Workspace {
    /// Resolve configuration and build the registry.
    ///
    /// # Errors
    ///
    /// Returns `Config` if no directory can be resolved, `Io` if it cannot
    /// be created.
    pub fn load(dir: Option<&Path>, secret: Option<&str>) -> Result<Self> {
        let config = Config::resolve(dir)?;
        let store = match secret {
            Some(s) => MemorySecretStore::with_passphrase(s),
            None => MemorySecretStore::new(),
        };
        let store: Arc<dyn SecretStore> = Arc::new(store);
        let registry = ConnectionRegistry::from_config(&config, store)?;
        Ok(Self {
            config,
            secret: secret.map(String::from),
            registry,
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register and open `name` at whatever version its file already has.
    ///
    /// An existing file is keyed only when it cannot be read without a key,
    /// so plaintext and encrypted databases mix under one `--secret`. A new
    /// file is encrypted when a secret is given. Returns the canonical name.
    ///
    /// # Errors
    ///
    /// Returns `Secret` if the passphrase does not open the file, or any
    /// engine failure.
    pub fn attach(&self, name: &str) -> Result<String> {
        let name = canonical_name(name);
        let path = LocalFilesystem::new(&self.config.database_dir).resolve_database_path(&name);

        let timeout = self.config.busy_timeout;

        let (encrypted, version) = if path.is_file() {
            let encrypted = is_encrypted_file(&path, timeout)?;
            let key = if encrypted {
                Some(self.secret.as_deref().ok_or_else(|| {
                    Error::Secret(format!("database {name} is encrypted, pass --secret"))
                })?)
            } else {
                None
            };
            let conn = open_connection(&path, key, timeout)?;
            let version = schema_version(&conn)?;
            close_connection(conn).map_err(|(_, e)| e)?;
            (encrypted, version)
        } else {
            (self.secret.is_some(), 0)
        };

        let mode = if encrypted {
            OpenMode::Secret
        } else {
            OpenMode::NoEncryption
        };
        debug!(database = %name, encrypted, version, "Attaching database");
        self.registry
            .create_connection(&name, encrypted, mode, version, Vec::new())?;
        self.registry.open(&name)?;
        Ok(name)
    }

    /// Close every connection.
    ///
    /// # Errors
    ///
    /// Returns the first close failure.
    pub fn finish(self) -> Result<()> {
        self.registry.close_all_connections()
    }
}
