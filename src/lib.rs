//! sqlkeep - named SQLite databases with migrations and JSON sync
//!
//! This crate manages a set of independently named, optionally encrypted
//! SQLite databases: opening and closing connections, applying versioned
//! schema upgrades, running statements, and converting whole databases to
//! and from a JSON interchange document.
//!
//! # Architecture
//!
//! - [`registry`] - The connection registry, owner of every handle
//! - [`storage`] - SQLite layer: handles, migrations, bound values
//! - [`sync`] - JSON import/export and the sync tracker
//! - [`secret`] - Encryption passphrase storage
//! - [`files`] - Database file layout
//! - [`config`] - Configuration management
//! - [`cli`] - Command-line interface using clap
//! - [`error`] - Error types and handling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqlkeep::files::LocalFilesystem;
//! use sqlkeep::registry::ConnectionRegistry;
//! use sqlkeep::secret::MemorySecretStore;
//! use sqlkeep::storage::OpenMode;
//!
//! # fn main() -> sqlkeep::Result<()> {
//! let registry = ConnectionRegistry::new(
//!     Arc::new(MemorySecretStore::new()),
//!     Arc::new(LocalFilesystem::create("/tmp/sqlkeep")?),
//! );
//! registry.create_connection("app", false, OpenMode::NoEncryption, 0, Vec::new())?;
//! registry.open("app")?;
//! registry.execute("app", "CREATE TABLE IF NOT EXISTS kv (k TEXT, v TEXT);", true)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod registry;
pub mod secret;
pub mod storage;
pub mod sync;

pub use error::{Error, Result};
pub use registry::ConnectionRegistry;
