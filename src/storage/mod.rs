//! SQLite storage layer.
//!
//! # Submodules
//!
//! - [`connection`] - Opening, keying and inspecting database files
//! - [`database`] - The named database handle and its statement operations
//! - [`migrations`] - Versioned upgrades over `PRAGMA user_version`
//! - [`statements`] - Statement text helpers
//! - [`value`] - Typed bound values

pub mod connection;
pub mod database;
pub mod migrations;
pub mod statements;
pub mod value;

pub use connection::OpenMode;
pub use database::{Changes, Database, Row, SetStatement};
pub use migrations::{upgrade_table, UpgradeStep, UpgradeTable};
pub use value::SqlValue;
