//! JSON import/export of whole databases.
//!
//! - **Validate**: structural checks on an interchange document
//! - **Export**: database → document, full or since the last sync
//! - **Import**: document → database, replacing or merging
//! - **Tracker**: the `sync_table` record partial exports are based on
//!
//! # Example
//!
//! ```ignore
//! use sqlkeep::sync::{parse_document, Exporter, Importer, SyncMode};
//!
//! let doc = Exporter::new(&db).export(SyncMode::Full)?;
//! let changes = Importer::new(&mut other).import(&doc)?;
//! ```

mod export;
mod import;
pub mod schema;
pub mod tracker;
mod types;
mod validate;

pub use export::{Exporter, LAST_MODIFIED};
pub use import::Importer;
pub use tracker::SYNC_TABLE;
pub use types::{JsonColumn, JsonDatabase, JsonIndex, JsonTable, JsonTrigger, JsonView, SyncMode};
pub use validate::{is_json_valid, parse_document, validate_document};
