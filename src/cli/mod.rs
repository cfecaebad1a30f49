//! CLI definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::sync::SyncMode;

pub mod commands;

/// Export mode flag.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportMode {
    /// Every table and row
    #[default]
    Full,
    /// Only changes since the last sync date
    Partial,
}

impl From<ExportMode> for SyncMode {
    fn from(mode: ExportMode) -> Self {
        match mode {
            ExportMode::Full => Self::Full,
            ExportMode::Partial => Self::Partial,
        }
    }
}

/// sqlkeep - named SQLite databases with migrations and JSON sync
#[derive(Parser, Debug)]
#[command(name = "sqlkeep", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database directory (default: ~/.sqlkeep/databases)
    #[arg(long, global = true, env = "SQLKEEP_DIR")]
    pub dir: Option<PathBuf>,

    /// Passphrase for encrypted databases
    #[arg(long, global = true, env = "SQLKEEP_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List database files in the database directory
    List,

    /// Check a JSON document without importing it
    Validate {
        /// Path to the JSON document
        file: PathBuf,
    },

    /// Import a JSON document into the database it names
    Import {
        /// Path to the JSON document
        file: PathBuf,
    },

    /// Export a database as a JSON document
    Export {
        /// Database name
        name: String,

        /// Export mode
        #[arg(long, value_enum, default_value_t)]
        mode: ExportMode,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Execute one or more SQL statements
    Exec {
        /// Database name
        name: String,

        /// SQL statements, separated by `;`
        sql: String,

        /// Run without wrapping the statements in a transaction
        #[arg(long)]
        no_transaction: bool,
    },

    /// Run a query and print the rows
    Query {
        /// Database name
        name: String,

        /// SELECT statement
        sql: String,

        /// Bound values as a JSON array, e.g. '[1, "a"]'
        #[arg(long)]
        values: Option<String>,
    },

    /// Show or set the last sync date
    SyncDate {
        /// Database name
        name: String,

        /// New sync date in epoch seconds
        #[arg(long)]
        set: Option<i64>,
    },

    /// Print version information
    Version,
}
