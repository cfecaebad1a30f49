//! Error types for sqlkeep.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=engine, 3=not_found, 4=validation, etc.)
//! - Retryability flags for the calling bridge
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

/// Result type alias for sqlkeep operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Bridges match on the string; shell scripts on the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Engine (exit 2)
    ExecutionError,
    InvalidParameterType,

    // Connection state (exit 3)
    NotFound,
    AlreadyExists,
    NotOpen,
    ConsistencyError,

    // Document (exit 4)
    ValidationError,
    ImportError,
    ExportError,
    InvalidArgument,

    // Schema (exit 5)
    MigrationGap,

    // Sync (exit 6)
    SyncError,

    // Secret / config (exit 7)
    SecretError,
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::InvalidParameterType => "INVALID_PARAMETER_TYPE",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::NotOpen => "NOT_OPEN",
            Self::ConsistencyError => "CONSISTENCY_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ImportError => "IMPORT_ERROR",
            Self::ExportError => "EXPORT_ERROR",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::MigrationGap => "MIGRATION_GAP",
            Self::SyncError => "SYNC_ERROR",
            Self::SecretError => "SECRET_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
        }
    }

    /// Category-based exit code (2-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ExecutionError | Self::InvalidParameterType => 2,
            Self::NotFound | Self::AlreadyExists | Self::NotOpen | Self::ConsistencyError => 3,
            Self::ValidationError
            | Self::ImportError
            | Self::ExportError
            | Self::InvalidArgument => 4,
            Self::MigrationGap => 5,
            Self::SyncError => 6,
            Self::SecretError | Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the caller may retry with corrected input.
    ///
    /// True for input-shaped failures (bad parameter, malformed document,
    /// wrong connection state). False for structural and I/O failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameterType
                | Self::ValidationError
                | Self::InvalidArgument
                | Self::NotOpen
                | Self::AlreadyExists
                | Self::ExecutionError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in sqlkeep operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No available connection for database {name}")]
    NotFound { name: String },

    #[error("Connection {name} already exists")]
    AlreadyExists { name: String },

    #[error("Database {name} not opened")]
    NotOpen { name: String },

    #[error("Database {name}: no upgrade step from version {from} (target {target})")]
    MigrationGap { name: String, from: i64, target: i64 },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Invalid parameter type at position {position}: {found}")]
    InvalidParameterType { position: usize, found: String },

    #[error("Invalid document: {0}")]
    Validation(String),

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Secret error: {0}")]
    Secret(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Inconsistent connections: {0}")]
    Consistency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Execution(err.to_string())
    }
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::NotOpen { .. } => ErrorCode::NotOpen,
            Self::MigrationGap { .. } => ErrorCode::MigrationGap,
            Self::Execution(_) => ErrorCode::ExecutionError,
            Self::InvalidParameterType { .. } => ErrorCode::InvalidParameterType,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Import(_) => ErrorCode::ImportError,
            Self::Export(_) => ErrorCode::ExportError,
            Self::Secret(_) => ErrorCode::SecretError,
            Self::Sync(_) => ErrorCode::SyncError,
            Self::Consistency(_) => ErrorCode::ConsistencyError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotFound { name } => Some(format!(
                "Create the connection first: no handle is registered for '{name}'."
            )),
            Self::AlreadyExists { name } => Some(format!(
                "Close the existing connection to '{name}' before creating it again."
            )),
            Self::NotOpen { name } => Some(format!("Open '{name}' before running statements.")),
            Self::MigrationGap { from, .. } => Some(format!(
                "Register an upgrade statement with fromVersion {from}."
            )),
            Self::InvalidParameterType { .. } => {
                Some("Bound values must be text, integer, real or null.".to_string())
            }
            Self::Secret(msg) if msg.contains("not compiled") => Some(
                "Rebuild with `--features sqlcipher` to open encrypted databases.".to_string(),
            ),
            Self::Sync(_) => Some("Create the sync table before setting a sync date.".to_string()),
            Self::Execution(_)
            | Self::Validation(_)
            | Self::Import(_)
            | Self::Export(_)
            | Self::Secret(_)
            | Self::Consistency(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
