//! Error taxonomy for the scan coordinator and reconciliation engine.

use std::path::PathBuf;

use thiserror::Error;

/// The six error categories a caller embedding this crate needs to branch on,
/// plus the two catalog-level conditions (`Busy`, `SchemaMismatch`) that sit
/// alongside them. `integrity-warning` deliberately has no variant here: a
/// detected mismatch between catalog and filesystem is a `Modified` change
/// event, not a failure.
#[derive(Debug, Error)]
pub enum FixityError {
    /// A target or process configuration value is missing, malformed, or
    /// internally inconsistent. Raised before any filesystem or catalog I/O
    /// is attempted.
    #[error("bad configuration: {0}")]
    BadConfig(String),

    /// The catalog could not be reached (pool exhausted, connection refused,
    /// underlying SQLite error). A scan in progress transitions to `failed`.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(#[from] CatalogError),

    /// The walk root itself could not be opened or stat'd. Checked
    /// synchronously before the walk thread is spawned, so this never
    /// appears mid-stream.
    #[error("failed to open walk root {path}: {source}")]
    WalkRootFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single entry could not be processed (permission denied, I/O error
    /// mid-read, symlink loop). Isolated to that entry; the scan continues.
    #[error("error processing {path}: {message}")]
    PerEntryError { path: PathBuf, message: String },

    /// The scan was cancelled cooperatively. Not a failure: the scan is
    /// finalized as `partial` with a checkpoint that allows resume.
    #[error("scan cancelled")]
    Cancelled,

    /// A scan was requested for a target that already has a running scan.
    #[error("a scan is already running for this target")]
    Busy,

    /// The catalog's `schema_version` does not match what this crate
    /// understands. The crate does not run migrations itself.
    #[error("catalog schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { found: i64, expected: i64 },
}

/// Lower-level catalog failures, wrapped into [`FixityError::CatalogUnavailable`].
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("failed to (de)serialize catalog value: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FixityError>;
