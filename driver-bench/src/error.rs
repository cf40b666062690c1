//! Error taxonomy.
//!
//! Nothing here is recoverable: every variant of [`BenchError`] aborts the
//! case that raised it and halts the run.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = BenchError> = std::result::Result<T, E>;

/// A fault reported by a backend.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Turso(#[from] turso::Error),

    #[error("tokio runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("heap accounting: {0}")]
    Heap(&'static str),

    #[error("expected an integer column, found {0}")]
    NotAnInteger(String),

    #[error("statement #{slot} is not open on this connection")]
    StaleStatement { slot: usize },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("no backend registered as {0:?}")]
    UnknownBackend(String),

    #[error("a backend is already registered as {0:?}")]
    DuplicateBackend(String),

    #[error("invalid benchmark case: {0}")]
    InvalidCase(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("benchmark names collide: {0}")]
    NameCollision(String),

    /// Opening the backend, creating the schema, preparing statements or
    /// pre-populating the table failed.
    #[error("{case}: setup failed while {stage}: {source}")]
    Setup {
        case: String,
        stage: &'static str,
        #[source]
        source: DriverError,
    },

    /// A statement failed inside the iteration loop.
    #[error("{case}: execution failed while {stage}: {source}")]
    Execution {
        case: String,
        stage: &'static str,
        #[source]
        source: DriverError,
    },

    #[error("{case}: cursor was exhausted after {scanned} of {expected} rows")]
    ShortScan {
        case: String,
        scanned: u64,
        expected: u64,
    },

    /// Closing a statement or the connection failed.
    #[error("{case}: teardown failed while {stage}: {source}")]
    Teardown {
        case: String,
        stage: &'static str,
        #[source]
        source: DriverError,
    },

    /// A database file could not be removed, or is still present afterwards.
    #[error("cleanup of {} failed: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{case}: memory audit anomaly: {detail}")]
    AuditAnomaly { case: String, detail: String },

    #[error("memory audit misuse: {0}")]
    AuditMisuse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
