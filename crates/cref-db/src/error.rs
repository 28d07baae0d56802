use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize stored payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("Database is busy; gave up after {attempts} write attempts")]
    Contended { attempts: u32 },
}

/// Failure of one `ingest` batch. Validation failures abort the batch before
/// anything is written; previously ingested datasets are untouched.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid dataset metadata in '{path}': {reason}")]
    Validation { path: PathBuf, reason: String },

    #[error("Failed to read dataset metadata '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No dataset metadata found under '{0}' (expected *.json sidecar files)")]
    EmptyBatch(PathBuf),

    #[error(transparent)]
    Db(#[from] DbError),
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;
