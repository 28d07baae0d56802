use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] cref_core::errors::ConfigError),

    #[error(transparent)]
    Domain(#[from] cref_core::errors::DomainError),

    #[error(transparent)]
    Db(#[from] cref_db::DbError),

    #[error(transparent)]
    Ingest(#[from] cref_db::IngestError),

    #[error(transparent)]
    Solver(#[from] cref_solver::SolverError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse bundle manifest: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("Bundle integrity check failed: file '{path}' has hash '{actual}', expected '{expected}'.")]
    FetchHashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Bundle file '{0}' is missing from the registry source.")]
    FetchFileMissing(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
