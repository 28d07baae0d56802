use std::path::PathBuf;
use thiserror::Error;

/// Infrastructure failures only: the executor could not run the diagnostic
/// at all. A diagnostic that runs and reports failure is a normal
/// `DiagnosticOutcome`, not an error.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize execution inputs: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Diagnostic command '{command}' of provider '{provider}' does not exist.")]
    CommandMissing { provider: String, command: PathBuf },

    #[error("Runtime environment '{path}' of provider '{provider}' is not materialized.\nInstall the provider environment, or remove env_prefix from its manifest to run natively.")]
    EnvMissing { provider: String, path: PathBuf },

    #[error("Failed to spawn diagnostic command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
