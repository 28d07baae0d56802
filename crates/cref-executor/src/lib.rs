mod error;
mod local;
mod runtime;

pub use error::{ExecutorError, Result};
pub use local::LocalExecutor;
pub use runtime::RuntimeEnv;

use async_trait::async_trait;
use cref_core::model::{Dataset, ExecutionKey};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything an executor needs to run one diagnostic against one dataset
/// selection.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub provider_slug: String,
    pub diagnostic_slug: String,
    pub key: ExecutionKey,
    /// Absolute path of the diagnostic executable.
    pub command: PathBuf,
    /// Provider runtime environment prefix, if any.
    pub env_prefix: Option<PathBuf>,
    /// Result bundle directory for this execution.
    pub output_dir: PathBuf,
    pub datasets: Vec<Dataset>,
    /// Time between SIGTERM and SIGKILL on cancellation.
    pub grace_period: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    /// The diagnostic ran and reported failure.
    Failure { exit_code: Option<i32> },
    /// The cancellation token fired before the diagnostic finished.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticOutcome {
    pub status: ExecutionStatus,
    pub result_dir: PathBuf,
}

/// Pluggable execution strategy. Implementations must resolve the request to
/// a terminal `DiagnosticOutcome`, reserving `Err` for infrastructure
/// failures where the diagnostic could not be run at all.
#[async_trait]
pub trait DiagnosticExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<DiagnosticOutcome>;
}
