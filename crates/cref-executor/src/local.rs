use crate::error::{ExecutorError, Result};
use crate::runtime::RuntimeEnv;
use crate::{DiagnosticExecutor, DiagnosticOutcome, ExecutionRequest, ExecutionStatus};
use async_trait::async_trait;
use cref_core::constants::{files, logs, markers};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde_json::json;
use std::fs;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;

/// Runs diagnostics as local child processes, one per execution, with
/// stdout/stderr captured into the result bundle. Cancellation SIGTERMs the
/// child's process group and escalates to SIGKILL after the grace period.
#[derive(Debug, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DiagnosticExecutor for LocalExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<DiagnosticOutcome> {
        if !request.command.is_file() {
            return Err(ExecutorError::CommandMissing {
                provider: request.provider_slug.clone(),
                command: request.command.clone(),
            });
        }
        let runtime = match &request.env_prefix {
            Some(prefix) if !prefix.is_dir() => {
                return Err(ExecutorError::EnvMissing {
                    provider: request.provider_slug.clone(),
                    path: prefix.clone(),
                });
            }
            prefix => RuntimeEnv::from_prefix(prefix.clone()),
        };

        fs::create_dir_all(&request.output_dir)?;
        let _ = fs::remove_file(request.output_dir.join(markers::SUCCESS));
        let _ = fs::remove_file(request.output_dir.join(markers::FAIL));

        let inputs_path = request.output_dir.join(files::INPUTS);
        let inputs = json!({
            "provider": request.provider_slug,
            "diagnostic": request.diagnostic_slug,
            "key": request.key.to_string(),
            "output_dir": request.output_dir,
            "datasets": request.datasets,
        });
        fs::write(&inputs_path, serde_json::to_vec_pretty(&inputs)?)?;

        let stdout_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(request.output_dir.join(logs::STDOUT))
            .await?;
        let stderr_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(request.output_dir.join(logs::STDERR))
            .await?;

        let args = vec![
            inputs_path.to_string_lossy().into_owned(),
            request.output_dir.to_string_lossy().into_owned(),
        ];
        let mut cmd = runtime.build_command(&request.command, &args);
        cmd.stdout(stdout_log.into_std().await)
            .stderr(stderr_log.into_std().await)
            .process_group(0);

        tracing::info!(
            "Executing {}/{} [{}]: {:?}",
            request.provider_slug,
            request.diagnostic_slug,
            request.key,
            request.command
        );

        let mut child = cmd.spawn().map_err(|source| ExecutorError::SpawnFailed {
            command: request.command.display().to_string(),
            source,
        })?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                tracing::warn!(
                    "Cancelling {}/{} [{}]",
                    request.provider_slug,
                    request.diagnostic_slug,
                    request.key
                );
                terminate(&mut child, request.grace_period).await?;
                write_marker(&request.output_dir.join(markers::FAIL))?;
                return Ok(DiagnosticOutcome {
                    status: ExecutionStatus::Cancelled,
                    result_dir: request.output_dir,
                });
            }
        };

        let marker = if status.success() {
            markers::SUCCESS
        } else {
            markers::FAIL
        };
        write_marker(&request.output_dir.join(marker))?;

        let outcome_status = if status.success() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure {
                exit_code: status.code(),
            }
        };
        Ok(DiagnosticOutcome {
            status: outcome_status,
            result_dir: request.output_dir,
        })
    }
}

/// SIGTERM the child's process group, wait out the grace period, then
/// SIGKILL whatever is left. Always reaps the child.
async fn terminate(child: &mut Child, grace_period: std::time::Duration) -> Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    let pgid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        tracing::debug!("SIGTERM to process group {} failed: {}", pgid, e);
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(status) => {
            status?;
        }
        Err(_) => {
            tracing::warn!(
                "Process group {} survived SIGTERM for {:?}, sending SIGKILL",
                pgid,
                grace_period
            );
            if let Err(e) = killpg(pgid, Signal::SIGKILL) {
                tracing::debug!("SIGKILL to process group {} failed: {}", pgid, e);
            }
            child.wait().await?;
        }
    }
    Ok(())
}

fn write_marker(path: &Path) -> std::io::Result<()> {
    let f = fs::File::create(path)?;
    f.sync_all()
}
