use crate::error::{Result, SolverError};
use crate::event::SolverEvent;
use crate::report::{GroupOutcome, GroupState, SessionReport};
use crate::sync::sync_execution_groups;
use chrono::Utc;
use cref_core::model::{ExecutionKey, Provider};
use cref_db::{Database, ExecutionErrorKind, GroupFilter, GroupRecord};
use cref_executor::{DiagnosticExecutor, ExecutionRequest, ExecutionStatus, ExecutorError};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id as TaskId, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Extra time the session waits beyond the executor grace period before
/// force-abandoning cancelled executions.
const DRAIN_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Every satisfiable group whose latest execution is absent or
    /// unsuccessful.
    #[default]
    AllPending,
    /// Exactly one such group per distinct diagnostic; cheap breadth check
    /// across providers.
    OnePerDiagnostic,
}

pub struct SolveOptions {
    pub policy: SelectionPolicy,
    /// Also select groups whose latest execution succeeded (forced
    /// re-verification).
    pub include_successful: bool,
    /// Worker-pool size; defaults to the CPU count.
    pub concurrency: Option<usize>,
    /// Global session deadline; `None` runs to completion.
    pub timeout: Option<Duration>,
    /// Time a cancelled diagnostic gets between SIGTERM and SIGKILL.
    pub grace_period: Duration,
    pub events: Option<Sender<SolverEvent>>,
    /// External abort hook; cancelling it behaves exactly like deadline
    /// expiry.
    pub cancel: Option<CancellationToken>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::AllPending,
            include_successful: false,
            concurrency: None,
            timeout: None,
            grace_period: Duration::from_secs(5),
            events: None,
            cancel: None,
        }
    }
}

struct InFlight {
    group_id: i64,
    execution_id: i64,
    provider: String,
    diagnostic: String,
    key: ExecutionKey,
}

/// Run one solve session over the given provider snapshot.
///
/// Synchronizes execution groups, selects per the policy, dispatches to the
/// executor under the concurrency bound, and finalizes exactly one execution
/// row per dispatched group. Always returns a report when the session could
/// be constructed; per-group failures and deadline expiry are report
/// content, not errors.
pub async fn solve(
    db: &Database,
    providers: &[Provider],
    executor: Arc<dyn DiagnosticExecutor>,
    output_dir: &Path,
    options: SolveOptions,
) -> Result<SessionReport> {
    if providers.is_empty() {
        return Err(SolverError::NoProviders);
    }

    let session_id = Uuid::new_v4();
    let started_at = Utc::now();
    tracing::info!(
        "Solve session {} starting with {} provider(s) via '{}' executor",
        session_id,
        providers.len(),
        executor.name()
    );

    let sync = sync_execution_groups(db, providers)?;
    emit(
        &options.events,
        SolverEvent::GroupsSynced {
            created: sync.created,
            flagged_unsatisfiable: sync.flagged_unsatisfiable,
            skipped_diagnostics: sync.skipped_diagnostics,
        },
    );

    let mut queue = select_groups(db, providers, &options)?;
    let total = queue.len();
    emit(&options.events, SolverEvent::GroupsSelected { total });

    let concurrency = options.concurrency.unwrap_or_else(num_cpus::get).max(1);
    let cancel = options.cancel.clone().unwrap_or_default();
    let deadline = options.timeout.map(|t| Instant::now() + t);

    let snapshot: HashMap<&str, &Provider> =
        providers.iter().map(|p| (p.slug.as_str(), p)).collect();

    let mut join_set: JoinSet<std::result::Result<_, ExecutorError>> = JoinSet::new();
    let mut in_flight: HashMap<TaskId, InFlight> = HashMap::new();
    let mut outcomes: Vec<GroupOutcome> = Vec::new();
    let mut dispatched = 0usize;
    let mut deadline_hit = false;

    loop {
        if !cancel.is_cancelled() {
            while in_flight.len() < concurrency {
                let Some(group) = queue.pop_front() else { break };
                let Some(request) =
                    build_request(&group, &snapshot, output_dir, &options, db)?
                else {
                    continue;
                };
                let (request, execution_id) = request;

                dispatched += 1;
                emit(
                    &options.events,
                    SolverEvent::ExecutionStarted {
                        provider: group.provider_slug.clone(),
                        diagnostic: group.diagnostic_slug.clone(),
                        key: group.key.clone(),
                        current: dispatched,
                        total,
                    },
                );

                let task_executor = Arc::clone(&executor);
                let token = cancel.child_token();
                let handle =
                    join_set.spawn(async move { task_executor.execute(request, token).await });
                in_flight.insert(
                    handle.id(),
                    InFlight {
                        group_id: group.id,
                        execution_id,
                        provider: group.provider_slug,
                        diagnostic: group.diagnostic_slug,
                        key: group.key,
                    },
                );
            }
        }

        if cancel.is_cancelled() || (in_flight.is_empty() && queue.is_empty()) {
            break;
        }

        tokio::select! {
            joined = join_set.join_next_with_id() => {
                if let Some(result) = joined {
                    handle_joined(result, &mut in_flight, db, &mut outcomes, &options.events)?;
                }
            }
            _ = wait_for_deadline(deadline) => {
                tracing::warn!(
                    "Solve session {} hit its deadline; cancelling running executions",
                    session_id
                );
                deadline_hit = true;
                cancel.cancel();
                emit(&options.events, SolverEvent::DeadlineReached);
            }
            _ = cancel.cancelled() => {}
        }
    }

    // Cancelled executions get the grace period (plus reaping margin) to
    // resolve on their own, then are force-abandoned so a stuck executor can
    // never block the session.
    if !in_flight.is_empty() {
        let drain_deadline = Instant::now() + options.grace_period + DRAIN_MARGIN;
        while !in_flight.is_empty() {
            match tokio::time::timeout_at(drain_deadline, join_set.join_next_with_id()).await {
                Ok(Some(result)) => {
                    handle_joined(result, &mut in_flight, db, &mut outcomes, &options.events)?;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Force-abandoning {} execution(s) still running after the grace period",
                        in_flight.len()
                    );
                    join_set.abort_all();
                    while let Some(result) = join_set.join_next_with_id().await {
                        handle_joined(result, &mut in_flight, db, &mut outcomes, &options.events)?;
                    }
                    break;
                }
            }
        }
    }

    let report = SessionReport {
        session_id,
        started_at,
        finished_at: Utc::now(),
        selected: total,
        pending: queue.len(),
        deadline_hit,
        outcomes,
    };
    tracing::info!(
        "Solve session {} finished: {} succeeded, {} failed, {} timed out, {} left pending",
        session_id,
        report.succeeded(),
        report.failed(),
        report.timed_out(),
        report.pending
    );
    Ok(report)
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn emit(events: &Option<Sender<SolverEvent>>, event: SolverEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

/// Pure filter over stored groups; never alters what the matcher produced.
/// Dispatch order is the store's (provider, diagnostic, key) order, so a
/// given input set always dispatches identically.
fn select_groups(
    db: &Database,
    providers: &[Provider],
    options: &SolveOptions,
) -> Result<VecDeque<GroupRecord>> {
    let filter = GroupFilter {
        satisfiable_only: true,
        ..Default::default()
    };
    let groups = db.groups(&filter)?;
    let statuses: HashMap<i64, Option<bool>> = db
        .summary(&filter)?
        .into_iter()
        .map(|s| (s.group_id, s.successful))
        .collect();

    let known: HashMap<&str, &Provider> =
        providers.iter().map(|p| (p.slug.as_str(), p)).collect();

    let mut selected = VecDeque::new();
    let mut last_diagnostic: Option<(String, String)> = None;
    for group in groups {
        // Groups from providers absent in this snapshot stay untouched.
        let Some(provider) = known.get(group.provider_slug.as_str()) else {
            continue;
        };
        if !provider
            .diagnostics
            .iter()
            .any(|d| d.slug == group.diagnostic_slug)
        {
            continue;
        }

        let succeeded = statuses
            .get(&group.id)
            .copied()
            .flatten()
            .unwrap_or(false);
        if succeeded && !options.include_successful {
            continue;
        }

        if options.policy == SelectionPolicy::OnePerDiagnostic {
            let diagnostic =
                (group.provider_slug.clone(), group.diagnostic_slug.clone());
            if last_diagnostic.as_ref() == Some(&diagnostic) {
                continue;
            }
            last_diagnostic = Some(diagnostic);
        }

        selected.push_back(group);
    }
    Ok(selected)
}

type PreparedDispatch = (ExecutionRequest, i64);

/// Append the RUNNING row and assemble the executor request. Returns None
/// when the group's diagnostic vanished from the snapshot between selection
/// and dispatch.
fn build_request(
    group: &GroupRecord,
    snapshot: &HashMap<&str, &Provider>,
    output_dir: &Path,
    options: &SolveOptions,
    db: &Database,
) -> Result<Option<PreparedDispatch>> {
    let Some(provider) = snapshot.get(group.provider_slug.as_str()) else {
        return Ok(None);
    };
    let Some(diagnostic) = provider
        .diagnostics
        .iter()
        .find(|d| d.slug == group.diagnostic_slug)
    else {
        return Ok(None);
    };

    let execution_id = db.begin_execution(group.id)?;
    let bundle_dir: PathBuf = output_dir
        .join(&group.provider_slug)
        .join(&group.diagnostic_slug)
        .join(group.key.to_string())
        .join(execution_id.to_string());

    let request = ExecutionRequest {
        provider_slug: group.provider_slug.clone(),
        diagnostic_slug: group.diagnostic_slug.clone(),
        key: group.key.clone(),
        command: provider.root.join(&diagnostic.command),
        env_prefix: provider.env_prefix.clone(),
        output_dir: bundle_dir,
        datasets: group.selection.datasets.clone(),
        grace_period: options.grace_period,
    };
    Ok(Some((request, execution_id)))
}

type JoinedExecution =
    std::result::Result<(TaskId, std::result::Result<cref_executor::DiagnosticOutcome, ExecutorError>), JoinError>;

/// Finalize the execution row for one completed, failed, cancelled, or
/// abandoned task and record its outcome.
fn handle_joined(
    result: JoinedExecution,
    in_flight: &mut HashMap<TaskId, InFlight>,
    db: &Database,
    outcomes: &mut Vec<GroupOutcome>,
    events: &Option<Sender<SolverEvent>>,
) -> Result<()> {
    let (task_id, execution) = match result {
        Ok((task_id, execution)) => (task_id, Some(execution)),
        Err(join_error) => (join_error.id(), join_error_outcome(join_error)),
    };
    let Some(meta) = in_flight.remove(&task_id) else {
        tracing::error!("Completed task {:?} was not tracked as in-flight", task_id);
        return Ok(());
    };

    let (state, detail, error_kind, result_path) = match execution {
        Some(Ok(outcome)) => match outcome.status {
            ExecutionStatus::Success => {
                (GroupState::Succeeded, None, None, Some(outcome.result_dir))
            }
            ExecutionStatus::Failure { exit_code } => (
                GroupState::Failed,
                Some(format!(
                    "diagnostic exited with code {}",
                    exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
                )),
                Some(ExecutionErrorKind::Diagnostic),
                Some(outcome.result_dir),
            ),
            ExecutionStatus::Cancelled => (
                GroupState::TimedOut,
                None,
                Some(ExecutionErrorKind::Timeout),
                Some(outcome.result_dir),
            ),
        },
        Some(Err(e)) => {
            tracing::error!(
                "Executor infrastructure failure for {}/{} [{}]: {}",
                meta.provider,
                meta.diagnostic,
                meta.key,
                e
            );
            (
                GroupState::Failed,
                Some(e.to_string()),
                Some(ExecutionErrorKind::Infrastructure),
                None,
            )
        }
        // Force-abandoned after the grace period.
        None => (
            GroupState::TimedOut,
            Some("abandoned after grace period".to_string()),
            Some(ExecutionErrorKind::Timeout),
            None,
        ),
    };

    db.finish_execution(
        meta.execution_id,
        state == GroupState::Succeeded,
        error_kind,
        result_path.as_ref(),
    )?;

    emit(
        events,
        SolverEvent::ExecutionFinished {
            provider: meta.provider.clone(),
            diagnostic: meta.diagnostic.clone(),
            key: meta.key.clone(),
            state,
        },
    );
    outcomes.push(GroupOutcome {
        group_id: meta.group_id,
        execution_id: meta.execution_id,
        provider: meta.provider,
        diagnostic: meta.diagnostic,
        key: meta.key,
        state,
        detail,
    });
    Ok(())
}

/// An aborted task maps to the abandoned case; a panicked executor is an
/// infrastructure failure.
fn join_error_outcome(
    join_error: JoinError,
) -> Option<std::result::Result<cref_executor::DiagnosticOutcome, ExecutorError>> {
    if join_error.is_cancelled() {
        None
    } else {
        Some(Err(ExecutorError::Io(std::io::Error::other(format!(
            "executor task panicked: {join_error}"
        )))))
    }
}
