use async_trait::async_trait;
use cref_core::model::SourceType;
use cref_core::registry;
use cref_db::{ingest, Database, ExecutionErrorKind, GroupFilter};
use cref_executor::{
    DiagnosticExecutor, DiagnosticOutcome, ExecutionRequest, ExecutionStatus, ExecutorError,
};
use cref_solver::{solve, GroupState, SelectionPolicy, SolveOptions, SolverError};
use cref_test_utils::{FakeDiagnostic, TestContext};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Executor double: resolves after `delay`, failing or erroring for the
/// configured providers, and honoring cancellation.
#[derive(Default)]
struct StubExecutor {
    delay: Duration,
    fail_providers: HashSet<String>,
    infra_fail_providers: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl StubExecutor {
    fn instant() -> Self {
        Self::default()
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn failing(provider: &str) -> Self {
        Self {
            fail_providers: HashSet::from([provider.to_string()]),
            ..Self::default()
        }
    }

    fn infra_failing(provider: &str) -> Self {
        Self {
            infra_fail_providers: HashSet::from([provider.to_string()]),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DiagnosticExecutor for StubExecutor {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<DiagnosticOutcome, ExecutorError> {
        self.calls.lock().unwrap().push(format!(
            "{}/{}/{}",
            request.provider_slug, request.diagnostic_slug, request.key
        ));

        if self.infra_fail_providers.contains(&request.provider_slug) {
            return Err(ExecutorError::CommandMissing {
                provider: request.provider_slug,
                command: request.command,
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => {
                return Ok(DiagnosticOutcome {
                    status: ExecutionStatus::Cancelled,
                    result_dir: request.output_dir,
                });
            }
        }

        let status = if self.fail_providers.contains(&request.provider_slug) {
            ExecutionStatus::Failure { exit_code: Some(1) }
        } else {
            ExecutionStatus::Success
        };
        Ok(DiagnosticOutcome {
            status,
            result_dir: request.output_dir,
        })
    }
}

/// Executor double that never observes its cancellation token.
struct StuckExecutor;

#[async_trait]
impl DiagnosticExecutor for StuckExecutor {
    fn name(&self) -> &'static str {
        "stuck"
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        _cancel: CancellationToken,
    ) -> Result<DiagnosticOutcome, ExecutorError> {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(DiagnosticOutcome {
            status: ExecutionStatus::Success,
            result_dir: request.output_dir,
        })
    }
}

struct Session {
    ctx: TestContext,
    db: Database,
}

impl Session {
    fn providers(&self) -> Vec<cref_core::model::Provider> {
        let report = registry::discover(&self.ctx.providers_dir);
        assert!(report.errors.is_empty(), "discovery errors: {:?}", report.errors);
        report.providers
    }
}

fn session_with(providers: &[&str]) -> Session {
    let ctx = TestContext::new();
    for slug in providers {
        ctx.install_provider(
            slug,
            "1.0.0",
            &[FakeDiagnostic::new("tas-trend", "exit 0")],
        );
    }
    ctx.write_cmip6_dataset("ACCESS-ESM1-5", "historical", "tas");
    ctx.write_cmip6_dataset("MIROC6", "historical", "tas");

    let db = Database::open(&ctx.database_path()).unwrap();
    ingest(&db, SourceType::Cmip6, &ctx.sample_dir.join("CMIP6")).unwrap();
    Session { ctx, db }
}

fn options() -> SolveOptions {
    SolveOptions {
        concurrency: Some(2),
        grace_period: Duration::from_millis(300),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_all_pending_runs_every_group_once() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();

    let report = solve(
        &session.db,
        &providers,
        Arc::new(StubExecutor::instant()),
        &session.ctx.output_dir,
        options(),
    )
    .await
    .unwrap();

    assert_eq!(report.selected, 2);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.pending, 0);
    assert!(!report.deadline_hit);

    for group in session.db.groups(&GroupFilter::default()).unwrap() {
        let history = session.db.executions(group.id).unwrap();
        assert_eq!(history.len(), 1, "exactly one row per dispatched group");
        assert_eq!(history[0].successful, Some(true));
    }
}

#[tokio::test]
async fn test_resolve_is_idempotent_for_succeeded_groups() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();
    let executor = Arc::new(StubExecutor::instant());

    let first = solve(
        &session.db,
        &providers,
        Arc::clone(&executor) as Arc<dyn DiagnosticExecutor>,
        &session.ctx.output_dir,
        options(),
    )
    .await
    .unwrap();
    assert_eq!(first.succeeded(), 2);

    let second = solve(
        &session.db,
        &providers,
        executor,
        &session.ctx.output_dir,
        options(),
    )
    .await
    .unwrap();

    assert_eq!(second.selected, 0, "succeeded groups are not re-selected");
    for group in session.db.groups(&GroupFilter::default()).unwrap() {
        assert_eq!(session.db.executions(group.id).unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_failed_groups_stay_selectable_and_history_grows() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();

    for round in 1..=2 {
        let report = solve(
            &session.db,
            &providers,
            Arc::new(StubExecutor::failing("pmp")),
            &session.ctx.output_dir,
            options(),
        )
        .await
        .unwrap();
        assert_eq!(report.failed(), 2);

        for group in session.db.groups(&GroupFilter::default()).unwrap() {
            let history = session.db.executions(group.id).unwrap();
            assert_eq!(history.len(), round);
            let latest = history.last().unwrap();
            assert_eq!(latest.successful, Some(false));
            assert_eq!(latest.error_kind, Some(ExecutionErrorKind::Diagnostic));
        }
    }
}

#[tokio::test]
async fn test_include_successful_forces_reverification() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();
    let executor = Arc::new(StubExecutor::instant());

    solve(
        &session.db,
        &providers,
        Arc::clone(&executor) as Arc<dyn DiagnosticExecutor>,
        &session.ctx.output_dir,
        options(),
    )
    .await
    .unwrap();

    let rerun = solve(
        &session.db,
        &providers,
        executor,
        &session.ctx.output_dir,
        SolveOptions {
            include_successful: true,
            ..options()
        },
    )
    .await
    .unwrap();

    assert_eq!(rerun.selected, 2);
    for group in session.db.groups(&GroupFilter::default()).unwrap() {
        assert_eq!(session.db.executions(group.id).unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_one_per_diagnostic_covers_every_provider() {
    let session = session_with(&["esmvaltool", "ilamb", "pmp"]);
    let providers = session.providers();

    let report = solve(
        &session.db,
        &providers,
        Arc::new(StubExecutor::instant()),
        &session.ctx.output_dir,
        SolveOptions {
            policy: SelectionPolicy::OnePerDiagnostic,
            ..options()
        },
    )
    .await
    .unwrap();

    assert_eq!(report.selected, 3, "one group per distinct diagnostic");
    assert_eq!(report.succeeded(), 3);

    let summary = session.db.summary(&GroupFilter::default()).unwrap();
    let succeeded_providers: HashSet<&str> = summary
        .iter()
        .filter(|row| row.successful == Some(true))
        .map(|row| row.provider.as_str())
        .collect();
    assert_eq!(
        succeeded_providers,
        HashSet::from(["esmvaltool", "ilamb", "pmp"])
    );
}

#[tokio::test]
async fn test_timeout_leaves_no_running_executions() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();

    let started = std::time::Instant::now();
    let report = solve(
        &session.db,
        &providers,
        Arc::new(StubExecutor::with_delay(Duration::from_secs(60))),
        &session.ctx.output_dir,
        SolveOptions {
            concurrency: Some(1),
            timeout: Some(Duration::from_millis(300)),
            grace_period: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(report.deadline_hit);
    assert_eq!(report.timed_out(), 1, "the dispatched group timed out");
    assert_eq!(report.pending, 1, "the undispatched group stays pending");
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "the session must not wait out the executor"
    );

    for group in session.db.groups(&GroupFilter::default()).unwrap() {
        match session.db.latest_execution(group.id).unwrap() {
            // Never dispatched: PENDING, no row.
            None => {}
            Some(latest) => {
                assert_eq!(latest.successful, Some(false), "no RUNNING rows remain");
                assert_eq!(latest.error_kind, Some(ExecutionErrorKind::Timeout));
                assert!(latest.finished_at.is_some());
            }
        }
    }
}

#[tokio::test]
async fn test_stuck_executor_is_force_abandoned() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();

    let started = std::time::Instant::now();
    let report = solve(
        &session.db,
        &providers,
        Arc::new(StuckExecutor),
        &session.ctx.output_dir,
        SolveOptions {
            concurrency: Some(2),
            timeout: Some(Duration::from_millis(200)),
            grace_period: Duration::from_millis(200),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(report.deadline_hit);
    assert_eq!(report.timed_out(), 2);
    assert!(
        started.elapsed() < Duration::from_secs(30),
        "a stuck executor must not block the session"
    );

    for outcome in &report.outcomes {
        assert_eq!(outcome.state, GroupState::TimedOut);
        let latest = session
            .db
            .latest_execution(outcome.group_id)
            .unwrap()
            .unwrap();
        assert_eq!(latest.successful, Some(false));
        assert_eq!(latest.error_kind, Some(ExecutionErrorKind::Timeout));
    }
}

#[tokio::test]
async fn test_infrastructure_failure_is_isolated_to_its_provider() {
    let session = session_with(&["ilamb", "pmp"]);
    let providers = session.providers();

    let report = solve(
        &session.db,
        &providers,
        Arc::new(StubExecutor::infra_failing("ilamb")),
        &session.ctx.output_dir,
        options(),
    )
    .await
    .unwrap();

    assert_eq!(report.selected, 4);
    assert_eq!(report.failed(), 2, "ilamb groups fail");
    assert_eq!(report.succeeded(), 2, "pmp groups still complete");

    for outcome in &report.outcomes {
        let latest = session
            .db
            .latest_execution(outcome.group_id)
            .unwrap()
            .unwrap();
        if outcome.provider == "ilamb" {
            assert_eq!(latest.error_kind, Some(ExecutionErrorKind::Infrastructure));
            assert!(outcome.detail.is_some());
        } else {
            assert_eq!(latest.successful, Some(true));
        }
    }
}

#[tokio::test]
async fn test_solve_without_providers_is_a_construction_error() {
    let ctx = TestContext::new();
    let db = Database::open(&ctx.database_path()).unwrap();

    let result = solve(
        &db,
        &[],
        Arc::new(StubExecutor::instant()),
        &ctx.output_dir,
        SolveOptions::default(),
    )
    .await;

    assert!(matches!(result, Err(SolverError::NoProviders)));
}

#[tokio::test]
async fn test_groups_no_longer_matching_are_flagged_not_deleted() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();
    solve(
        &session.db,
        &providers,
        Arc::new(StubExecutor::instant()),
        &session.ctx.output_dir,
        options(),
    )
    .await
    .unwrap();

    // The provider narrows its requirement to a variable the catalog does
    // not hold; existing groups stop matching.
    session.ctx.install_provider(
        "pmp",
        "1.1.0",
        &[FakeDiagnostic::with_requirements(
            "tas-trend",
            "exit 0",
            r#"
[[diagnostics.requirements]]
source_type = "cmip6"
group_by = ["source_id", "experiment_id"]

[[diagnostics.requirements.filters]]
facet = "variable_id"
values = ["pr"]
"#,
        )],
    );
    let providers = session.providers();

    let report = solve(
        &session.db,
        &providers,
        Arc::new(StubExecutor::instant()),
        &session.ctx.output_dir,
        options(),
    )
    .await
    .unwrap();

    assert_eq!(report.selected, 0);
    let satisfiable = session
        .db
        .groups(&GroupFilter {
            satisfiable_only: true,
            ..Default::default()
        })
        .unwrap();
    assert!(satisfiable.is_empty());

    // History is retained on the flagged groups.
    let all = session.db.groups(&GroupFilter::default()).unwrap();
    assert_eq!(all.len(), 2);
    for group in all {
        assert_eq!(session.db.executions(group.id).unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_dispatch_order_is_deterministic() {
    let session = session_with(&["pmp"]);
    let providers = session.providers();

    let executor = Arc::new(StubExecutor::instant());
    solve(
        &session.db,
        &providers,
        Arc::clone(&executor) as Arc<dyn DiagnosticExecutor>,
        &session.ctx.output_dir,
        SolveOptions {
            concurrency: Some(1),
            ..options()
        },
    )
    .await
    .unwrap();

    let calls = executor.calls.lock().unwrap().clone();
    let mut sorted = calls.clone();
    sorted.sort();
    assert_eq!(calls, sorted, "dispatch follows sorted group order");
}
