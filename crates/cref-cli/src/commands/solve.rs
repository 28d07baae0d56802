use crate::cli::SolveArgs;
use crate::commands::AppContext;
use crate::error::{CliError, Result};
use colored::Colorize;
use cref_core::errors::{ConfigError, DomainError};
use cref_core::registry;
use cref_executor::LocalExecutor;
use cref_solver::{solve, GroupState, SelectionPolicy, SessionReport, SolveOptions, SolverEvent};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime as TokioRuntime;
use tokio_util::sync::CancellationToken;

pub fn handle_solve(args: SolveArgs, context: &AppContext) -> Result<()> {
    let discovery = registry::discover(&context.config.paths.providers_dir);
    for error in &discovery.errors {
        eprintln!("  {} {}", "WARN".yellow().bold(), error);
    }
    if discovery.is_empty() {
        return Err(CliError::Domain(DomainError::NoProviders(
            context.config.paths.providers_dir.clone(),
        )));
    }
    println!(
        "- Solving with {} provider(s): {}",
        discovery.providers.len(),
        discovery
            .providers
            .iter()
            .map(|p| p.slug.as_str())
            .collect::<Vec<_>>()
            .join(", ")
            .cyan()
    );

    let cancel = CancellationToken::new();
    let abort_handle = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\n- Abort requested, cancelling running executions...");
        abort_handle.cancel();
    }) {
        tracing::debug!("Could not install Ctrl-C handler: {}", e);
    }

    let (tx, rx) = mpsc::channel();
    let options = SolveOptions {
        policy: if args.one_per_diagnostic {
            SelectionPolicy::OnePerDiagnostic
        } else {
            SelectionPolicy::AllPending
        },
        include_successful: args.include_successful,
        concurrency: args.jobs.or(context.config.executor.concurrency),
        timeout: args.timeout.map(Duration::from_secs),
        grace_period: Duration::from_secs(context.config.executor.grace_period_secs),
        events: Some(tx),
        cancel: Some(cancel),
    };

    let db = context.db.clone();
    let providers = discovery.providers;
    let output_dir = context.config.paths.output_dir.clone();
    let solve_thread = thread::spawn(move || {
        let rt = TokioRuntime::new()?;
        rt.block_on(solve(
            &db,
            &providers,
            Arc::new(LocalExecutor::new()),
            &output_dir,
            options,
        ))
        .map_err(CliError::from)
    });

    let mut pb: Option<ProgressBar> = None;
    for event in rx {
        match event {
            SolverEvent::GroupsSynced {
                created,
                flagged_unsatisfiable,
                skipped_diagnostics,
            } => {
                println!(
                    "- Synchronized execution groups ({} new, {} no longer satisfiable, {} diagnostic(s) skipped)",
                    created, flagged_unsatisfiable, skipped_diagnostics
                );
            }
            SolverEvent::GroupsSelected { total } => {
                println!("- Selected {} execution group(s)", total.to_string().bold());
                if total > 0 {
                    let new_pb = ProgressBar::new(total as u64);
                    if let Ok(style) = ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    {
                        new_pb.set_style(style.progress_chars("#>-"));
                    }
                    pb = Some(new_pb);
                }
            }
            SolverEvent::ExecutionStarted {
                provider,
                diagnostic,
                key,
                ..
            } => {
                if let Some(pb) = pb.as_ref() {
                    pb.set_message(format!("{provider}/{diagnostic} [{key}]"));
                }
            }
            SolverEvent::ExecutionFinished {
                provider,
                diagnostic,
                key,
                state,
            } => {
                let label = match state {
                    GroupState::Succeeded => "OK".green().bold(),
                    GroupState::Failed => "FAIL".red().bold(),
                    GroupState::TimedOut => "TIME".yellow().bold(),
                };
                if let Some(pb) = pb.as_ref() {
                    pb.inc(1);
                }
                println!(
                    "  {} {}/{} {}",
                    label,
                    provider,
                    diagnostic,
                    format!("[{key}]").dimmed()
                );
            }
            SolverEvent::DeadlineReached => {
                eprintln!("  {} session deadline reached", "WARN".yellow().bold());
            }
        }
    }
    if let Some(pb) = pb.as_ref() {
        pb.finish_and_clear();
    }

    let report = solve_thread
        .join()
        .map_err(|e| {
            CliError::Config(ConfigError::General(format!(
                "Solve session panicked: {e:?}"
            )))
        })??;

    print_report(&report);
    Ok(())
}

fn print_report(report: &SessionReport) {
    println!(
        "- Session {} finished in {:.1}s: {} {} / {} {} / {} {} / {} pending",
        report.session_id,
        (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0,
        report.succeeded().to_string().green().bold(),
        "ok",
        report.failed().to_string().red().bold(),
        "failed",
        report.timed_out().to_string().yellow().bold(),
        "timed out",
        report.pending
    );

    for outcome in &report.outcomes {
        if outcome.state != GroupState::Succeeded {
            let detail = outcome.detail.as_deref().unwrap_or("no detail");
            println!(
                "    {} {}/{} [{}]: {}",
                outcome.state.to_string().red(),
                outcome.provider,
                outcome.diagnostic,
                outcome.key,
                detail
            );
        }
    }
}
