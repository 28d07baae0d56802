use crate::error::Result;
use cref_core::matcher::match_diagnostic;
use cref_core::model::Provider;
use cref_db::{Database, DatasetFilter};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub flagged_unsatisfiable: usize,
    pub skipped_diagnostics: usize,
}

/// Bring the execution group store up to date with the current catalog and
/// provider snapshot.
///
/// Freshly matched keys become new groups with empty history; keys already
/// present are left untouched (re-matching alone never implies re-running).
/// Stored keys that no longer match are flagged unsatisfiable instead of
/// deleted, so execution history survives catalog churn. Diagnostics with a
/// malformed requirement are skipped and logged, never fatal.
pub fn sync_execution_groups(db: &Database, providers: &[Provider]) -> Result<SyncSummary> {
    let datasets = db.datasets(&DatasetFilter::default())?;
    let mut summary = SyncSummary::default();

    for provider in providers {
        let provider_id = db.upsert_provider(&provider.slug, &provider.version)?;
        for diagnostic in &provider.diagnostics {
            let diagnostic_id =
                db.upsert_diagnostic(provider_id, &diagnostic.slug, &diagnostic.name)?;

            let matched = match match_diagnostic(diagnostic, &datasets) {
                Ok(matched) => matched,
                Err(e) => {
                    tracing::warn!(
                        "Skipping diagnostic '{}/{}': {}",
                        provider.slug,
                        diagnostic.slug,
                        e
                    );
                    summary.skipped_diagnostics += 1;
                    continue;
                }
            };

            let existing = db.group_keys_for_diagnostic(diagnostic_id)?;

            for selection in matched.values() {
                let (_, inserted) = db.upsert_group(diagnostic_id, selection)?;
                if inserted {
                    summary.created += 1;
                }
            }

            for (group_id, key, satisfiable) in existing {
                if satisfiable && !matched.contains_key(&key) {
                    tracing::info!(
                        "Group {} of '{}/{}' is no longer satisfiable by the catalog",
                        key,
                        provider.slug,
                        diagnostic.slug
                    );
                    db.mark_unsatisfiable(group_id)?;
                    summary.flagged_unsatisfiable += 1;
                }
            }
        }
    }

    Ok(summary)
}
