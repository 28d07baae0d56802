use crate::database::Database;
use crate::error::Result;
use crate::store::GroupFilter;
use cref_core::model::ExecutionKey;
use rusqlite::params;

/// One row of the read-only result surface: a group joined with its latest
/// execution. `successful` is None for groups that were never dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub provider: String,
    pub diagnostic: String,
    pub group_id: i64,
    pub key: ExecutionKey,
    pub execution_id: Option<i64>,
    pub successful: Option<bool>,
}

impl Database {
    /// Summarize execution groups with their authoritative latest attempt,
    /// ordered by (provider, diagnostic, key). Pure read.
    pub fn summary(&self, filter: &GroupFilter) -> Result<Vec<ExecutionSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT p.slug, d.slug, g.id, g.key, e.id, e.successful
             FROM execution_group g
             JOIN diagnostic d ON d.id = g.diagnostic_id
             JOIN provider p ON p.id = d.provider_id
             LEFT JOIN execution e ON e.id = (
                 SELECT MAX(id) FROM execution WHERE group_id = g.id
             )
             WHERE (?1 IS NULL OR p.slug = ?1)
               AND (?2 IS NULL OR d.slug = ?2)
               AND (?3 = 0 OR g.satisfiable = 1)
             ORDER BY p.slug, d.slug, g.key",
        )?;
        let rows = stmt.query_map(
            params![
                filter.provider.as_deref(),
                filter.diagnostic.as_deref(),
                filter.satisfiable_only,
            ],
            |row| {
                Ok(ExecutionSummary {
                    provider: row.get(0)?,
                    diagnostic: row.get(1)?,
                    group_id: row.get(2)?,
                    key: ExecutionKey(row.get::<_, String>(3)?),
                    execution_id: row.get(4)?,
                    successful: row.get(5)?,
                })
            },
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ExecutionErrorKind;
    use cref_core::model::{DatasetSelection, Facets};

    fn selection(model: &str) -> DatasetSelection {
        let mut key_facets = Facets::new();
        key_facets.insert("source_id".to_string(), model.to_string());
        DatasetSelection {
            key_facets,
            datasets: vec![],
        }
    }

    #[test]
    fn test_summary_reflects_latest_execution_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("cref.db")).unwrap();

        let provider_id = db.upsert_provider("ilamb", "1.0.0").unwrap();
        let diagnostic_id = db.upsert_diagnostic(provider_id, "gpp", "GPP").unwrap();
        let (group_id, _) = db.upsert_group(diagnostic_id, &selection("MIROC6")).unwrap();

        // Never dispatched: no execution columns.
        let rows = db.summary(&GroupFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].execution_id, None);
        assert_eq!(rows[0].successful, None);

        let failed = db.begin_execution(group_id).unwrap();
        db.finish_execution(failed, false, Some(ExecutionErrorKind::Diagnostic), None)
            .unwrap();
        let ok = db.begin_execution(group_id).unwrap();
        db.finish_execution(ok, true, None, None).unwrap();

        let rows = db.summary(&GroupFilter::default()).unwrap();
        assert_eq!(rows[0].execution_id, Some(ok));
        assert_eq!(rows[0].successful, Some(true));
    }

    #[test]
    fn test_summary_orders_by_provider_diagnostic_key() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("cref.db")).unwrap();

        for provider in ["pmp", "esmvaltool", "ilamb"] {
            let pid = db.upsert_provider(provider, "1.0.0").unwrap();
            let did = db.upsert_diagnostic(pid, "diag", "Diag").unwrap();
            db.upsert_group(did, &selection("MIROC6")).unwrap();
        }

        let rows = db.summary(&GroupFilter::default()).unwrap();
        let providers: Vec<_> = rows.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(providers, vec!["esmvaltool", "ilamb", "pmp"]);
    }
}
