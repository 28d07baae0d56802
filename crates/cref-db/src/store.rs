use crate::database::Database;
use crate::error::{DbError, Result};
use chrono::{DateTime, Utc};
use cref_core::model::{DatasetSelection, ExecutionKey};
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Why a non-successful execution ended the way it did. `Diagnostic` is the
/// diagnostic itself reporting failure; `Infrastructure` is the executor
/// being unable to run it at all; `Timeout` is the session deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    Diagnostic,
    Infrastructure,
    Timeout,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionErrorKind::Diagnostic => write!(f, "diagnostic"),
            ExecutionErrorKind::Infrastructure => write!(f, "infrastructure"),
            ExecutionErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

impl FromStr for ExecutionErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "diagnostic" => Ok(ExecutionErrorKind::Diagnostic),
            "infrastructure" => Ok(ExecutionErrorKind::Infrastructure),
            "timeout" => Ok(ExecutionErrorKind::Timeout),
            _ => Err(format!("unknown execution error kind '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRecord {
    pub id: i64,
    pub provider_slug: String,
    pub diagnostic_slug: String,
    pub key: ExecutionKey,
    pub selection: DatasetSelection,
    pub satisfiable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One run attempt. `successful` is NULL while the attempt is running and is
/// always resolved to true/false before a solve session returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub id: i64,
    pub group_id: i64,
    pub successful: Option<bool>,
    pub error_kind: Option<ExecutionErrorKind>,
    pub result_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
pub struct GroupFilter {
    pub provider: Option<String>,
    pub diagnostic: Option<String>,
    pub satisfiable_only: bool,
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::Corrupt(format!("timestamp '{raw}'")))
}

impl Database {
    pub fn upsert_provider(&self, slug: &str, version: &str) -> Result<i64> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO provider (slug, version) VALUES (?1, ?2)
                 ON CONFLICT(slug) DO UPDATE SET version = excluded.version",
                params![slug, version],
            )?;
            let id = conn.query_row(
                "SELECT id FROM provider WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    pub fn upsert_diagnostic(&self, provider_id: i64, slug: &str, name: &str) -> Result<i64> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO diagnostic (provider_id, slug, name) VALUES (?1, ?2, ?3)
                 ON CONFLICT(provider_id, slug) DO UPDATE SET name = excluded.name",
                params![provider_id, slug, name],
            )?;
            let id = conn.query_row(
                "SELECT id FROM diagnostic WHERE provider_id = ?1 AND slug = ?2",
                params![provider_id, slug],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    /// Insert the group if its key is new; an existing group is left
    /// untouched apart from being re-marked satisfiable. Returns
    /// `(group_id, inserted)`.
    pub fn upsert_group(
        &self,
        diagnostic_id: i64,
        selection: &DatasetSelection,
    ) -> Result<(i64, bool)> {
        let key = selection.key();
        let digest = ExecutionKey::digest(&selection.key_facets);
        let selection_json = serde_json::to_string(selection)?;
        let now = Utc::now().to_rfc3339();

        self.write(|conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM execution_group WHERE diagnostic_id = ?1 AND key = ?2",
                    params![diagnostic_id, key.0],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                conn.execute(
                    "UPDATE execution_group SET satisfiable = 1, updated_at = ?2
                     WHERE id = ?1 AND satisfiable = 0",
                    params![id, now],
                )?;
                return Ok((id, false));
            }

            conn.execute(
                "INSERT INTO execution_group
                     (diagnostic_id, key, key_digest, selection, satisfiable, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                params![diagnostic_id, key.0, digest, selection_json, now],
            )?;
            Ok((conn.last_insert_rowid(), true))
        })
    }

    /// Flag a group whose key no longer matches the catalog. History is
    /// retained; selection just skips the group.
    pub fn mark_unsatisfiable(&self, group_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            conn.execute(
                "UPDATE execution_group SET satisfiable = 0, updated_at = ?2 WHERE id = ?1",
                params![group_id, now],
            )?;
            Ok(())
        })
    }

    pub fn group_keys_for_diagnostic(&self, diagnostic_id: i64) -> Result<Vec<(i64, ExecutionKey, bool)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, key, satisfiable FROM execution_group
             WHERE diagnostic_id = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![diagnostic_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                ExecutionKey(row.get::<_, String>(1)?),
                row.get::<_, bool>(2)?,
            ))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(DbError::from)
    }

    /// Append the RUNNING execution row for a dispatched group.
    pub fn begin_execution(&self, group_id: i64) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            conn.execute(
                "INSERT INTO execution (group_id, started_at) VALUES (?1, ?2)",
                params![group_id, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Terminal transition of an execution, atomic with the owning group's
    /// `updated_at` touch.
    pub fn finish_execution(
        &self,
        execution_id: i64,
        successful: bool,
        error_kind: Option<ExecutionErrorKind>,
        result_path: Option<&PathBuf>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.write(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE execution SET successful = ?2, error_kind = ?3, result_path = ?4, finished_at = ?5
                 WHERE id = ?1",
                params![
                    execution_id,
                    successful,
                    error_kind.map(|k| k.to_string()),
                    result_path.map(|p| p.to_string_lossy().into_owned()),
                    now,
                ],
            )?;
            if updated == 0 {
                return Err(DbError::NotFound {
                    what: format!("execution {execution_id}"),
                });
            }
            tx.execute(
                "UPDATE execution_group SET updated_at = ?2
                 WHERE id = (SELECT group_id FROM execution WHERE id = ?1)",
                params![execution_id, now],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// The authoritative latest attempt of a group, if any.
    pub fn latest_execution(&self, group_id: i64) -> Result<Option<ExecutionRecord>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, group_id, successful, error_kind, result_path, started_at, finished_at
             FROM execution WHERE group_id = ?1 ORDER BY id DESC LIMIT 1",
            params![group_id],
            row_to_execution,
        )
        .optional()?
        .transpose()
    }

    pub fn executions(&self, group_id: i64) -> Result<Vec<ExecutionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, group_id, successful, error_kind, result_path, started_at, finished_at
             FROM execution WHERE group_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![group_id], row_to_execution)?;
        let mut executions = Vec::new();
        for row in rows {
            executions.push(row??);
        }
        Ok(executions)
    }

    pub fn groups(&self, filter: &GroupFilter) -> Result<Vec<GroupRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT g.id, p.slug, d.slug, g.key, g.selection, g.satisfiable, g.created_at, g.updated_at
             FROM execution_group g
             JOIN diagnostic d ON d.id = g.diagnostic_id
             JOIN provider p ON p.id = d.provider_id
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
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            },
        )?;

        let mut groups = Vec::new();
        for row in rows {
            let (id, provider_slug, diagnostic_slug, key, selection, satisfiable, created, updated) =
                row?;
            groups.push(GroupRecord {
                id,
                provider_slug,
                diagnostic_slug,
                key: ExecutionKey(key),
                selection: serde_json::from_str(&selection)?,
                satisfiable,
                created_at: parse_ts(created)?,
                updated_at: parse_ts(updated)?,
            });
        }
        Ok(groups)
    }

    pub fn group(&self, group_id: i64) -> Result<GroupRecord> {
        let mut groups = self.groups(&GroupFilter::default())?;
        groups.retain(|g| g.id == group_id);
        groups.pop().ok_or_else(|| DbError::NotFound {
            what: format!("execution group {group_id}"),
        })
    }
}

#[allow(clippy::type_complexity)]
fn row_to_execution(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<Result<ExecutionRecord>, rusqlite::Error> {
    let error_kind: Option<String> = row.get(3)?;
    let result_path: Option<String> = row.get(4)?;
    let started_at: String = row.get(5)?;
    let finished_at: Option<String> = row.get(6)?;

    let record = (|| {
        Ok(ExecutionRecord {
            id: row.get(0)?,
            group_id: row.get(1)?,
            successful: row.get(2)?,
            error_kind: match error_kind {
                Some(raw) => Some(ExecutionErrorKind::from_str(&raw).map_err(DbError::Corrupt)?),
                None => None,
            },
            result_path: result_path.map(PathBuf::from),
            started_at: parse_ts(started_at)?,
            finished_at: finished_at.map(parse_ts).transpose()?,
        })
    })();
    Ok(record)
}
