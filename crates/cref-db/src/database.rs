use crate::error::{DbError, Result};
use rand::RngExt;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const WRITE_ATTEMPTS: u32 = 5;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS provider (
    id         INTEGER PRIMARY KEY,
    slug       TEXT NOT NULL UNIQUE,
    version    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS diagnostic (
    id          INTEGER PRIMARY KEY,
    provider_id INTEGER NOT NULL REFERENCES provider(id),
    slug        TEXT NOT NULL,
    name        TEXT NOT NULL,
    UNIQUE(provider_id, slug)
);

CREATE TABLE IF NOT EXISTS dataset (
    id          INTEGER PRIMARY KEY,
    source_type TEXT NOT NULL,
    identity    TEXT NOT NULL,
    path        TEXT NOT NULL,
    facets      TEXT NOT NULL,
    ingested_at TEXT NOT NULL,
    UNIQUE(source_type, identity)
);

CREATE TABLE IF NOT EXISTS execution_group (
    id            INTEGER PRIMARY KEY,
    diagnostic_id INTEGER NOT NULL REFERENCES diagnostic(id),
    key           TEXT NOT NULL,
    key_digest    TEXT NOT NULL,
    selection     TEXT NOT NULL,
    satisfiable   INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE(diagnostic_id, key)
);

CREATE TABLE IF NOT EXISTS execution (
    id          INTEGER PRIMARY KEY,
    group_id    INTEGER NOT NULL REFERENCES execution_group(id),
    successful  INTEGER,
    error_kind  TEXT,
    result_path TEXT,
    started_at  TEXT NOT NULL,
    finished_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_execution_group_id ON execution(group_id);
";

/// Handle to the catalog/result database. Cheap to clone; every operation
/// opens its own connection, so readers run concurrently with a solve
/// session and writers to different groups only contend at SQLite's
/// single-writer granularity.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let db = Self {
            path: path.to_path_buf(),
        };
        let conn = db.connect()?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Opened database at '{}'", path.display());
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Run a write closure, retrying with jittered backoff when SQLite
    /// reports the database busy past its own busy timeout.
    pub(crate) fn write<T>(
        &self,
        mut f: impl FnMut(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut conn = self.connect()?;
            match f(&mut conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < WRITE_ATTEMPTS => {
                    let jitter = rand::rng().random_range(0..20);
                    let backoff = Duration::from_millis(10 * u64::from(attempt) + jitter);
                    tracing::debug!(
                        "Database busy (attempt {}/{}), retrying in {:?}",
                        attempt,
                        WRITE_ATTEMPTS,
                        backoff
                    );
                    std::thread::sleep(backoff);
                }
                Err(e) if is_busy(&e) => {
                    return Err(DbError::Contended {
                        attempts: WRITE_ATTEMPTS,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_busy(error: &DbError) -> bool {
    match error {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_dirs_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cref.db");
        let db = Database::open(&path).unwrap();

        let conn = db.connect().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for expected in ["dataset", "diagnostic", "execution", "execution_group", "provider"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cref.db");
        Database::open(&path).unwrap();
        Database::open(&path).unwrap();
    }
}
