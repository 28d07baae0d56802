use crate::database::Database;
use crate::error::{DbError, IngestError, Result};
use chrono::Utc;
use cref_core::constants::facets as facet_names;
use cref_core::model::{Dataset, Facets, SourceType};
use rayon::prelude::*;
use rusqlite::params;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

#[derive(Debug, Default, Clone)]
pub struct DatasetFilter {
    pub source_type: Option<SourceType>,
}

/// Ingest every `*.json` metadata sidecar under `path` as datasets of
/// `source_type`. Each sidecar is a flat facet map describing the data file
/// it sits next to (the sidecar path minus its `.json` suffix).
///
/// The batch is atomic: any invalid sidecar fails the whole call before a
/// single row is written. Re-ingesting a dataset with the same facet
/// identity replaces the stored row instead of duplicating it.
pub fn ingest(db: &Database, source_type: SourceType, path: &Path) -> Result<Vec<Dataset>, IngestError> {
    let mut sidecars: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    sidecars.sort();

    if sidecars.is_empty() {
        return Err(IngestError::EmptyBatch(path.to_path_buf()));
    }

    let mut parsed: Vec<Result<(PathBuf, Facets), IngestError>> = sidecars
        .par_iter()
        .map(|sidecar| parse_sidecar(source_type, sidecar))
        .collect();

    // Sidecars are sorted, so the first error is deterministic.
    let mut batch = Vec::with_capacity(parsed.len());
    for entry in parsed.drain(..) {
        batch.push(entry?);
    }

    let ingested_at = Utc::now().to_rfc3339();
    let datasets = db.write(|conn| {
        let tx = conn.transaction()?;
        let mut datasets = Vec::with_capacity(batch.len());
        for (data_path, facets) in &batch {
            let mut dataset = Dataset {
                id: 0,
                source_type,
                path: data_path.clone(),
                facets: facets.clone(),
            };
            let facets_json = serde_json::to_string(facets)?;
            tx.execute(
                "INSERT INTO dataset (source_type, identity, path, facets, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(source_type, identity) DO UPDATE SET
                     path = excluded.path,
                     facets = excluded.facets,
                     ingested_at = excluded.ingested_at",
                params![
                    source_type.to_string(),
                    dataset.identity(),
                    data_path.to_string_lossy(),
                    facets_json,
                    ingested_at,
                ],
            )?;
            dataset.id = tx.query_row(
                "SELECT id FROM dataset WHERE source_type = ?1 AND identity = ?2",
                params![source_type.to_string(), dataset.identity()],
                |row| row.get(0),
            )?;
            datasets.push(dataset);
        }
        tx.commit()?;
        Ok(datasets)
    })?;

    tracing::info!(
        "Ingested {} {} dataset(s) from '{}'",
        datasets.len(),
        source_type,
        path.display()
    );
    Ok(datasets)
}

fn parse_sidecar(
    source_type: SourceType,
    sidecar: &Path,
) -> Result<(PathBuf, Facets), IngestError> {
    let content = fs_err::read_to_string(sidecar).map_err(|source| IngestError::Io {
        path: sidecar.to_path_buf(),
        source,
    })?;
    let facets: Facets =
        serde_json::from_str(&content).map_err(|e| IngestError::Validation {
            path: sidecar.to_path_buf(),
            reason: format!("not a flat facet map: {e}"),
        })?;

    for required in facet_names::required(source_type) {
        match facets.get(*required) {
            Some(value) if !value.trim().is_empty() => {}
            Some(_) => {
                return Err(IngestError::Validation {
                    path: sidecar.to_path_buf(),
                    reason: format!("required facet '{required}' is empty"),
                })
            }
            None => {
                return Err(IngestError::Validation {
                    path: sidecar.to_path_buf(),
                    reason: format!(
                        "missing required facet '{required}' for source type '{source_type}'"
                    ),
                })
            }
        }
    }

    let data_path = sidecar.with_extension("");
    Ok((data_path, facets))
}

impl Database {
    /// Snapshot of catalog rows, ordered by (source_type, identity) so the
    /// matcher always sees the same traversal order.
    pub fn datasets(&self, filter: &DatasetFilter) -> Result<Vec<Dataset>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, source_type, path, facets FROM dataset
             WHERE (?1 IS NULL OR source_type = ?1)
             ORDER BY source_type, identity",
        )?;
        let rows = stmt.query_map(
            params![filter.source_type.map(|s| s.to_string())],
            |row| {
                let source_type: String = row.get(1)?;
                let path: String = row.get(2)?;
                let facets: String = row.get(3)?;
                Ok((row.get::<_, i64>(0)?, source_type, path, facets))
            },
        )?;

        let mut datasets = Vec::new();
        for row in rows {
            let (id, source_type, path, facets) = row?;
            let source_type = SourceType::from_str(&source_type)
                .map_err(|e| DbError::Corrupt(e.to_string()))?;
            datasets.push(Dataset {
                id,
                source_type,
                path: PathBuf::from(path),
                facets: serde_json::from_str(&facets)?,
            });
        }
        Ok(datasets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_sidecar(dir: &Path, name: &str, facets: &[(&str, &str)]) {
        let map: Facets = facets
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        fs::write(
            dir.join(name),
            serde_json::to_string_pretty(&map).unwrap(),
        )
        .unwrap();
    }

    fn pmp_facets<'a>(source_id: &'a str) -> Vec<(&'a str, &'a str)> {
        vec![
            ("source_id", source_id),
            ("variable_id", "ts"),
            ("period", "1981-2010"),
        ]
    }

    fn open_db(dir: &Path) -> Database {
        Database::open(&dir.join("cref.db")).unwrap()
    }

    #[test]
    fn test_ingest_and_query_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("bundle");
        fs::create_dir_all(&data).unwrap();
        write_sidecar(&data, "era5.nc.json", &pmp_facets("ERA-5"));
        write_sidecar(&data, "merra.nc.json", &pmp_facets("MERRA-2"));

        let db = open_db(dir.path());
        let ingested = ingest(&db, SourceType::PmpClimatology, &data).unwrap();
        assert_eq!(ingested.len(), 2);
        assert!(ingested.iter().all(|d| d.id > 0));
        assert!(ingested[0].path.ends_with("era5.nc"));

        let stored = db.datasets(&DatasetFilter::default()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored, ingested);
    }

    #[test]
    fn test_reingest_upserts_by_identity_not_path() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("v1");
        let second = dir.path().join("v2");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        write_sidecar(&first, "era5.nc.json", &pmp_facets("ERA-5"));
        write_sidecar(&second, "era5-regridded.nc.json", &pmp_facets("ERA-5"));

        let db = open_db(dir.path());
        ingest(&db, SourceType::PmpClimatology, &first).unwrap();
        ingest(&db, SourceType::PmpClimatology, &second).unwrap();

        let stored = db.datasets(&DatasetFilter::default()).unwrap();
        assert_eq!(stored.len(), 1, "same identity must not duplicate");
        assert!(stored[0].path.ends_with("era5-regridded.nc"));
    }

    #[test]
    fn test_invalid_sidecar_fails_batch_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("bundle");
        fs::create_dir_all(&data).unwrap();
        write_sidecar(&data, "good.nc.json", &pmp_facets("ERA-5"));
        // Missing the required 'period' facet.
        write_sidecar(
            &data,
            "bad.nc.json",
            &[("source_id", "MERRA-2"), ("variable_id", "ts")],
        );

        let db = open_db(dir.path());
        let result = ingest(&db, SourceType::PmpClimatology, &data);
        assert!(matches!(result, Err(IngestError::Validation { .. })));

        let stored = db.datasets(&DatasetFilter::default()).unwrap();
        assert!(stored.is_empty(), "nothing from the failed batch persists");
    }

    #[test]
    fn test_empty_facet_value_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("bundle");
        fs::create_dir_all(&data).unwrap();
        write_sidecar(
            &data,
            "bad.nc.json",
            &[("source_id", "  "), ("variable_id", "ts"), ("period", "x")],
        );

        let db = open_db(dir.path());
        let result = ingest(&db, SourceType::PmpClimatology, &data);
        assert!(matches!(result, Err(IngestError::Validation { .. })));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("empty");
        fs::create_dir_all(&data).unwrap();

        let db = open_db(dir.path());
        let result = ingest(&db, SourceType::Cmip6, &data);
        assert!(matches!(result, Err(IngestError::EmptyBatch(_))));
    }

    #[test]
    fn test_source_type_filter() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("bundle");
        fs::create_dir_all(&data).unwrap();
        write_sidecar(&data, "era5.nc.json", &pmp_facets("ERA-5"));

        let db = open_db(dir.path());
        ingest(&db, SourceType::PmpClimatology, &data).unwrap();

        let filtered = db
            .datasets(&DatasetFilter {
                source_type: Some(SourceType::Cmip6),
            })
            .unwrap();
        assert!(filtered.is_empty());
    }
}
