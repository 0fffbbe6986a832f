use super::schema::DDL;
use super::store::{ResultBackend, StoreDocument};
use crate::errors::{StoreError, StoreResult};
use crate::model::CaseStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// One row per case, upserted inside a transaction.
pub struct SqliteBackend {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute_batch(DDL)?;
        Ok(Self { conn, path })
    }

    fn meta(&self, key: &str) -> StoreResult<Option<String>> {
        let v: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(v.flatten())
    }

    fn corrupt(&self, message: String) -> StoreError {
        StoreError::Corrupt {
            path: self.location(),
            message,
        }
    }
}

impl ResultBackend for SqliteBackend {
    fn load(&self) -> StoreResult<StoreDocument> {
        let mut stmt = self
            .conn
            .prepare("SELECT case_id, status_json FROM case_status ORDER BY case_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut cases = BTreeMap::new();
        for r in rows {
            let (id, json) = r?;
            let status: CaseStatus = serde_json::from_str(&json)
                .map_err(|e| self.corrupt(format!("case {}: {}", id, e)))?;
            cases.insert(id, status);
        }

        let last_updated = match self.meta("last_updated")? {
            Some(ts) => Some(
                DateTime::parse_from_rfc3339(&ts)
                    .map_err(|e| self.corrupt(format!("last_updated: {}", e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let tuned_pool_size = match self.meta("tuned_pool_size")? {
            Some(n) => Some(
                n.parse::<usize>()
                    .map_err(|e| self.corrupt(format!("tuned_pool_size: {}", e)))?,
            ),
            None => None,
        };

        Ok(StoreDocument {
            last_updated,
            model: self.meta("model")?,
            tuned_pool_size,
            cases,
        })
    }

    fn persist(&mut self, doc: &StoreDocument, changed: &BTreeSet<String>) -> StoreResult<()> {
        let updated_at = doc
            .last_updated
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO case_status (case_id, bucket, passed, consistency_score, status_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(case_id) DO UPDATE SET
                   bucket = excluded.bucket,
                   passed = excluded.passed,
                   consistency_score = excluded.consistency_score,
                   status_json = excluded.status_json,
                   updated_at = excluded.updated_at",
            )?;
            let mut delete = tx.prepare("DELETE FROM case_status WHERE case_id = ?1")?;

            for id in changed {
                match doc.cases.get(id) {
                    Some(status) => {
                        let json = serde_json::to_string(status).map_err(|e| {
                            StoreError::Corrupt {
                                path: id.clone(),
                                message: e.to_string(),
                            }
                        })?;
                        upsert.execute(params![
                            id,
                            status.bucket.as_str(),
                            status.verdict.as_ref().map(|v| v.passed),
                            status.consistency.as_ref().map(|c| c.score),
                            json,
                            updated_at,
                        ])?;
                    }
                    None => {
                        delete.execute(params![id])?;
                    }
                }
            }

            let mut meta = tx.prepare(
                "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            meta.execute(params![
                "last_updated",
                doc.last_updated.map(|t| t.to_rfc3339())
            ])?;
            meta.execute(params!["model", doc.model])?;
            meta.execute(params![
                "tuned_pool_size",
                doc.tuned_pool_size.map(|n| n.to_string())
            ])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{code_set, Bucket, EvaluationVerdict};

    fn passing() -> CaseStatus {
        CaseStatus::derive(
            EvaluationVerdict {
                passed: true,
                score: 1.0,
                missing: code_set(Vec::<&str>::new()),
                unexpected: code_set(["D1110"]),
                failure: None,
                latency_ms: 40,
            },
            None,
            0.75,
        )
    }

    #[test]
    fn upsert_and_delete_follow_changed_ids() {
        let mut backend = SqliteBackend::memory().unwrap();
        let mut doc = StoreDocument {
            last_updated: Some(Utc::now()),
            model: Some("llama3:8b".into()),
            tuned_pool_size: None,
            cases: BTreeMap::new(),
        };
        doc.cases.insert("a".into(), passing());
        doc.cases.insert("b".into(), CaseStatus::untested());
        backend
            .persist(&doc, &BTreeSet::from(["a".to_string(), "b".to_string()]))
            .unwrap();

        let loaded = backend.load().unwrap();
        assert_eq!(loaded.cases.len(), 2);
        assert_eq!(loaded.cases["a"].bucket, Bucket::PassingBoth);
        assert_eq!(loaded.model.as_deref(), Some("llama3:8b"));
        assert!(loaded.last_updated.is_some());

        doc.cases.remove("b");
        backend
            .persist(&doc, &BTreeSet::from(["b".to_string()]))
            .unwrap();
        let loaded = backend.load().unwrap();
        assert_eq!(loaded.cases.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        {
            let mut backend = SqliteBackend::open(&path).unwrap();
            let mut doc = StoreDocument {
                tuned_pool_size: Some(8),
                ..Default::default()
            };
            doc.cases.insert("a".into(), passing());
            backend
                .persist(&doc, &BTreeSet::from(["a".to_string()]))
                .unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        let loaded = backend.load().unwrap();
        assert_eq!(loaded.cases["a"], passing());
        assert_eq!(loaded.tuned_pool_size, Some(8));
        assert!(backend.location().ends_with("results.db"));
    }
}
