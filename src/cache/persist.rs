//! SQLite persistence for cached analyses

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::CacheError;
use crate::resolve::{MapAnalysisResult, PairKey};

/// Write-through backing file for the analysis cache.
///
/// Rows are keyed by the JSON form of the pair key and hold the whole
/// result as JSON. Staleness is not tracked here; the in-memory layer
/// re-checks fingerprints on every lookup, so a stale row on disk can
/// never be served as fresh.
pub(crate) struct PersistentCache {
    conn: Mutex<Connection>,
}

impl PersistentCache {
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS analyses (
                pair TEXT PRIMARY KEY,
                result TEXT NOT NULL
            );
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn load_all(&self) -> Result<Vec<MapAnalysisResult>, CacheError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT result FROM analyses")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(serde_json::from_str(&row?)?);
        }
        Ok(results)
    }

    pub(crate) fn put(&self, result: &MapAnalysisResult) -> Result<(), CacheError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO analyses (pair, result) VALUES (?1, ?2)
            ON CONFLICT(pair) DO UPDATE SET result = excluded.result
            "#,
            params![
                serde_json::to_string(&result.pair)?,
                serde_json::to_string(result)?
            ],
        )?;
        Ok(())
    }

    pub(crate) fn delete(&self, pair: &PairKey) -> Result<bool, CacheError> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM analyses WHERE pair = ?1",
            params![serde_json::to_string(pair)?],
        )?;
        Ok(rows > 0)
    }

    pub(crate) fn clear(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM analyses", [])?;
        Ok(())
    }
}
