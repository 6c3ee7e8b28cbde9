use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytemuck::{cast_slice, pod_collect_to_vec};
use crit_core::{CritError, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// SQLite cache of chunk embeddings keyed by `(model, chunk_id)`.
#[derive(Clone)]
pub struct EmbeddingStore {
    path: PathBuf,
}

impl EmbeddingStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        store.init()?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(storage)
    }

    pub fn init(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = self.connection()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS embeddings (
                model TEXT NOT NULL,
                chunk_id TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (model, chunk_id)
            );
            "#,
        )
        .map_err(storage)?;
        Ok(())
    }

    /// Cached vectors for whichever of `ids` are present.
    pub fn get_many(&self, model: &str, ids: &[&str]) -> Result<HashMap<String, Vec<f32>>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT vector FROM embeddings WHERE model = ?1 AND chunk_id = ?2")
            .map_err(storage)?;
        let mut found = HashMap::new();
        for id in ids {
            let blob: Option<Vec<u8>> = stmt
                .query_row(params![model, id], |row| row.get(0))
                .optional()
                .map_err(storage)?;
            if let Some(blob) = blob {
                if blob.len() % std::mem::size_of::<f32>() != 0 {
                    return Err(CritError::Storage(format!(
                        "corrupt embedding for chunk {id}: {} bytes",
                        blob.len()
                    )));
                }
                found.insert((*id).to_string(), pod_collect_to_vec::<u8, f32>(&blob));
            }
        }
        Ok(found)
    }

    pub fn put_many(&self, model: &str, entries: &[(String, Vec<f32>)]) -> Result<usize> {
        let mut conn = self.connection()?;
        let tx = conn.transaction().map_err(storage)?;
        for (chunk_id, vector) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO embeddings (model, chunk_id, dimensions, vector) VALUES (?1, ?2, ?3, ?4)",
                params![
                    model,
                    chunk_id,
                    vector.len() as i64,
                    cast_slice::<f32, u8>(vector)
                ],
            )
            .map_err(storage)?;
        }
        tx.commit().map_err(storage)?;
        Ok(entries.len())
    }

    pub fn count(&self, model: &str) -> Result<usize> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM embeddings WHERE model = ?1",
                params![model],
                |row| row.get(0),
            )
            .map_err(storage)?;
        Ok(count as usize)
    }
}

fn storage(err: rusqlite::Error) -> CritError {
    CritError::Storage(err.to_string())
}
