//! SQLite-backed vector store with ANN search via sqlite-vec.
//!
//! Dual-table design: `vec_meta` for document text + metadata, a `vec0`
//! virtual table for embeddings, joined by rowid. KNN over-fetches so
//! metadata filtering happens before the top-k cut. Score = 1 / (1 + distance).

use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use rusqlite::params;

use crate::store::StoreError;

use super::{DocumentWithScore, MetadataFilter, VectorRecord, VectorStore};

static SQLITE_VEC_INIT: Once = Once::new();

/// Formats a Vec<f32> as JSON for sqlite-vec (e.g. "[0.1,0.2,0.3]").
fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Persistent [`VectorStore`] over sqlite-vec.
pub struct SqliteVecStore {
    db_path: std::path::PathBuf,
    dimension: usize,
}

impl SqliteVecStore {
    /// Opens the database, registers the sqlite-vec extension once per
    /// process and creates the tables if needed.
    pub fn new(path: impl AsRef<Path>, dimension: usize) -> Result<Self, StoreError> {
        SQLITE_VEC_INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        });

        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS vec_meta (
                id INTEGER PRIMARY KEY,
                ns TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                UNIQUE(ns, doc_id)
            )
            "#,
            [],
        )?;
        let create_vec_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_embeddings USING vec0(embedding float[{}])",
            dimension
        );
        conn.execute(&create_vec_sql, [])?;

        Ok(Self { db_path, dimension })
    }
}

#[async_trait]
impl VectorStore for SqliteVecStore {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let dimension = self.dimension;
        let namespace = namespace.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = rusqlite::Connection::open(&db_path)?;
            let tx = conn.transaction()?;
            for record in &records {
                if record.vector.len() != dimension {
                    return Err(StoreError::Storage(format!(
                        "vector dimension {} != store dimension {}",
                        record.vector.len(),
                        dimension
                    )));
                }
                // Replace any previous row for (ns, doc_id), embedding included.
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM vec_meta WHERE ns = ?1 AND doc_id = ?2",
                        params![namespace, record.id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                if let Some(rowid) = existing {
                    tx.execute("DELETE FROM vec_meta WHERE id = ?1", params![rowid])?;
                    tx.execute(
                        "DELETE FROM vec_embeddings WHERE rowid = ?1",
                        params![rowid],
                    )?;
                }
                tx.execute(
                    "INSERT INTO vec_meta (ns, doc_id, content, metadata) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        namespace,
                        record.id,
                        record.content,
                        serde_json::to_string(&record.metadata)?,
                    ],
                )?;
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO vec_embeddings (rowid, embedding) VALUES (?1, ?2)",
                    params![rowid, vector_to_json(&record.vector)],
                )?;
            }
            tx.commit()?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    async fn search(
        &self,
        namespace: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DocumentWithScore>, StoreError> {
        if query.len() != self.dimension {
            return Err(StoreError::Storage(format!(
                "query dimension {} != store dimension {}",
                query.len(),
                self.dimension
            )));
        }
        let db_path = self.db_path.clone();
        let namespace = namespace.to_string();
        let vec_json = vector_to_json(query);
        let filter = filter.cloned();
        // Over-fetch so namespace/metadata filtering happens before the cut.
        let knn_limit = (top_k.max(50) * 3) as i64;

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT rowid, distance FROM vec_embeddings WHERE embedding MATCH ?1 AND k = ?2",
            )?;
            let rows = stmt.query_map(params![vec_json, knn_limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
            })?;
            let rowids_with_dist: Vec<(i64, f64)> = rows.collect::<Result<Vec<_>, _>>()?;
            if rowids_with_dist.is_empty() {
                return Ok(Vec::new());
            }

            let ids: Vec<i64> = rowids_with_dist.iter().map(|(id, _)| *id).collect();
            let dist_map: std::collections::HashMap<i64, f64> =
                rowids_with_dist.into_iter().collect();

            let placeholders: String = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let meta_sql = format!(
                "SELECT id, ns, doc_id, content, metadata FROM vec_meta WHERE id IN ({})",
                placeholders
            );
            let mut stmt = conn.prepare(&meta_sql)?;
            let metas = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut hits: Vec<DocumentWithScore> = Vec::new();
            for meta in metas {
                let (id, ns, doc_id, content, metadata_str) = meta?;
                if ns != namespace {
                    continue;
                }
                let Some(dist) = dist_map.get(&id).copied() else {
                    continue;
                };
                let metadata: serde_json::Value = serde_json::from_str(&metadata_str)?;
                if let Some(ref f) = filter {
                    if !f.matches(&metadata) {
                        continue;
                    }
                }
                hits.push(DocumentWithScore {
                    id: doc_id,
                    content,
                    score: (1.0 / (1.0 + dist)) as f32,
                    metadata,
                });
            }
            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            hits.truncate(top_k);
            Ok::<Vec<DocumentWithScore>, StoreError>(hits)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, vector: Vec<f32>, metadata: serde_json::Value) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            content: format!("본문 {}", id),
            vector,
            metadata,
        }
    }

    /// **Scenario**: KNN returns the nearest record first; filter and
    /// namespace isolation both hold.
    #[tokio::test]
    async fn knn_search_with_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVecStore::new(dir.path().join("vec.db"), 2).unwrap();
        store
            .upsert(
                "telegram",
                vec![
                    record("m1", vec![1.0, 0.0], json!({"channel_id": 7})),
                    record("m2", vec![0.0, 1.0], json!({"channel_id": 8})),
                ],
            )
            .await
            .unwrap();
        store
            .upsert("reports", vec![record("r1", vec![1.0, 0.0], json!({}))])
            .await
            .unwrap();

        let hits = store.search("telegram", &[1.0, 0.1], 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "m1");

        let filter = MetadataFilter::new().eq("channel_id", 8);
        let hits = store
            .search("telegram", &[1.0, 0.1], 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m2");
    }

    /// **Scenario**: dimension mismatch is a storage error, not a panic.
    #[tokio::test]
    async fn dimension_mismatch_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVecStore::new(dir.path().join("vec.db"), 3).unwrap();
        assert!(store.search("ns", &[1.0], 5, None).await.is_err());
        assert!(store
            .upsert("ns", vec![record("x", vec![1.0], json!({}))])
            .await
            .is_err());
    }

    /// **Scenario**: upserting the same doc_id replaces the previous row.
    #[tokio::test]
    async fn upsert_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteVecStore::new(dir.path().join("vec.db"), 2).unwrap();
        store
            .upsert("ns", vec![record("a", vec![1.0, 0.0], json!({"v": 1}))])
            .await
            .unwrap();
        store
            .upsert("ns", vec![record("a", vec![0.0, 1.0], json!({"v": 2}))])
            .await
            .unwrap();
        let hits = store.search("ns", &[0.0, 1.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata["v"], 2);
    }
}
