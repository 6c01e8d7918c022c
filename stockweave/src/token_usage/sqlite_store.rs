//! SQLite-backed token usage store. Persistent across process restarts.
//!
//! One row per model invocation; columns mirror [`super::TokenUsageRecord`].
//! Uses spawn_blocking so the async worker never blocks the runtime.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::store::StoreError;

use super::{TokenType, TokenUsageRecord, TokenUsageStore};

/// SQLite-backed [`TokenUsageStore`].
pub struct SqliteTokenUsageStore {
    db_path: std::path::PathBuf,
}

impl SqliteTokenUsageStore {
    /// Opens the database and ensures the table exists.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS token_usage (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                project_type TEXT NOT NULL,
                token_type TEXT NOT NULL,
                model_name TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER,
                total_tokens INTEGER NOT NULL,
                cost REAL NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(Self { db_path })
    }

    /// Sums total tokens for one user (admin/report surface).
    pub async fn total_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(total_tokens), 0) FROM token_usage WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )?;
            Ok::<u64, StoreError>(total as u64)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }

    /// Loads all records for one user, newest first.
    pub async fn records_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<TokenUsageRecord>, StoreError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, project_type, token_type, model_name, prompt_tokens, \
                 completion_tokens, total_tokens, cost, created_at \
                 FROM token_usage WHERE user_id = ?1 ORDER BY created_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, f64>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })?;
            let mut records = Vec::new();
            for row in rows {
                let (id, user, project, token_type, model, prompt, completion, total, cost, created) =
                    row?;
                records.push(TokenUsageRecord {
                    id: id.parse().unwrap_or_else(|_| Uuid::nil()),
                    user_id: user.parse().unwrap_or_else(|_| Uuid::nil()),
                    project_type: project,
                    token_type: if token_type == "embedding" {
                        TokenType::Embedding
                    } else {
                        TokenType::Llm
                    },
                    model_name: model,
                    prompt_tokens: prompt as u32,
                    completion_tokens: completion.map(|c| c as u32),
                    total_tokens: total as u32,
                    cost,
                    created_at: created
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                });
            }
            Ok::<Vec<TokenUsageRecord>, StoreError>(records)
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }
}

#[async_trait]
impl TokenUsageStore for SqliteTokenUsageStore {
    async fn insert(&self, record: &TokenUsageRecord) -> Result<(), StoreError> {
        let db_path = self.db_path.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)?;
            conn.execute(
                "INSERT INTO token_usage \
                 (id, user_id, project_type, token_type, model_name, prompt_tokens, \
                  completion_tokens, total_tokens, cost, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id.to_string(),
                    record.user_id.to_string(),
                    record.project_type,
                    record.token_type.as_str(),
                    record.model_name,
                    record.prompt_tokens,
                    record.completion_tokens,
                    record.total_tokens,
                    record.cost,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_usage::TokenUsageTracker;

    /// **Scenario**: inserted records round-trip and sum per user.
    #[tokio::test]
    async fn insert_and_query_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTokenUsageStore::new(dir.path().join("usage.db")).unwrap();
        let user = Uuid::new_v4();

        let mut tracker = TokenUsageTracker::new(user, "stockeasy", TokenType::Llm, "gpt-4o");
        tracker.add_tokens(100, 30, None, 0.002);
        store.insert(&tracker.into_record()).await.unwrap();

        let mut tracker =
            TokenUsageTracker::new(user, "stockeasy", TokenType::Embedding, "bge-m3");
        tracker.add_tokens(256, 0, Some(256), 0.0);
        store.insert(&tracker.into_record()).await.unwrap();

        assert_eq!(store.total_tokens_for_user(user).await.unwrap(), 130 + 256);
        let records = store.records_for_user(user).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .any(|r| r.token_type == TokenType::Embedding && r.completion_tokens.is_none()));
    }
}
