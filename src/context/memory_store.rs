//! Embedded SQLite persistence for the user/system scopes of [`super::store::ContextStore`]
//!
//! Schema: a `memories` table (id, memory_type, content, metadata, timestamp,
//! expiry, access_count, last_accessed) plus an FTS5 `memory_search` virtual
//! table kept in sync on every write. Writes go through a single in-process
//! lock on top of a one-connection pool, so two concurrent callers never
//! interleave the `memories`/`memory_search` insert pair for the same entry.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use crate::workflow::value::Value;

use super::store::{ContextEntry, ContextScope, ContextType};

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for MemoryStoreError {
    fn from(err: sqlx::Error) -> Self {
        MemoryStoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for MemoryStoreError {
    fn from(err: serde_json::Error) -> Self {
        MemoryStoreError::Serialization(err.to_string())
    }
}

/// Everything about an entry that isn't one of the schema's own columns:
/// which scope it belongs to, its tags, and its relevance score.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedMetadata {
    scope: ContextScope,
    tags: std::collections::BTreeSet<String>,
    relevance_score: f64,
}

pub struct MemoryStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl MemoryStore {
    /// Open (creating if absent) the SQLite file at `path` and ensure the
    /// schema exists.
    pub async fn connect(path: &str) -> Result<Self, MemoryStoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        let store = Self {
            pool,
            write_lock: Mutex::new(()),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<(), MemoryStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                memory_type TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                timestamp REAL NOT NULL,
                expiry REAL,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memory_type ON memories(memory_type)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_timestamp ON memories(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_expiry ON memories(expiry) WHERE expiry IS NOT NULL")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE VIRTUAL TABLE IF NOT EXISTS memory_search USING fts5(id UNINDEXED, content)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace an entry and its search-index row.
    pub async fn insert(&self, entry: &ContextEntry) -> Result<(), MemoryStoreError> {
        let content = serde_json::to_string(&entry.data)?;
        let metadata = serde_json::to_string(&PersistedMetadata {
            scope: entry.scope,
            tags: entry.tags.clone(),
            relevance_score: entry.relevance_score,
        })?;
        let search_content = format!("{content} {}", entry.tags.iter().cloned().collect::<Vec<_>>().join(" "));

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO memories (id, memory_type, content, metadata, timestamp, expiry, access_count, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?, 0, NULL)
            ON CONFLICT(id) DO UPDATE SET
                memory_type = excluded.memory_type,
                content = excluded.content,
                metadata = excluded.metadata,
                timestamp = excluded.timestamp,
                expiry = excluded.expiry
            "#,
        )
        .bind(&entry.id)
        .bind(memory_type_str(entry.context_type))
        .bind(&content)
        .bind(&metadata)
        .bind(to_unix_seconds(entry.created_at))
        .bind(entry.expiry.map(to_unix_seconds))
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR REPLACE INTO memory_search (id, content) VALUES (?, ?)")
            .bind(&entry.id)
            .bind(&search_content)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Fetch one entry by id, bumping its access count and `last_accessed`.
    pub async fn get(&self, id: &str) -> Result<Option<ContextEntry>, MemoryStoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(row) = sqlx::query("SELECT * FROM memories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        sqlx::query("UPDATE memories SET access_count = access_count + 1, last_accessed = ? WHERE id = ?")
            .bind(Utc::now().timestamp() as f64)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(Some(row_to_entry(&row)?))
    }

    pub async fn remove(&self, id: &str) -> Result<bool, MemoryStoreError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM memories WHERE id = ?").bind(id).execute(&self.pool).await?;
        sqlx::query("DELETE FROM memory_search WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Full-text search over `content` via the FTS5 index.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ContextEntry>, MemoryStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT m.* FROM memories m
            JOIN memory_search s ON m.id = s.id
            WHERE s.content MATCH ?
            ORDER BY m.timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Load every non-expired entry belonging to `scope`, used to hydrate
    /// [`super::store::ContextStore`]'s in-memory shard at startup.
    pub async fn load_scope(&self, scope: ContextScope) -> Result<Vec<ContextEntry>, MemoryStoreError> {
        let rows = sqlx::query("SELECT * FROM memories WHERE (expiry IS NULL OR expiry > ?) ORDER BY timestamp")
            .bind(Utc::now().timestamp() as f64)
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::new();
        for row in &rows {
            let entry = row_to_entry(row)?;
            if entry.scope == scope {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Delete rows (and their search entries) past their `expiry`. Returns
    /// the number of rows removed.
    pub async fn cleanup_expired(&self) -> Result<u64, MemoryStoreError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().timestamp() as f64;
        let result = sqlx::query("DELETE FROM memories WHERE expiry IS NOT NULL AND expiry <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM memory_search WHERE id NOT IN (SELECT id FROM memories)")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn to_unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

fn from_unix_seconds(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt((secs * 1000.0) as i64).single().unwrap_or_else(Utc::now)
}

fn memory_type_str(context_type: ContextType) -> String {
    serde_json::to_value(context_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ContextEntry, MemoryStoreError> {
    let id: String = row.try_get("id")?;
    let memory_type: String = row.try_get("memory_type")?;
    let content: String = row.try_get("content")?;
    let metadata: String = row.try_get("metadata")?;
    let timestamp: f64 = row.try_get("timestamp")?;
    let expiry: Option<f64> = row.try_get("expiry")?;

    let context_type: ContextType = serde_json::from_value(serde_json::Value::String(memory_type))?;
    let data: Value = serde_json::from_str(&content)?;
    let meta: PersistedMetadata = serde_json::from_str(&metadata)?;

    Ok(ContextEntry {
        id,
        context_type,
        scope: meta.scope,
        data,
        created_at: from_unix_seconds(timestamp),
        expiry: expiry.map(from_unix_seconds),
        tags: meta.tags,
        relevance_score: meta.relevance_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn temp_db_path() -> String {
        std::env::temp_dir()
            .join(format!("toolmesh-memory-test-{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string()
    }

    fn sample_entry(id: &str, scope: ContextScope, data: Value) -> ContextEntry {
        ContextEntry {
            id: id.to_string(),
            context_type: ContextType::UserPreferences,
            scope,
            data,
            created_at: Utc::now(),
            expiry: None,
            tags: BTreeSet::new(),
            relevance_score: 1.0,
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_entry() {
        let path = temp_db_path();
        let store = MemoryStore::connect(&path).await.unwrap();
        let entry = sample_entry("m1", ContextScope::User, Value::String("dark_mode".into()));
        store.insert(&entry).await.unwrap();

        let fetched = store.get("m1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "m1");
        assert_eq!(fetched.scope, ContextScope::User);
        assert_eq!(fetched.data, Value::String("dark_mode".into()));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn search_finds_entry_by_content() {
        let path = temp_db_path();
        let store = MemoryStore::connect(&path).await.unwrap();
        let entry = sample_entry("m2", ContextScope::System, Value::String("disk unavailable".into()));
        store.insert(&entry).await.unwrap();

        let results = store.search("disk", 10).await.unwrap();
        assert!(results.iter().any(|e| e.id == "m2"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn remove_deletes_entry_and_search_row() {
        let path = temp_db_path();
        let store = MemoryStore::connect(&path).await.unwrap();
        let entry = sample_entry("m3", ContextScope::User, Value::String("gone soon".into()));
        store.insert(&entry).await.unwrap();

        assert!(store.remove("m3").await.unwrap());
        assert!(store.get("m3").await.unwrap().is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn load_scope_only_returns_matching_scope() {
        let path = temp_db_path();
        let store = MemoryStore::connect(&path).await.unwrap();
        store
            .insert(&sample_entry("u1", ContextScope::User, Value::Null))
            .await
            .unwrap();
        store
            .insert(&sample_entry("s1", ContextScope::System, Value::Null))
            .await
            .unwrap();

        let user_entries = store.load_scope(ContextScope::User).await.unwrap();
        assert_eq!(user_entries.len(), 1);
        assert_eq!(user_entries[0].id, "u1");
        let _ = std::fs::remove_file(&path);
    }
}
