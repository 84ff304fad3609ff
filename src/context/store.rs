//! C11 Context Store
//!
//! Scoped key-value context for task execution history, user preferences,
//! system state, and error history. Session and temporary scopes are capped
//! in memory (oldest-first eviction) and never touch disk. User and system
//! scopes are additionally durable: every write is mirrored into an
//! embedded SQLite-backed [`MemoryStore`], so that context (not in-flight
//! workflow state, which this crate deliberately never persists) survives a
//! clean restart.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::workflow::value::Value;

use super::memory_store::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    TaskHistory,
    UserPreferences,
    SystemState,
    Environment,
    WorkflowState,
    ErrorHistory,
    PerformanceMetrics,
    ResourceUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    Session,
    User,
    System,
    Temporary,
}

const ALL_SCOPES: [ContextScope; 4] = [
    ContextScope::Session,
    ContextScope::User,
    ContextScope::System,
    ContextScope::Temporary,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    pub id: String,
    pub context_type: ContextType,
    pub scope: ContextScope,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub expiry: Option<DateTime<Utc>>,
    pub tags: BTreeSet<String>,
    pub relevance_score: f64,
}

impl ContextEntry {
    fn is_expired(&self) -> bool {
        self.expiry.map(|e| Utc::now() > e).unwrap_or(false)
    }
}

pub struct ContextStoreConfig {
    pub max_session_entries: usize,
    pub max_temporary_entries: usize,
    pub default_temporary_ttl: Duration,
}

impl Default for ContextStoreConfig {
    fn default() -> Self {
        Self {
            max_session_entries: 1000,
            max_temporary_entries: 100,
            default_temporary_ttl: Duration::from_secs(3600),
        }
    }
}

pub struct ContextStore {
    config: ContextStoreConfig,
    entries: DashMap<ContextScope, DashMap<String, ContextEntry>>,
    persistent: Option<Arc<MemoryStore>>,
}

impl ContextStore {
    pub fn new(config: ContextStoreConfig) -> Self {
        let entries = DashMap::new();
        for scope in ALL_SCOPES {
            entries.insert(scope, DashMap::new());
        }
        Self {
            config,
            entries,
            persistent: None,
        }
    }

    /// Back the user/system scopes with an embedded SQLite store. Call
    /// [`ContextStore::load_persisted`] afterwards to hydrate the in-memory
    /// shards from whatever survived a previous run.
    pub fn with_persistence(config: ContextStoreConfig, memory_store: Arc<MemoryStore>) -> Self {
        let mut store = Self::new(config);
        store.persistent = Some(memory_store);
        store
    }

    /// Load every persisted, non-expired user/system entry into the
    /// in-memory shards. A no-op if this store has no [`MemoryStore`].
    pub async fn load_persisted(&self) -> Result<(), super::memory_store::MemoryStoreError> {
        let Some(persistent) = &self.persistent else {
            return Ok(());
        };
        for scope in [ContextScope::User, ContextScope::System] {
            let entries = persistent.load_scope(scope).await?;
            let shard = self.entries.get(&scope).expect("all scopes pre-seeded");
            for entry in entries {
                shard.insert(entry.id.clone(), entry);
            }
        }
        Ok(())
    }

    fn persist_async(&self, entry: ContextEntry) {
        let Some(persistent) = self.persistent.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = persistent.insert(&entry).await {
                warn!(id = %entry.id, %err, "failed to persist context entry");
            }
        });
    }

    fn remove_persisted_async(&self, id: &str) {
        let Some(persistent) = self.persistent.clone() else {
            return;
        };
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(err) = persistent.remove(&id).await {
                warn!(%id, %err, "failed to remove persisted context entry");
            }
        });
    }

    /// Insert a context entry, assigning a default expiry for temporary-scope
    /// entries that didn't specify one, then enforce the scope's cap.
    pub fn add(
        &self,
        id: impl Into<String>,
        context_type: ContextType,
        scope: ContextScope,
        data: Value,
        tags: BTreeSet<String>,
        expiry: Option<DateTime<Utc>>,
    ) -> String {
        let id = id.into();
        let expiry = expiry.or_else(|| {
            if scope == ContextScope::Temporary {
                Some(Utc::now() + chrono::Duration::from_std(self.config.default_temporary_ttl).unwrap())
            } else {
                None
            }
        });

        let entry = ContextEntry {
            id: id.clone(),
            context_type,
            scope,
            data,
            created_at: Utc::now(),
            expiry,
            tags,
            relevance_score: 1.0,
        };

        if matches!(scope, ContextScope::User | ContextScope::System) {
            self.persist_async(entry.clone());
        }

        let shard = self.entries.get(&scope).expect("all scopes pre-seeded");
        shard.insert(id.clone(), entry);
        drop(shard);
        self.cleanup(scope);
        id
    }

    pub fn get(&self, id: &str) -> Option<ContextEntry> {
        for scope in ALL_SCOPES {
            let shard = self.entries.get(&scope)?;
            if let Some(entry) = shard.get(id) {
                if entry.value().is_expired() {
                    drop(entry);
                    shard.remove(id);
                    return None;
                }
                return Some(entry.value().clone());
            }
        }
        None
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut removed = false;
        for scope in ALL_SCOPES {
            if let Some(shard) = self.entries.get(&scope) {
                if shard.remove(id).is_some() {
                    removed = true;
                    if matches!(scope, ContextScope::User | ContextScope::System) {
                        self.remove_persisted_async(id);
                    }
                }
            }
        }
        removed
    }

    /// Query entries, optionally filtered by type/scope/tag overlap, sorted
    /// by relevance then recency, most relevant first.
    pub fn query(
        &self,
        context_type: Option<ContextType>,
        scope: Option<ContextScope>,
        tags: &BTreeSet<String>,
        limit: usize,
    ) -> Vec<ContextEntry> {
        let scopes: Vec<ContextScope> = match scope {
            Some(s) => vec![s],
            None => ALL_SCOPES.to_vec(),
        };

        let mut matches: Vec<ContextEntry> = Vec::new();
        for scope in scopes {
            let Some(shard) = self.entries.get(&scope) else {
                continue;
            };
            for entry in shard.iter() {
                let entry = entry.value();
                if entry.is_expired() {
                    continue;
                }
                if let Some(t) = context_type {
                    if entry.context_type != t {
                        continue;
                    }
                }
                if !tags.is_empty() && entry.tags.is_disjoint(tags) {
                    continue;
                }
                matches.push(entry.clone());
            }
        }

        matches.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        matches.truncate(limit);
        matches
    }

    /// Remove expired entries and, for capped scopes, trim back to the
    /// configured maximum by dropping the oldest entries first.
    fn cleanup(&self, scope: ContextScope) {
        let Some(shard) = self.entries.get(&scope) else {
            return;
        };

        let expired: Vec<String> = shard
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();
        for id in expired {
            shard.remove(&id);
        }

        let cap = match scope {
            ContextScope::Session => Some(self.config.max_session_entries),
            ContextScope::Temporary => Some(self.config.max_temporary_entries),
            ContextScope::User | ContextScope::System => None,
        };

        if let Some(cap) = cap {
            if shard.len() > cap {
                let mut by_age: Vec<(String, DateTime<Utc>)> = shard
                    .iter()
                    .map(|e| (e.key().clone(), e.value().created_at))
                    .collect();
                by_age.sort_by_key(|(_, created_at)| *created_at);
                let excess = shard.len() - cap;
                for (id, _) in by_age.into_iter().take(excess) {
                    shard.remove(&id);
                }
            }
        }
    }

    pub fn cleanup_all(&self) {
        for scope in ALL_SCOPES {
            self.cleanup(scope);
        }
    }

    pub fn len(&self, scope: ContextScope) -> usize {
        self.entries.get(&scope).map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_after_add_returns_entry() {
        let store = ContextStore::new(ContextStoreConfig::default());
        store.add(
            "t1",
            ContextType::TaskHistory,
            ContextScope::Session,
            Value::Null,
            BTreeSet::new(),
            None,
        );
        assert!(store.get("t1").is_some());
    }

    #[test]
    fn temporary_entries_get_default_expiry() {
        let mut config = ContextStoreConfig::default();
        config.default_temporary_ttl = Duration::from_millis(0);
        let store = ContextStore::new(config);
        store.add(
            "temp1",
            ContextType::Environment,
            ContextScope::Temporary,
            Value::Null,
            BTreeSet::new(),
            None,
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get("temp1").is_none());
    }

    #[test]
    fn session_scope_caps_at_configured_max() {
        let mut config = ContextStoreConfig::default();
        config.max_session_entries = 2;
        let store = ContextStore::new(config);
        for i in 0..5 {
            store.add(
                format!("s{i}"),
                ContextType::TaskHistory,
                ContextScope::Session,
                Value::Null,
                BTreeSet::new(),
                None,
            );
        }
        assert_eq!(store.len(ContextScope::Session), 2);
    }

    #[test]
    fn query_filters_by_tag_overlap() {
        let store = ContextStore::new(ContextStoreConfig::default());
        let mut tags = BTreeSet::new();
        tags.insert("failure".to_string());
        store.add(
            "e1",
            ContextType::ErrorHistory,
            ContextScope::User,
            Value::Null,
            tags.clone(),
            None,
        );
        store.add(
            "e2",
            ContextType::ErrorHistory,
            ContextScope::User,
            Value::Null,
            BTreeSet::new(),
            None,
        );
        let results = store.query(None, None, &tags, 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "e1");
    }

    #[tokio::test]
    async fn user_scope_entries_survive_reload_from_memory_store() {
        let path = std::env::temp_dir()
            .join(format!("toolmesh-context-store-test-{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string();
        let memory_store = std::sync::Arc::new(super::super::memory_store::MemoryStore::connect(&path).await.unwrap());

        {
            let store = ContextStore::with_persistence(ContextStoreConfig::default(), memory_store.clone());
            store.add(
                "pref-1",
                ContextType::UserPreferences,
                ContextScope::User,
                Value::String("dark_mode".into()),
                BTreeSet::new(),
                None,
            );
            // Persistence happens on a spawned task; give it a moment to land.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let reloaded = ContextStore::with_persistence(ContextStoreConfig::default(), memory_store);
        reloaded.load_persisted().await.unwrap();
        assert!(reloaded.get("pref-1").is_some());

        let _ = std::fs::remove_file(&path);
    }
}
