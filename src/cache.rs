//! C4 Response Cache
//!
//! Expiry is always computed from `created_at + ttl`, never from idle time
//! (Design Note / Open Question 1): a frequently-read stale entry must not
//! be able to survive forever just because it keeps getting touched.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    Lru,
    Lfu,
    Ttl,
    Mixed,
}

struct Entry {
    value: Value,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    ttl: Duration,
    size: usize,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Tools whose result must never be cached: writes/mutations and
/// inherently-realtime queries.
const NON_CACHEABLE_SUBSTRINGS: &[&str] = &[
    "write", "create", "delete", "update", "move", "copy", "screenshot", "process", "metrics",
];

pub fn is_cacheable(tool_name: &str, succeeded: bool) -> bool {
    if !succeeded {
        return false;
    }
    let lower = tool_name.to_lowercase();
    !NON_CACHEABLE_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

pub fn cache_key(prefix: &str, tool_name: &str, params: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    prefix.hash(&mut hasher);
    tool_name.hash(&mut hasher);
    params.to_string().hash(&mut hasher);
    format!("{prefix}:{tool_name}:{:x}", hasher.finish())
}

pub struct ResponseCache {
    config: CacheConfig,
    entries: DashMap<String, Entry>,
    lru_order: Mutex<Vec<String>>,
    memory_bytes: std::sync::atomic::AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            lru_order: Mutex::new(Vec::new()),
            memory_bytes: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        entry.last_accessed = Instant::now();
        entry.access_count += 1;
        let value = entry.value.clone();
        drop(entry);
        self.touch_lru(key);
        Some(value)
    }

    pub fn put(&self, key: String, value: Value, ttl: Option<Duration>) {
        if self.config.max_size == 0 {
            return;
        }
        let size = value.to_string().len();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let now = Instant::now();

        while self.entries.len() >= self.config.max_size && !self.entries.contains_key(&key) {
            if !self.evict_one() {
                break;
            }
        }

        self.entries.insert(
            key.clone(),
            Entry {
                value,
                created_at: now,
                last_accessed: now,
                access_count: 0,
                ttl,
                size,
            },
        );
        self.memory_bytes
            .fetch_add(size as u64, std::sync::atomic::Ordering::SeqCst);
        self.touch_lru(&key);
    }

    fn touch_lru(&self, key: &str) {
        let mut order = self.lru_order.lock();
        order.retain(|k| k != key);
        order.push(key.to_string());
    }

    fn evict_one(&self) -> bool {
        let victim = match self.config.strategy {
            CacheStrategy::Lru => self.lru_order.lock().first().cloned(),
            CacheStrategy::Lfu => self
                .entries
                .iter()
                .min_by_key(|e| e.value().access_count)
                .map(|e| e.key().clone()),
            CacheStrategy::Ttl => self
                .entries
                .iter()
                .min_by_key(|e| e.value().created_at)
                .map(|e| e.key().clone()),
            CacheStrategy::Mixed => self
                .entries
                .iter()
                .find(|e| e.value().is_expired())
                .map(|e| e.key().clone())
                .or_else(|| self.lru_order.lock().first().cloned()),
        };

        match victim {
            Some(key) => {
                self.remove(&key);
                true
            }
            None => false,
        }
    }

    fn remove(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.memory_bytes
                .fetch_sub(entry.size as u64, std::sync::atomic::Ordering::SeqCst);
        }
        self.lru_order.lock().retain(|k| k != key);
    }

    pub fn cleanup_expired(&self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_after_put_returns_value() {
        let cache = ResponseCache::new(CacheConfig::default());
        cache.put("k".to_string(), json!({"a": 1}), None);
        assert_eq!(cache.get("k"), Some(json!({"a": 1})));
    }

    #[test]
    fn expiry_is_based_on_creation_time_not_idle_time() {
        let mut config = CacheConfig::default();
        config.default_ttl = Duration::from_millis(10);
        let cache = ResponseCache::new(config);
        cache.put("k".to_string(), json!(1), None);
        // repeated reads before expiry must not extend the ttl window
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_some());
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn max_size_zero_never_retains_anything() {
        let mut config = CacheConfig::default();
        config.max_size = 0;
        let cache = ResponseCache::new(config);
        cache.put("k".to_string(), json!(1), None);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn lru_strategy_evicts_least_recently_used() {
        let mut config = CacheConfig::default();
        config.max_size = 2;
        config.strategy = CacheStrategy::Lru;
        let cache = ResponseCache::new(config);
        cache.put("a".to_string(), json!(1), None);
        cache.put("b".to_string(), json!(2), None);
        cache.get("a"); // touch a, making b the LRU victim
        cache.put("c".to_string(), json!(3), None);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn write_tools_are_never_cacheable() {
        assert!(!is_cacheable("write_file", true));
        assert!(!is_cacheable("delete_resource", true));
        assert!(is_cacheable("read_file", true));
    }

    #[test]
    fn errors_are_never_cacheable() {
        assert!(!is_cacheable("read_file", false));
    }

    #[test]
    fn cache_key_is_deterministic() {
        let params = json!({"path": "/tmp"});
        assert_eq!(
            cache_key("fs", "read_file", &params),
            cache_key("fs", "read_file", &params)
        );
    }

    #[test]
    fn repeated_identical_call_within_ttl_hits_cache() {
        let cache = ResponseCache::new(CacheConfig::default());
        let key = cache_key("fs", "read_file", &json!({"path": "/a"}));
        cache.put(key.clone(), json!("contents"), None);
        assert_eq!(cache.get(&key), Some(json!("contents")));
        assert_eq!(cache.get(&key), Some(json!("contents")));
    }
}
