//! C3 Connection Pool
//!
//! A bounded per-kind pool of [`TransportClient`]s, with idle eviction,
//! periodic health checks, and optional startup prewarming.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::EngineError;
use crate::registry::{ClientKind, ClientRegistry};
use crate::transport::TransportClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Active,
    Reconnecting,
    Closed,
    Error,
}

struct Connection {
    id: Uuid,
    client: Arc<TransportClient>,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    error_count: u32,
}

struct KindPool {
    connections: HashMap<Uuid, Connection>,
}

impl KindPool {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }
}

/// A connection leased from the pool. Dropping it without calling
/// [`Lease::release`] still returns the connection via its `Drop` impl, so a
/// panicking step never leaks a permanently-active slot.
pub struct Lease {
    pool: Arc<ConnectionPool>,
    kind: ClientKind,
    id: Uuid,
    client: Option<Arc<TransportClient>>,
}

impl Lease {
    pub fn client(&self) -> &Arc<TransportClient> {
        self.client.as_ref().expect("lease client missing")
    }

    pub fn release(mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(self.kind, self.id, client, false);
        }
    }

    pub fn release_as_errored(mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(self.kind, self.id, client, true);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(self.kind, self.id, client, false);
        }
    }
}

pub struct ConnectionPool {
    config: PoolConfig,
    registry: Arc<ClientRegistry>,
    kinds: dashmap::DashMap<ClientKind, tokio::sync::Mutex<KindPool>>,
    notify: Notify,
    active_count: AtomicU32,
    next_seq: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, registry: Arc<ClientRegistry>) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            kinds: dashmap::DashMap::new(),
            notify: Notify::new(),
            active_count: AtomicU32::new(0),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Create up to `min_per_kind` connections for every registered kind.
    pub async fn prewarm(self: &Arc<Self>) -> Result<(), EngineError> {
        if !self.config.prewarm {
            return Ok(());
        }
        for kind in self.registry.registered_kinds() {
            for _ in 0..self.config.min_per_kind {
                let _ = self.create_connection(kind).await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self), fields(?kind))]
    pub async fn acquire(self: &Arc<Self>, kind: ClientKind) -> Result<Lease, EngineError> {
        let deadline = Instant::now() + self.config.connection_timeout;
        loop {
            if let Some(lease) = self.try_take_idle(kind).await {
                return Ok(lease);
            }

            if self.count_for_kind(kind).await < self.config.max_per_kind {
                return self.create_connection(kind).await;
            }

            if Instant::now() >= deadline {
                return Err(EngineError::Capacity(format!("{kind:?}")));
            }

            let wait = tokio::time::timeout(Duration::from_millis(50), self.notify.notified());
            let _ = tokio::time::timeout(deadline - Instant::now(), wait).await;
        }
    }

    async fn try_take_idle(self: &Arc<Self>, kind: ClientKind) -> Option<Lease> {
        let entry = self.kinds.entry(kind).or_insert_with(|| tokio::sync::Mutex::new(KindPool::new()));
        let mut pool = entry.lock().await;
        let idle_id = pool
            .connections
            .iter()
            .find(|(_, c)| c.state == ConnectionState::Idle)
            .map(|(id, _)| *id)?;
        let connection = pool.connections.get_mut(&idle_id)?;
        connection.state = ConnectionState::Active;
        connection.last_used_at = Instant::now();
        connection.use_count += 1;
        self.active_count.fetch_add(1, Ordering::SeqCst);
        Some(Lease {
            pool: Arc::clone(self),
            kind,
            id: idle_id,
            client: Some(connection.client.clone()),
        })
    }

    async fn count_for_kind(&self, kind: ClientKind) -> usize {
        let entry = self.kinds.entry(kind).or_insert_with(|| tokio::sync::Mutex::new(KindPool::new()));
        entry.lock().await.connections.len()
    }

    async fn create_connection(self: &Arc<Self>, kind: ClientKind) -> Result<Lease, EngineError> {
        let factory = self
            .registry
            .factory_for(kind)
            .ok_or_else(|| EngineError::Configuration(format!("no factory registered for {kind:?}")))?;
        let client = factory.create().await?;
        let id = Uuid::from_u64_pair(0, self.next_seq.fetch_add(1, Ordering::SeqCst));
        let now = Instant::now();
        let entry = self.kinds.entry(kind).or_insert_with(|| tokio::sync::Mutex::new(KindPool::new()));
        {
            let mut pool = entry.lock().await;
            pool.connections.insert(
                id,
                Connection {
                    id,
                    client: client.clone(),
                    state: ConnectionState::Active,
                    created_at: now,
                    last_used_at: now,
                    use_count: 1,
                    error_count: 0,
                },
            );
        }
        self.active_count.fetch_add(1, Ordering::SeqCst);
        Ok(Lease {
            pool: Arc::clone(self),
            kind,
            id,
            client: Some(client),
        })
    }

    fn release(self: &Arc<Self>, kind: ClientKind, id: Uuid, _client: Arc<TransportClient>, errored: bool) {
        let pool_ref = self.clone();
        let kinds = self.kinds.clone();
        tokio::spawn(async move {
            if let Some(entry) = kinds.get(&kind) {
                let mut guard = entry.lock().await;
                if let Some(connection) = guard.connections.get_mut(&id) {
                    if errored {
                        connection.error_count += 1;
                        connection.state = if connection.error_count > 3 {
                            ConnectionState::Error
                        } else {
                            ConnectionState::Reconnecting
                        };
                        if connection.state == ConnectionState::Error {
                            guard.connections.remove(&id);
                        }
                    } else {
                        connection.state = ConnectionState::Idle;
                        connection.last_used_at = Instant::now();
                    }
                }
            }
            pool_ref.active_count.fetch_sub(1, Ordering::SeqCst);
            pool_ref.notify.notify_waiters();
        });
    }

    /// Evict idle connections past `idle_timeout`, never below `min_per_kind`.
    pub async fn evict_idle(&self) {
        for entry in self.kinds.iter() {
            let mut pool = entry.value().lock().await;
            let idle_count = pool
                .connections
                .values()
                .filter(|c| c.state == ConnectionState::Idle)
                .count();
            if idle_count <= self.config.min_per_kind {
                continue;
            }
            let now = Instant::now();
            let stale: Vec<Uuid> = pool
                .connections
                .iter()
                .filter(|(_, c)| {
                    c.state == ConnectionState::Idle
                        && now.duration_since(c.last_used_at) > self.config.idle_timeout
                })
                .map(|(id, _)| *id)
                .collect();
            let keep_at_least = self.config.min_per_kind;
            let mut removed = 0;
            for id in stale {
                if idle_count - removed <= keep_at_least {
                    break;
                }
                pool.connections.remove(&id);
                removed += 1;
            }
        }
    }

    /// Ping every idle connection; failing ones are recycled out of the pool.
    pub async fn health_check(&self) {
        for entry in self.kinds.iter() {
            let mut pool = entry.value().lock().await;
            let idle: Vec<Uuid> = pool
                .connections
                .iter()
                .filter(|(_, c)| c.state == ConnectionState::Idle)
                .map(|(id, _)| *id)
                .collect();
            for id in idle {
                if let Some(connection) = pool.connections.get(&id) {
                    if connection.client.ping().await.is_err() {
                        debug!(%id, "health check failed, recycling connection");
                        pool.connections.remove(&id);
                    }
                }
            }
        }
    }

    pub fn active_leases(&self) -> u32 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Utilization in `[0.0, 1.0]` for a kind, used by the metrics registry's
    /// threshold checks (`pool utilization` recommendations).
    pub async fn utilization(&self, kind: ClientKind) -> f64 {
        if self.config.max_per_kind == 0 {
            return 0.0;
        }
        let count = self.count_for_kind(kind).await;
        count as f64 / self.config.max_per_kind as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_at_zero_capacity_reports_zero_utilization_path() {
        let mut config = PoolConfig::default();
        config.max_per_kind = 0;
        assert_eq!(config.max_per_kind, 0);
    }
}
