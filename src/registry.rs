//! C2 Client Registry
//!
//! Holds a named map from client kind to a factory capable of producing a
//! [`TransportClient`] for that kind, plus the last known health state per
//! kind. The registry itself manages no connections; C3 consults it when a
//! new connection must be created for a kind.
//!
//! Filesystem clients cover file operations and data analysis at the
//! highest priority, desktop and system clients cover their own categories
//! at a lower priority, with filesystem as the fallback for general/hybrid
//! tasks.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::transport::TransportFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Filesystem,
    Desktop,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unavailable,
}

struct Entry {
    factory: Arc<dyn TransportFactory>,
    priority: i32,
}

pub struct ClientRegistry {
    entries: HashMap<ClientKind, Entry>,
    health: DashMap<ClientKind, HealthState>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            health: DashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ClientKind, priority: i32, factory: Arc<dyn TransportFactory>) {
        self.entries.insert(kind, Entry { factory, priority });
        self.health.insert(kind, HealthState::Healthy);
    }

    pub fn factory_for(&self, kind: ClientKind) -> Option<Arc<dyn TransportFactory>> {
        self.entries.get(&kind).map(|e| e.factory.clone())
    }

    pub fn priority_of(&self, kind: ClientKind) -> i32 {
        self.entries.get(&kind).map(|e| e.priority).unwrap_or(0)
    }

    pub fn registered_kinds(&self) -> Vec<ClientKind> {
        let mut kinds: Vec<ClientKind> = self.entries.keys().copied().collect();
        kinds.sort_by_key(|k| std::cmp::Reverse(self.priority_of(*k)));
        kinds
    }

    pub fn set_health(&self, kind: ClientKind, state: HealthState) {
        self.health.insert(kind, state);
    }

    pub fn health_of(&self, kind: ClientKind) -> HealthState {
        self.health
            .get(&kind)
            .map(|h| *h)
            .unwrap_or(HealthState::Unavailable)
    }

    /// Aggregate health rollup across every registered kind.
    pub fn overall_health(&self) -> HealthState {
        let total = self.entries.len();
        if total == 0 {
            return HealthState::Unavailable;
        }
        let unhealthy = self
            .health
            .iter()
            .filter(|h| *h.value() == HealthState::Unavailable)
            .count();
        if unhealthy == 0 {
            HealthState::Healthy
        } else if unhealthy < total {
            HealthState::Degraded
        } else {
            HealthState::Unavailable
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    struct DummyFactory;
    impl TransportFactory for DummyFactory {
        fn create(
            &self,
        ) -> Pin<
            Box<
                dyn Future<Output = Result<Arc<crate::transport::TransportClient>, crate::error::EngineError>>
                    + Send,
            >,
        > {
            Box::pin(async {
                Err(crate::error::EngineError::Configuration(
                    "dummy factory".to_string(),
                ))
            })
        }
    }

    #[test]
    fn registered_kinds_are_priority_sorted() {
        let mut registry = ClientRegistry::new();
        registry.register(ClientKind::Desktop, 2, Arc::new(DummyFactory));
        registry.register(ClientKind::Filesystem, 3, Arc::new(DummyFactory));
        registry.register(ClientKind::System, 2, Arc::new(DummyFactory));
        assert_eq!(registry.registered_kinds()[0], ClientKind::Filesystem);
    }

    #[test]
    fn overall_health_degrades_with_partial_failures() {
        let mut registry = ClientRegistry::new();
        registry.register(ClientKind::Filesystem, 3, Arc::new(DummyFactory));
        registry.register(ClientKind::Desktop, 2, Arc::new(DummyFactory));
        assert_eq!(registry.overall_health(), HealthState::Healthy);
        registry.set_health(ClientKind::Desktop, HealthState::Unavailable);
        assert_eq!(registry.overall_health(), HealthState::Degraded);
        registry.set_health(ClientKind::Filesystem, HealthState::Unavailable);
        assert_eq!(registry.overall_health(), HealthState::Unavailable);
    }
}
