//! C7 Resilient Executor
//!
//! The single entry point for invoking one tool against one client kind.
//! Composition order: pool lease -> cache lookup -> breaker gate -> retry
//! loop -> metrics. The lease is always released, even on error or
//! cancellation, via [`Lease`]'s `Drop` impl.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cache::{cache_key, is_cacheable, ResponseCache};
use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::error::EngineError;
use crate::metrics::{MetricType, MetricsRegistry};
use crate::pool::ConnectionPool;
use crate::registry::ClientKind;
use crate::reliability::{BreakerError, CircuitBreaker, ErrorClassifier, RetryController};

pub struct ResilientExecutor {
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    metrics: Arc<MetricsRegistry>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    retry_config: RetryConfig,
    breaker_config: CircuitBreakerConfig,
}

/// Outcome of a resilient call: either the tool's result, or a degraded
/// result when the error classifier chose graceful degradation instead of
/// propagating the failure.
pub enum Outcome {
    Value(Value),
    Degraded(crate::error::DegradedResult),
}

impl ResilientExecutor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        cache: Arc<ResponseCache>,
        metrics: Arc<MetricsRegistry>,
        retry_config: RetryConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            metrics,
            breakers: DashMap::new(),
            retry_config,
            breaker_config,
        }
    }

    fn breaker_for(&self, service_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service_id, self.breaker_config.clone())))
            .clone()
    }

    #[instrument(skip(self, params), fields(%service_id, %tool_name))]
    pub async fn invoke(
        &self,
        kind: ClientKind,
        service_id: &str,
        tool_name: &str,
        params: Value,
    ) -> Result<Outcome, EngineError> {
        let key = cache_key(service_id, tool_name, &params);
        if let Some(cached) = self.cache.get(&key) {
            self.metrics.increment(&format!("{tool_name}.cache_hits"));
            return Ok(Outcome::Value(cached));
        }

        let breaker = self.breaker_for(service_id);
        let permit = breaker
            .try_acquire()
            .map_err(|_: BreakerError| EngineError::BreakerOpen(service_id.to_string()))?;

        let metric_name = format!("tool.{tool_name}");
        let mut attempt = 1u32;

        let result = loop {
            let lease = self.pool.acquire(kind).await?;
            let call_result = self
                .metrics
                .time_operation(&metric_name, lease.client().call(tool_name, params.clone()))
                .await;

            match call_result {
                Ok(value) => {
                    lease.release();
                    break Ok(value);
                }
                Err(err) => {
                    lease.release_as_errored();
                    let should_retry = ErrorClassifier::should_retry(&err, attempt + 1)
                        && RetryController::has_attempts_remaining(&self.retry_config, attempt);
                    if !should_retry {
                        break Err(err);
                    }
                    let delay = RetryController::delay_for_attempt(&self.retry_config, attempt + 1)
                        + ErrorClassifier::extra_delay(&err);
                    warn!(%err, attempt, ?delay, "retrying tool call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }

        match result {
            Ok(value) => {
                if is_cacheable(tool_name, true) {
                    self.cache.put(key, value.clone(), None);
                }
                Ok(Outcome::Value(value))
            }
            Err(err) => match crate::reliability::ErrorClassifier::classify(&err) {
                crate::reliability::RecoveryAction::GracefulDegradation => {
                    info!(%err, "degrading gracefully instead of propagating failure");
                    Ok(Outcome::Degraded(
                        crate::error::DegradedResult::new(err.to_string()),
                    ))
                }
                _ => Err(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClientRegistry;

    #[tokio::test]
    async fn invoke_fails_capacity_when_no_factory_registered() {
        let registry = Arc::new(ClientRegistry::new());
        let pool = ConnectionPool::new(crate::config::PoolConfig::default(), registry);
        let cache = Arc::new(ResponseCache::new(crate::config::CacheConfig::default()));
        let metrics = Arc::new(MetricsRegistry::new());
        let executor = ResilientExecutor::new(
            pool,
            cache,
            metrics,
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
        );
        let result = executor
            .invoke(ClientKind::Filesystem, "fs", "read_file", Value::Null)
            .await;
        assert!(result.is_err());
    }
}
