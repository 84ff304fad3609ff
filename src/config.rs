//! Engine configuration
//!
//! Configuration is layered with [`figment`]: a `toolmesh.toml` file (if present)
//! provides defaults, environment variables prefixed `TOOLMESH_` override them.
//! Call [`EngineConfig::load`] once at startup; everything else takes the
//! resulting struct by value or reference.

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStrategy;
use crate::workflow::FailureStrategy;

/// Errors while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

/// Pool configuration (C3)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_per_kind: usize,
    pub min_per_kind: usize,
    #[serde(with = "duration_secs")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
    #[serde(with = "duration_secs")]
    pub health_check_interval: Duration,
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    pub prewarm: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_kind: 5,
            min_per_kind: 1,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            prewarm: true,
        }
    }
}

/// Response cache configuration (C4)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub max_memory_bytes: u64,
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub cleanup_interval: Duration,
    pub strategy: CacheStrategy,
    pub persistence: bool,
    pub persistence_path: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_memory_bytes: 100 * 1024 * 1024,
            default_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
            strategy: CacheStrategy::Mixed,
            persistence: true,
            persistence_path: None,
        }
    }
}

/// Retry controller configuration (C5)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Constant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub base_delay: Duration,
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

/// Circuit breaker configuration (C5)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Metrics registry configuration (C6)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Interval between [`crate::metrics::SystemSampler`] ticks.
    #[serde(with = "duration_secs")]
    pub sample_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(10),
        }
    }
}

/// Top-level engine configuration (C9)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrent_workflows: usize,
    #[serde(with = "duration_secs")]
    pub global_timeout: Duration,
    pub failure_strategy: FailureStrategy,
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub metrics: MetricsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 5,
            global_timeout: Duration::from_secs(1800),
            failure_strategy: FailureStrategy::Stop,
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `toolmesh.toml` (if present) and `TOOLMESH_*`
    /// environment variables, falling back to [`EngineConfig::default`].
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Toml::file("toolmesh.toml"))
            .merge(Env::prefixed("TOOLMESH_").split("__"))
            .extract()
            .map_err(ConfigError::Load)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
