//! Error classification, circuit breaking, and retry (C5)

pub mod circuit_breaker;
pub mod classifier;
pub mod retry;

pub use circuit_breaker::{BreakerError, BreakerPermit, CircuitBreaker, CircuitState};
pub use classifier::{ErrorClassifier, RecoveryAction};
pub use retry::RetryController;
