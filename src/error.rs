//! Crate-wide error taxonomy
//!
//! Every component exposes its own `thiserror` enum at its public boundary;
//! this type is the closed taxonomy they all collapse into at the seams
//! where callers need one uniform error (C7's resilient executor, C9's
//! workflow engine). Nothing here is a grab-bag: a new failure mode should
//! extend one of these variants, not be stringly-typed into `Other`.

use thiserror::Error;

/// Errors produced while driving a tool call or a workflow step through it.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// The underlying transport could not deliver or receive a message.
    #[error("transport error: {0}")]
    Transport(String),

    /// A call did not complete within its allotted time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The remote tool provider returned an application-level error.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// No connection could be leased before the pool's timeout elapsed.
    #[error("capacity exhausted for kind {0}")]
    Capacity(String),

    /// The circuit breaker for this service is open.
    #[error("circuit breaker open for {0}")]
    BreakerOpen(String),

    /// The operation observed a cancellation signal.
    #[error("cancelled")]
    Cancelled,

    /// A value failed schema or structural validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A configuration value was missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Category used by the error classifier (C5) to decide a [`RecoveryAction`].
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Transport(_) => ErrorCategory::Network,
            EngineError::Timeout(_) => ErrorCategory::Timeout,
            EngineError::Remote { .. } => ErrorCategory::Unknown,
            EngineError::Capacity(_) => ErrorCategory::Resource,
            EngineError::BreakerOpen(_) => ErrorCategory::Resource,
            EngineError::Cancelled => ErrorCategory::Unknown,
            EngineError::Validation(_) => ErrorCategory::Validation,
            EngineError::Configuration(_) => ErrorCategory::Validation,
        }
    }
}

/// Coarse error category driving circuit-breaker and retry behavior.
///
/// [`EngineError::category`] maps the closed error taxonomy to one of
/// these; see `docs/reliability` (module `reliability::classifier`) for how
/// each category resolves to a [`RecoveryAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Authentication,
    Timeout,
    Resource,
    Validation,
    System,
    Unknown,
}

/// A result shape returned instead of propagating a failure when a
/// component chooses graceful degradation (`ErrorCategory::Resource` /
/// `System`). Never constructed with `success = true`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DegradedResult {
    pub success: bool,
    pub degraded: bool,
    pub reason: String,
    pub partial_data: Option<serde_json::Value>,
}

impl DegradedResult {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            degraded: true,
            reason: reason.into(),
            partial_data: None,
        }
    }

    pub fn with_partial_data(mut self, data: serde_json::Value) -> Self {
        self.partial_data = Some(data);
        self
    }
}
