//! # Tool Mesh Engine
//!
//! A multi-tenant orchestration engine that routes workflow steps to pooled
//! MCP-style clients (filesystem, desktop, system) over a resilient
//! transport layer, with response caching, circuit breaking, and retry.
//!
//! ## Features
//!
//! - **Dependency-graph workflows**: steps declare completion/success/data/
//!   conditional dependencies; execution proceeds level by level
//! - **Resilient tool invocation**: pooled connections, response caching,
//!   circuit breakers, and classified retry sit in front of every call
//! - **Context and pattern recognition**: scoped context storage plus
//!   keyword-similarity pattern tracking across task and error history
//! - **OpenTelemetry integration**: structured tracing via `tracing`
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowEngine (C9)                      │
//! │   dependency graph (C8) -> step dispatch -> execution context │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ResilientExecutor (C7)                      │
//! │   pool lease -> cache lookup -> breaker gate -> retry loop    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           ConnectionPool (C3) / ClientRegistry (C2)           │
//! │              TransportClient (C1) over JSON-RPC/WS            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod metrics;
pub mod pool;
pub mod registry;
pub mod reliability;
pub mod router;
pub mod telemetry;
pub mod transport;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cache::{CacheStrategy, ResponseCache};
    pub use crate::config::EngineConfig;
    pub use crate::context::{ContextScope, ContextStore, ContextType, MemoryStore, PatternRecognizer};
    pub use crate::error::{DegradedResult, EngineError, ErrorCategory};
    pub use crate::executor::{Outcome, ResilientExecutor};
    pub use crate::graph::{Dependency, DependencyGraph, GraphError};
    pub use crate::metrics::{MetricsRegistry, SystemSampler};
    pub use crate::pool::ConnectionPool;
    pub use crate::registry::{ClientKind, ClientRegistry, HealthState};
    pub use crate::reliability::{CircuitBreaker, ErrorClassifier, RecoveryAction, RetryController};
    pub use crate::router::{TaskCategory, TaskRouter};
    pub use crate::telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
    pub use crate::transport::{TransportClient, TransportFactory};
    pub use crate::workflow::{
        EngineRunError, FailureStrategy, RollbackHandler, StepDefinition, StepKind, Value,
        WorkflowDefinition, WorkflowEngine, WorkflowRun, WorkflowStatus,
    };
}

pub use config::EngineConfig;
pub use error::{DegradedResult, EngineError, ErrorCategory};
pub use executor::ResilientExecutor;
pub use workflow::{WorkflowDefinition, WorkflowEngine, WorkflowRun};
