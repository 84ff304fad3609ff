//! C11 Context & Memory
//!
//! Scoped context storage ([`store`]), its embedded SQLite persistence for
//! the user/system scopes ([`memory_store`]), plus keyword-similarity
//! pattern recognition over task and error history ([`pattern`]).

pub mod memory_store;
pub mod pattern;
pub mod store;

pub use memory_store::{MemoryStore, MemoryStoreError};
pub use pattern::{PatternRecognizer, PatternRecognizerConfig, TaskPattern};
pub use store::{ContextEntry, ContextScope, ContextStore, ContextStoreConfig, ContextType};
