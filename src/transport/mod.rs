//! C1 Transport Client: one JSON-RPC/WebSocket session per remote tool provider

pub mod client;
pub mod message;

pub use client::{NotificationHandler, TransportClient, TransportConfig, TransportFactory};
pub use message::{Inbound, Request, RpcError};
