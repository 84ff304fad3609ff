//! C1 Transport Client
//!
//! One bidirectional JSON-RPC session to one remote tool provider over a
//! WebSocket. Outgoing calls are correlated to responses by a generated
//! request id held in a pending-call table until the response resolves it
//! (or the connection drops, which fails every pending call with a
//! transport error). Disconnection triggers reconnect-with-backoff; a
//! notification (no id) is handed to the caller-supplied handler instead of
//! resolving a pending call.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, instrument, warn};

use super::message::{Inbound, Request};
use crate::error::EngineError;

pub type NotificationHandler = Arc<dyn Fn(String, Value) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

type PendingCalls = Arc<DashMap<u64, oneshot::Sender<Result<Value, EngineError>>>>;

/// A single connection to a remote tool provider.
pub struct TransportClient {
    config: TransportConfig,
    next_id: AtomicU64,
    pending: PendingCalls,
    outbound: RwLock<Option<mpsc::UnboundedSender<WsMessage>>>,
    notifications: Option<NotificationHandler>,
}

impl TransportClient {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            outbound: RwLock::new(None),
            notifications: None,
        }
    }

    pub fn with_notification_handler(mut self, handler: NotificationHandler) -> Self {
        self.notifications = Some(handler);
        self
    }

    /// Connect (or reconnect) with exponential backoff, capped at
    /// `max_reconnect_attempts`.
    #[instrument(skip(self), fields(url = %self.config.url))]
    pub async fn connect(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut attempt = 0u32;
        let mut backoff = self.config.initial_backoff;
        loop {
            match self.connect_once().await {
                Ok(()) => {
                    info!("connected to remote tool provider");
                    return Ok(());
                }
                Err(err) if attempt + 1 >= self.config.max_reconnect_attempts => {
                    warn!(attempts = attempt + 1, "exhausted reconnect attempts");
                    return Err(err);
                }
                Err(err) => {
                    debug!(%err, attempt, ?backoff, "reconnect attempt failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_once(self: &Arc<Self>) -> Result<(), EngineError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.config.url)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

        *self.outbound.write().await = Some(tx);

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let pending = self.pending.clone();
        let notifications = self.notifications.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        dispatch_inbound(&text, &pending, notifications.as_ref());
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            // connection dropped: fail every pending call rather than hang.
            *this.outbound.write().await = None;
            for entry in pending.iter() {
                let _ = entry.key();
            }
            let keys: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
            for key in keys {
                if let Some((_, sender)) = pending.remove(&key) {
                    let _ = sender.send(Err(EngineError::Transport(
                        "connection closed".to_string(),
                    )));
                }
            }
        });

        Ok(())
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Invoke a JSON-RPC method and await its correlated response, failing
    /// if no response arrives within `call_timeout`.
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let sender_guard = self.outbound.read().await;
        let Some(sender) = sender_guard.as_ref() else {
            return Err(EngineError::Transport("not connected".to_string()));
        };

        let id = self.allocate_id();
        let request = Request::new(id, method, params);
        let payload = serde_json::to_string(&request)
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if sender.send(WsMessage::Text(payload)).is_err() {
            self.pending.remove(&id);
            return Err(EngineError::Transport("send failed".to_string()));
        }
        drop(sender_guard);

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Transport("response channel closed".to_string())),
            Err(_) => {
                self.pending.remove(&id);
                Err(EngineError::Timeout(self.config.call_timeout))
            }
        }
    }

    /// Health check via a `ping` RPC.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.call("ping", Value::Null).await.map(|_| ())
    }

    pub async fn is_connected(&self) -> bool {
        self.outbound.read().await.is_some()
    }
}

fn dispatch_inbound(
    text: &str,
    pending: &PendingCalls,
    notifications: Option<&NotificationHandler>,
) {
    let Ok(message) = serde_json::from_str::<Inbound>(text) else {
        return;
    };
    match message {
        Inbound::Response { id, result, error } => {
            if let Some((_, sender)) = pending.remove(&id) {
                let outcome = match error {
                    Some(err) => Err(EngineError::Remote {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = sender.send(outcome);
            }
        }
        Inbound::Notification { method, params } => {
            if let Some(handler) = notifications {
                handler(method, params);
            }
        }
    }
}

/// A factory producing a ready-to-use [`TransportClient`] for a client kind.
/// C2's registry holds one of these per kind; C3's pool calls it to create
/// new connections up to the per-kind cap.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Pin<Box<dyn Future<Output = Result<Arc<TransportClient>, EngineError>> + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_id_increments() {
        let client = TransportClient::new(TransportConfig::new("ws://localhost"));
        assert_eq!(client.allocate_id(), 1);
        assert_eq!(client.allocate_id(), 2);
    }

    #[tokio::test]
    async fn call_fails_fast_when_not_connected() {
        let client = TransportClient::new(TransportConfig::new("ws://localhost"));
        let result = client.call("tools/list", Value::Null).await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
    }

    #[test]
    fn dispatch_resolves_pending_call_on_result() {
        let pending: PendingCalls = Arc::new(DashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.insert(7, tx);
        dispatch_inbound(r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#, &pending, None);
        assert!(rx.try_recv().is_ok());
        assert!(pending.is_empty());
    }

    #[test]
    fn dispatch_resolves_pending_call_on_error() {
        let pending: PendingCalls = Arc::new(DashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.insert(3, tx);
        dispatch_inbound(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"boom"}}"#,
            &pending,
            None,
        );
        let outcome = rx.try_recv().unwrap();
        assert!(matches!(outcome, Err(EngineError::Remote { code: -32000, .. })));
    }
}
