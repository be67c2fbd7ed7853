//! Transport contract
//!
//! The tracker never talks to the wire directly. It hands a [`WireMessage`]
//! to a [`Transport`] and receives a [`Promise`]: a single-read channel that
//! yields exactly one of an acknowledgment or an error. Reliable delivery,
//! stream framing and TLS are the transport's problem.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Transport-level failure
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The target has no live connection
    #[error("target not connected: {0}")]
    NotConnected(String),

    /// The send itself failed
    #[error("send failed: {0}")]
    Send(String),

    /// No acknowledgment arrived within the promise's budget
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),

    /// The promise was dropped without resolution
    #[error("acknowledgment channel closed")]
    ChannelClosed,
}

/// Acknowledgment status reported by the remote agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Failure,
    Timeout,
}

/// Terminal acknowledgment of one command
#[derive(Debug, Clone)]
pub struct CommandAck {
    pub status: AckStatus,
    /// Raw JSON result reported by the agent
    pub result: Option<serde_json::Value>,
    /// Error message for failed executions
    pub error: Option<String>,
}

/// Message handed to the transport for delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message id; equals the command id it carries
    pub msg_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// Serialized command payload body
    pub payload: serde_json::Value,
    /// The agent must acknowledge this message
    pub wait_ack: bool,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

/// Single-read notification of a command's remote outcome
///
/// At most one consumer ever reads a promise; `recv` consumes it.
pub struct Promise {
    rx: oneshot::Receiver<std::result::Result<CommandAck, TransportError>>,
}

impl Promise {
    /// Create a promise and its resolver half
    pub fn new() -> (PromiseResolver, Promise) {
        let (tx, rx) = oneshot::channel();
        (PromiseResolver { tx }, Promise { rx })
    }

    /// Wait for the acknowledgment or the transport error
    pub async fn recv(self) -> std::result::Result<CommandAck, TransportError> {
        match self.rx.await {
            Ok(res) => res,
            Err(_) => Err(TransportError::ChannelClosed),
        }
    }
}

/// Resolver half of a [`Promise`], held by the transport
pub struct PromiseResolver {
    tx: oneshot::Sender<std::result::Result<CommandAck, TransportError>>,
}

impl PromiseResolver {
    /// Resolve with an acknowledgment
    pub fn resolve(self, ack: CommandAck) {
        let _ = self.tx.send(Ok(ack));
    }

    /// Resolve with a transport error (including ack timeout)
    pub fn fail(self, err: TransportError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Contract the tracker consumes; implemented by the wire layer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget delivery
    async fn send(
        &self,
        target_id: &str,
        msg: WireMessage,
    ) -> std::result::Result<(), TransportError>;

    /// Deliver and obtain a promise bound to `timeout`
    async fn send_with_promise(
        &self,
        target_id: &str,
        msg: WireMessage,
        timeout: Duration,
    ) -> std::result::Result<Promise, TransportError>;
}
