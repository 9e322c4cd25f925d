//! Error types for the bridge kernel

use std::time::Duration;

use crate::event::BridgeEvent;

/// Errors raised while sending through a [`Bridge`](crate::bridge::Bridge)
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Lifecycle events only exist on the local side
    #[error("`{0}` is a local lifecycle event and cannot be emitted")]
    LocalEvent(BridgeEvent),
    #[error("bridge is disconnected")]
    Disconnected,
}

/// Reasons an inbound transport message is dropped before dispatch
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed payload: {0}")]
    Payload(serde_json::Error),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
}

/// Failure of a correlated call
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("`{event}` timed out after {after:?}")]
    Timeout { event: BridgeEvent, after: Duration },
    #[error("bridge disconnected while `{0}` was pending")]
    Disconnected(BridgeEvent),
    #[error("remote error: {0}")]
    Remote(String),
    #[error("failed to decode reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl RpcError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

/// Failure of the connection handshake
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("bridge was torn down before the peer answered")]
    Aborted,
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
