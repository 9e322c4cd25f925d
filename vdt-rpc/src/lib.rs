//! Cross-context messaging kernel for the devtools bridge
//!
//! Two execution contexts that share no memory (the inspected app, the
//! devtools panel and optionally the build-tool server) talk through a
//! [`Transport`](transport::Transport). On top of it sit the [`Bridge`]
//! event bus, the correlated [`RpcCore`] and the connection handshake.

pub mod bridge;
pub mod envelope;
pub mod error;
pub mod event;
pub mod handshake;
pub mod rpc;
pub mod transport;

pub use bridge::{Bridge, ConnectionStatus, ListenerId, WeakBridge};
pub use envelope::{CorrelationId, Envelope};
pub use error::{BridgeError, DecodeError, HandshakeError, RpcError};
pub use event::{BridgeEvent, Source};
pub use handshake::{HandshakeClient, HandshakeServer, HandshakeState};
pub use rpc::RpcCore;
