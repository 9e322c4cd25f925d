use std::path::PathBuf;

use vdt_rpc::{BridgeError, HandshakeError, RpcError};

/// Failure while bringing up or using a host or panel session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("no active connection")]
    NotConnected,
}

/// Build-tool server failures
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind to any port in range {first}-{last}")]
    NoFreePort { first: u16, last: u16 },
    #[error("`{}` is outside the project root", .0.display())]
    OutsideRoot(PathBuf),
    #[error("invalid asset pattern: {0}")]
    Pattern(#[from] globset::Error),
    #[error("invalid import pattern: {0}")]
    Import(#[from] regex::Error),
    #[error("failed to watch project root: {0}")]
    Watch(#[from] notify::Error),
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
