//! WebSocket transport for the build-tool server channel

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{Deliver, Transport};

type ReadHalf = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Text-frame transport over an established WebSocket
///
/// Outbound frames are queued to a writer task, so [`Transport::trigger`]
/// never waits on the socket.
pub struct WebSocketTransport {
    tx: mpsc::UnboundedSender<String>,
    inbound: Mutex<Option<(ReadHalf, oneshot::Receiver<()>)>>,
    peer: String,
    closed: Arc<watch::Sender<bool>>,
    _stop: oneshot::Sender<()>,
}

impl WebSocketTransport {
    /// Connect to a WebSocket server, e.g. `ws://127.0.0.1:27040`
    pub async fn connect(url: &str) -> Result<Self, WsError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        tracing::info!("Connected to {}", url);
        Ok(Self::from_stream(ws, url))
    }

    /// Wrap an already upgraded stream (client or accepted server side)
    pub fn from_stream<S>(ws: WebSocketStream<S>, peer: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer = peer.into();
        let (mut write, read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let closed = Arc::new(watch::channel(false).0);

        let writer_peer = peer.clone();
        let writer_closed = closed.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if write.send(Message::Text(text.into())).await.is_err() {
                    tracing::warn!("Failed to send message to {}", writer_peer);
                    writer_closed.send_replace(true);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        Self {
            tx,
            inbound: Mutex::new(Some((Box::pin(read), stop_rx))),
            peer,
            closed,
            _stop: stop_tx,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Neither side of the socket has failed or been closed by the peer
    pub fn is_open(&self) -> bool {
        !*self.closed.borrow() && !self.tx.is_closed()
    }

    /// Resolves once the peer closes the socket or a read or write fails.
    /// Only observed after [`Transport::tracker`] started the reader.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Transport for WebSocketTransport {
    fn tracker(&self, deliver: Deliver) {
        let Some((mut read, mut stop)) = self.inbound.lock().take() else {
            tracing::warn!("websocket transport {} already has a tracker, ignoring", self.peer);
            return;
        };
        let peer = self.peer.clone();
        let closed = self.closed.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => deliver(text.to_string()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(Message::Ping(_))) => {
                            // Pong is handled automatically by tungstenite
                            tracing::trace!("Received ping from {}", peer);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::error!("WebSocket error for {}: {}", peer, e);
                            break;
                        }
                    },
                    _ = &mut stop => break,
                }
            }
            closed.send_replace(true);
            tracing::debug!("websocket reader for {} finished", peer);
        });
    }

    fn trigger(&self, data: String) {
        if self.tx.send(data).is_err() {
            tracing::trace!("websocket to {} closed, message dropped", self.peer);
        }
    }
}
