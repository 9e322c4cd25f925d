//! In-process message port pair

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::{Deliver, Transport};

struct Inbound {
    rx: mpsc::UnboundedReceiver<String>,
    stop: oneshot::Receiver<()>,
}

/// One end of a connected message port
///
/// Messages sent on one end arrive on the other in order. Dropping an end
/// detaches it: the peer's sends are lost from then on.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
    inbound: Mutex<Option<Inbound>>,
    /// Dropped with the transport, which stops the pump task
    _stop: oneshot::Sender<()>,
}

impl ChannelTransport {
    /// Create two connected ends
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::end(a_tx, b_rx), Self::end(b_tx, a_rx))
    }

    fn end(tx: mpsc::UnboundedSender<String>, rx: mpsc::UnboundedReceiver<String>) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        Self {
            tx,
            inbound: Mutex::new(Some(Inbound { rx, stop: stop_rx })),
            _stop: stop_tx,
        }
    }

    /// Whether the other end still exists
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl Transport for ChannelTransport {
    fn tracker(&self, deliver: Deliver) {
        let Some(Inbound { mut rx, mut stop }) = self.inbound.lock().take() else {
            tracing::warn!("channel transport already has a tracker, ignoring");
            return;
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(data) => deliver(data),
                        None => break,
                    },
                    _ = &mut stop => break,
                }
            }
            tracing::trace!("channel transport pump finished");
        });
    }

    fn trigger(&self, data: String) {
        if self.tx.send(data).is_err() {
            tracing::trace!("channel peer detached, message dropped");
        }
    }
}
