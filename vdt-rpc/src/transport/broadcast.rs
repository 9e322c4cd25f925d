//! Source-tagged broadcast transport
//!
//! Every participant of a [`BroadcastHub`] sees every message. Messages
//! carry the sender's tag so receivers can drop their own echo
//! (broadcast mode) or accept only their peer (frame mode, the
//! cross-frame post-message shape where origins are not checked).

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;

use super::{Deliver, Transport};

/// Tag used by the inspected application side
pub const APP_TAG: &str = "__VUE_DEVTOOLS_USER_APP__";
/// Tag used by the devtools panel side
pub const CLIENT_TAG: &str = "__VUE_DEVTOOLS_CLIENT__";

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Tagged {
    source: String,
    data: String,
}

#[derive(Debug, Clone)]
enum Accept {
    /// Everything except our own messages
    NotSelf,
    /// Only messages from this tag
    Only(String),
}

/// Shared medium for broadcast transports
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Tagged>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastHub {
    /// Create a hub. Receivers that fall more than `capacity` messages
    /// behind lose the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// A participant that receives everything but its own echo
    pub fn broadcast(&self, tag: impl Into<String>) -> BroadcastTransport {
        self.transport(tag.into(), Accept::NotSelf)
    }

    /// A participant that receives only messages tagged `peer_tag`
    pub fn frame(&self, tag: impl Into<String>, peer_tag: impl Into<String>) -> BroadcastTransport {
        self.transport(tag.into(), Accept::Only(peer_tag.into()))
    }

    fn transport(&self, tag: String, accept: Accept) -> BroadcastTransport {
        let (stop_tx, stop_rx) = oneshot::channel();
        BroadcastTransport {
            tx: self.tx.clone(),
            // Subscribe now so nothing sent before `tracker` is missed
            inbound: Mutex::new(Some((self.tx.subscribe(), stop_rx))),
            tag,
            accept,
            _stop: stop_tx,
        }
    }
}

/// One participant of a [`BroadcastHub`]
pub struct BroadcastTransport {
    tx: broadcast::Sender<Tagged>,
    inbound: Mutex<Option<(broadcast::Receiver<Tagged>, oneshot::Receiver<()>)>>,
    tag: String,
    accept: Accept,
    _stop: oneshot::Sender<()>,
}

impl BroadcastTransport {
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Transport for BroadcastTransport {
    fn tracker(&self, deliver: Deliver) {
        let Some((mut rx, mut stop)) = self.inbound.lock().take() else {
            tracing::warn!("broadcast transport {} already has a tracker, ignoring", self.tag);
            return;
        };
        let tag = self.tag.clone();
        let accept = self.accept.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Ok(msg) => {
                            let accepted = match &accept {
                                Accept::NotSelf => msg.source != tag,
                                Accept::Only(peer) => &msg.source == peer,
                            };
                            if accepted {
                                deliver(msg.data);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("{tag} lagged behind, {skipped} messages lost");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut stop => break,
                }
            }
            tracing::trace!("broadcast transport {tag} pump finished");
        });
    }

    fn trigger(&self, data: String) {
        let msg = Tagged {
            source: self.tag.clone(),
            data,
        };
        if self.tx.send(msg).is_err() {
            tracing::trace!("no broadcast receivers, message dropped");
        }
    }
}
