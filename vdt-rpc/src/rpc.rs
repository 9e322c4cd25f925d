//! Correlated request/response on top of a [`Bridge`]
//!
//! A request is an envelope carrying a `correlationId`; its answer comes
//! back on the event's reply kind with the same id. Envelopes without an id
//! are one-way notifications.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::IntoEnumIterator;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::bridge::{Bridge, ListenerId};
use crate::envelope::{CorrelationId, Envelope};
use crate::error::RpcError;
use crate::event::BridgeEvent;

/// Default window before an unanswered call fails
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type ReplySender = oneshot::Sender<Result<Option<String>, RpcError>>;

struct PendingCall {
    event: BridgeEvent,
    reply: ReplySender,
}

type PendingMap = Arc<Mutex<HashMap<CorrelationId, PendingCall>>>;

/// Removes the pending entry when the call future finishes or is dropped
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<CorrelationId, PendingCall>>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

#[derive(Clone)]
pub struct RpcCore {
    bridge: Bridge,
    pending: PendingMap,
    timeout: Duration,
}

impl RpcCore {
    pub fn new(bridge: Bridge) -> Self {
        Self::with_timeout(bridge, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(bridge: Bridge, timeout: Duration) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        for event in BridgeEvent::iter().filter(BridgeEvent::is_reply) {
            let pending = pending.clone();
            bridge.on(event, move |envelope| {
                resolve(&pending, envelope);
                Ok(())
            });
        }

        let on_disconnect = pending.clone();
        bridge.on(BridgeEvent::Disconnect, move |_| {
            reject_pending(&on_disconnect);
            Ok(())
        });

        Self {
            bridge,
            pending,
            timeout,
        }
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `event` as a request and wait for the correlated reply
    pub async fn call<R: DeserializeOwned>(
        &self,
        event: BridgeEvent,
        payload: Option<Value>,
    ) -> Result<R, RpcError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .insert(id.clone(), PendingCall { event, reply: tx });
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        let envelope = Envelope::new(self.bridge.source(), event)
            .with_payload(payload)?
            .with_correlation_id(id.clone());
        self.bridge.send(envelope)?;

        let payload = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(RpcError::Disconnected(event)),
            Err(_) => {
                tracing::warn!("Request {} ({}) timed out", id, event);
                return Err(RpcError::Timeout {
                    event,
                    after: self.timeout,
                });
            }
        };

        let value = match payload {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::from_value(Value::Null)?,
        };
        Ok(value)
    }

    /// Fire-and-forget
    pub fn notify(&self, event: BridgeEvent, payload: Option<Value>) -> Result<(), RpcError> {
        self.bridge.emit(event, payload)?;
        Ok(())
    }

    /// Subscriptions to one-way push events
    pub fn functions(&self) -> Functions<'_> {
        Functions {
            bridge: &self.bridge,
        }
    }

    /// Answer requests for `event` with `responder`.
    ///
    /// Notifications (no correlation id) still run the responder but get no
    /// reply. A responder error is sent back as the reply's `error`.
    pub fn handle<F>(&self, event: BridgeEvent, responder: F) -> ListenerId
    where
        F: Fn(&Envelope) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let weak = self.bridge.downgrade();
        self.bridge.on(event, move |request| {
            let result = responder(request);
            let Some(id) = request.correlation_id.clone() else {
                return result.map(|_| ());
            };
            let Some(bridge) = weak.upgrade() else {
                return Ok(());
            };
            bridge.send(reply_envelope(&bridge, event, id, result)?)?;
            Ok(())
        })
    }

    /// Like [`RpcCore::handle`] for responders that need to await.
    /// Each request runs on its own task.
    pub fn handle_async<F, Fut>(&self, event: BridgeEvent, responder: F) -> ListenerId
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let weak = self.bridge.downgrade();
        self.bridge.on(event, move |request| {
            let id = request.correlation_id.clone();
            let fut = responder(request.clone());
            let weak = weak.clone();
            tokio::spawn(async move {
                let result = fut.await;
                let (Some(id), Some(bridge)) = (id, weak.upgrade()) else {
                    if let Err(e) = result {
                        tracing::warn!("{} notification handler failed: {:#}", event, e);
                    }
                    return;
                };
                let sent = reply_envelope(&bridge, event, id, result)
                    .map_err(anyhow::Error::from)
                    .and_then(|reply| Ok(bridge.send(reply)?));
                if let Err(e) = sent {
                    tracing::debug!("Failed to reply to {}: {:#}", event, e);
                }
            });
            Ok(())
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fail every pending call with [`RpcError::Disconnected`]
    pub fn reject_all(&self) {
        reject_pending(&self.pending);
    }
}

/// Handle for registering push subscriptions
pub struct Functions<'a> {
    bridge: &'a Bridge,
}

impl Functions<'_> {
    /// Subscribe to uncorrelated envelopes of `event`
    pub fn on<F>(&self, event: BridgeEvent, handler: F) -> ListenerId
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bridge.on(event, move |envelope| {
            if envelope.correlation_id.is_some() {
                return Ok(());
            }
            handler(envelope)
        })
    }

    pub fn off(&self, event: BridgeEvent, id: ListenerId) -> bool {
        self.bridge.off(event, id)
    }
}

fn reply_envelope(
    bridge: &Bridge,
    event: BridgeEvent,
    id: CorrelationId,
    result: anyhow::Result<Value>,
) -> Result<Envelope, crate::error::BridgeError> {
    let reply = Envelope::new(bridge.source(), event.reply_event()).with_correlation_id(id);
    match result {
        Ok(value) => reply.with_payload(Some(value)),
        Err(e) => {
            tracing::warn!("Responder for {} failed: {:#}", event, e);
            Ok(reply.with_error(format!("{e:#}")))
        }
    }
}

fn resolve(pending: &Mutex<HashMap<CorrelationId, PendingCall>>, envelope: &Envelope) {
    let Some(id) = &envelope.correlation_id else {
        return;
    };
    let Some(call) = pending.lock().remove(id) else {
        tracing::debug!("Reply {} for unknown or expired request", id);
        return;
    };
    tracing::trace!("Resolved {} ({})", id, call.event);
    let result = match &envelope.error {
        Some(error) => Err(RpcError::Remote(error.clone())),
        None => Ok(envelope.payload.clone()),
    };
    let _ = call.reply.send(result);
}

fn reject_pending(pending: &Mutex<HashMap<CorrelationId, PendingCall>>) {
    let drained: Vec<PendingCall> = pending.lock().drain().map(|(_, call)| call).collect();
    for call in drained {
        let _ = call.reply.send(Err(RpcError::Disconnected(call.event)));
    }
}
