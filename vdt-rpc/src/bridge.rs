//! Duplex event bus over a transport adapter
//!
//! A [`Bridge`] owns exactly one transport. Outbound events are wrapped in
//! an [`Envelope`] tagged with the bridge's [`Source`] and serialized;
//! inbound strings are decoded and dispatched to the subscribers of their
//! event, in registration order.
//!
//! Dispatch guarantees:
//! - Envelopes from our own source (echo) are dropped.
//! - Malformed envelopes and unknown event names are dropped.
//! - A subscriber that errors or panics is logged and skipped; the rest
//!   still run.
//! - Handlers run without any bridge lock held, so they may freely call
//!   back into the bridge.
//! - [`Bridge::remove_all_listeners`] bumps a generation counter; a
//!   dispatch already in progress stops at the next handler.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::{BridgeError, DecodeError};
use crate::event::{BridgeEvent, Source};
use crate::transport::Transport;

/// Subscriber callback
pub type Handler = Arc<dyn Fn(&Envelope) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`Bridge::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Connection status of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

struct Listener {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

#[derive(Default)]
struct Listeners {
    generation: u64,
    by_event: HashMap<BridgeEvent, Vec<Listener>>,
}

struct BridgeInner {
    source: Source,
    transport: Box<dyn Transport>,
    listeners: Mutex<Listeners>,
    next_listener: AtomicU64,
    status: RwLock<ConnectionStatus>,
}

/// The duplex event bus. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

/// Non-owning reference to a [`Bridge`], for use inside its own handlers
#[derive(Clone)]
pub struct WeakBridge {
    inner: Weak<BridgeInner>,
}

impl WeakBridge {
    pub fn upgrade(&self) -> Option<Bridge> {
        self.inner.upgrade().map(|inner| Bridge { inner })
    }
}

impl Bridge {
    /// Create a bridge and register its inbound path on `transport`.
    ///
    /// The bridge starts in [`ConnectionStatus::Connecting`]; connectivity
    /// is confirmed by the handshake, not by construction.
    pub fn new(source: Source, transport: impl Transport) -> Self {
        let inner = Arc::new(BridgeInner {
            source,
            transport: Box::new(transport),
            listeners: Mutex::new(Listeners::default()),
            next_listener: AtomicU64::new(0),
            status: RwLock::new(ConnectionStatus::Disconnected),
        });

        let weak = Arc::downgrade(&inner);
        inner.transport.tracker(Box::new(move |raw| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(&raw);
            }
        }));

        let bridge = Bridge { inner };
        bridge.transition(ConnectionStatus::Connecting, BridgeEvent::Ready);
        bridge
    }

    pub fn source(&self) -> Source {
        self.inner.source
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn downgrade(&self) -> WeakBridge {
        WeakBridge {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to `event`. Handlers fire in registration order.
    ///
    /// `ready` fires while the bridge is being built, so a subscriber to it
    /// that arrives later on a live bridge is called right away instead.
    pub fn on<F>(&self, event: BridgeEvent, handler: F) -> ListenerId
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(handler), false)
    }

    /// Subscribe to the next occurrence of `event` only
    pub fn once<F>(&self, event: BridgeEvent, handler: F) -> ListenerId
    where
        F: Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(event, Arc::new(handler), true)
    }

    /// Unsubscribe. Returns whether the listener was still registered.
    pub fn off(&self, event: BridgeEvent, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(list) = listeners.by_event.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        before != list.len()
    }

    /// Drop every subscriber of every event
    pub fn remove_all_listeners(&self) {
        let mut listeners = self.inner.listeners.lock();
        listeners.by_event.clear();
        listeners.generation += 1;
    }

    pub fn listener_count(&self, event: BridgeEvent) -> usize {
        self.inner
            .listeners
            .lock()
            .by_event
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Serialize `payload` and send `event` to the peer
    pub fn emit(&self, event: BridgeEvent, payload: Option<Value>) -> Result<(), BridgeError> {
        let envelope = Envelope::new(self.inner.source, event).with_payload(payload)?;
        self.send(envelope)
    }

    /// Send a prepared envelope
    pub fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        if self.status() == ConnectionStatus::Disconnected {
            return Err(BridgeError::Disconnected);
        }
        let raw = envelope.encode()?;
        tracing::trace!("[{}] -> {}", self.inner.source, envelope.event);
        self.inner.transport.trigger(raw);
        Ok(())
    }

    /// Called by the handshake once the peer is confirmed
    pub fn mark_connected(&self) {
        self.transition(ConnectionStatus::Connected, BridgeEvent::Connect);
    }

    /// Mark the bridge dead and fire `disconnect`. Sends fail afterwards.
    pub fn disconnect(&self) {
        self.transition(ConnectionStatus::Disconnected, BridgeEvent::Disconnect);
    }

    /// Disconnect, then drop every subscriber. Used on reload so pending
    /// calls are rejected before their listeners disappear.
    pub fn teardown(&self) {
        self.disconnect();
        self.remove_all_listeners();
    }

    fn transition(&self, status: ConnectionStatus, event: BridgeEvent) {
        {
            let mut current = self.inner.status.write();
            if *current == status {
                return;
            }
            *current = status;
        }
        tracing::debug!("[{}] bridge {:?}", self.inner.source, status);
        self.inner
            .dispatch(&Envelope::new(self.inner.source, event));
    }

    fn add_listener(&self, event: BridgeEvent, handler: Handler, once: bool) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        if event == BridgeEvent::Ready && self.status() != ConnectionStatus::Disconnected {
            self.inner
                .invoke(&handler, &Envelope::new(self.inner.source, BridgeEvent::Ready));
            if once {
                return id;
            }
        }
        self.inner
            .listeners
            .lock()
            .by_event
            .entry(event)
            .or_default()
            .push(Listener { id, once, handler });
        id
    }
}

impl BridgeInner {
    fn receive(&self, raw: &str) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(DecodeError::UnknownEvent(name)) => {
                tracing::trace!("[{}] ignoring unknown event `{}`", self.source, name);
                return;
            }
            Err(e) => {
                tracing::debug!("[{}] dropping message: {}", self.source, e);
                return;
            }
        };

        if envelope.source == self.source {
            tracing::trace!("[{}] dropping echo of {}", self.source, envelope.event);
            return;
        }

        tracing::trace!("[{}] <- {}", self.source, envelope.event);
        self.dispatch(&envelope);
    }

    fn dispatch(&self, envelope: &Envelope) {
        let (generation, handlers) = {
            let mut listeners = self.listeners.lock();
            let generation = listeners.generation;
            let Some(list) = listeners.by_event.get_mut(&envelope.event) else {
                return;
            };
            let handlers: Vec<Handler> = list.iter().map(|l| l.handler.clone()).collect();
            list.retain(|l| !l.once);
            (generation, handlers)
        };

        for handler in handlers {
            if self.listeners.lock().generation != generation {
                tracing::debug!(
                    "[{}] listeners reset during {} dispatch, stopping",
                    self.source,
                    envelope.event
                );
                break;
            }
            self.invoke(&handler, envelope);
        }
    }

    /// Run one handler, containing its error or panic
    fn invoke(&self, handler: &Handler, envelope: &Envelope) {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("[{}] {} handler failed: {:#}", self.source, envelope.event, e);
            }
            Err(_) => {
                tracing::error!("[{}] {} handler panicked", self.source, envelope.event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::ChannelTransport;

    fn pair() -> (Bridge, Bridge) {
        let (a, b) = ChannelTransport::pair();
        (Bridge::new(Source::App, a), Bridge::new(Source::Client, b))
    }

    /// Handler that forwards a label and the parsed payload
    fn record(
        tx: &mpsc::UnboundedSender<(&'static str, Value)>,
        label: &'static str,
    ) -> impl Fn(&Envelope) -> anyhow::Result<()> + Send + Sync + 'static {
        let tx = tx.clone();
        move |envelope| {
            let _ = tx.send((label, envelope.parse()?));
            Ok(())
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<(&'static str, Value)>) -> (&'static str, Value) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for dispatch")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_handlers_fire_in_registration_order() {
        let (app, client) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on(BridgeEvent::DevtoolsStateUpdated, record(&tx, "first"));
        client.on(BridgeEvent::DevtoolsStateUpdated, record(&tx, "second"));
        client.on(BridgeEvent::DevtoolsStateUpdated, record(&tx, "third"));

        let payload = json!({ "connected": true, "tabs": [1, 2, 3], "name": "ünïcode" });
        app.emit(BridgeEvent::DevtoolsStateUpdated, Some(payload.clone()))
            .unwrap();

        assert_eq!(next(&mut rx).await, ("first", payload.clone()));
        assert_eq!(next(&mut rx).await, ("second", payload.clone()));
        assert_eq!(next(&mut rx).await, ("third", payload));
    }

    #[tokio::test]
    async fn test_duplicate_registrations_not_deduplicated() {
        let (app, client) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(record(&tx, "dup"));
        let h1 = handler.clone();
        let h2 = handler.clone();
        client.on(BridgeEvent::AddTimelineEvent, move |e| h1(e));
        client.on(BridgeEvent::AddTimelineEvent, move |e| h2(e));
        assert_eq!(client.listener_count(BridgeEvent::AddTimelineEvent), 2);

        app.emit(BridgeEvent::AddTimelineEvent, Some(json!(1))).unwrap();
        assert_eq!(next(&mut rx).await, ("dup", json!(1)));
        assert_eq!(next(&mut rx).await, ("dup", json!(1)));
    }

    #[tokio::test]
    async fn test_off_and_once() {
        let (app, client) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let removed = client.on(BridgeEvent::RouterInfoUpdated, record(&tx, "removed"));
        client.once(BridgeEvent::RouterInfoUpdated, record(&tx, "once"));
        client.on(BridgeEvent::RouterInfoUpdated, record(&tx, "kept"));
        assert!(client.off(BridgeEvent::RouterInfoUpdated, removed));
        assert!(!client.off(BridgeEvent::RouterInfoUpdated, removed));

        app.emit(BridgeEvent::RouterInfoUpdated, Some(json!(1))).unwrap();
        app.emit(BridgeEvent::RouterInfoUpdated, Some(json!(2))).unwrap();

        assert_eq!(next(&mut rx).await, ("once", json!(1)));
        assert_eq!(next(&mut rx).await, ("kept", json!(1)));
        assert_eq!(next(&mut rx).await, ("kept", json!(2)));
    }

    #[tokio::test]
    async fn test_remove_all_listeners_silences_everything() {
        let (app, client) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on(BridgeEvent::DevtoolsStateUpdated, record(&tx, "stale"));
        client.on(BridgeEvent::AddTimelineEvent, record(&tx, "stale"));

        client.remove_all_listeners();
        assert_eq!(client.listener_count(BridgeEvent::DevtoolsStateUpdated), 0);
        client.on(BridgeEvent::AppConnected, record(&tx, "sentinel"));

        app.emit(BridgeEvent::DevtoolsStateUpdated, Some(json!(1))).unwrap();
        app.emit(BridgeEvent::AddTimelineEvent, Some(json!(2))).unwrap();
        app.emit(BridgeEvent::AppConnected, None).unwrap();

        // Sender order is preserved, so the sentinel arriving first proves
        // the earlier events reached no handler.
        assert_eq!(next(&mut rx).await, ("sentinel", Value::Null));
    }

    #[tokio::test]
    async fn test_reset_during_dispatch_stops_remaining_handlers() {
        let (app, client) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let weak = client.downgrade();
        let reset_tx = tx.clone();
        client.on(BridgeEvent::AddTimelineEvent, move |_| {
            let _ = reset_tx.send(("reset", Value::Null));
            if let Some(bridge) = weak.upgrade() {
                bridge.remove_all_listeners();
            }
            Ok(())
        });
        client.on(BridgeEvent::AddTimelineEvent, record(&tx, "after-reset"));

        app.emit(BridgeEvent::AddTimelineEvent, None).unwrap();

        // Dispatch is synchronous, so once "reset" arrives the whole pass
        // has finished.
        assert_eq!(next(&mut rx).await, ("reset", Value::Null));
        assert!(rx.try_recv().is_err());
        assert_eq!(client.listener_count(BridgeEvent::AddTimelineEvent), 0);
    }

    #[tokio::test]
    async fn test_failing_handlers_are_isolated() {
        let (app, client) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on(BridgeEvent::AddTimelineEvent, |_| anyhow::bail!("broken subscriber"));
        client.on(BridgeEvent::AddTimelineEvent, |_| panic!("panicking subscriber"));
        client.on(BridgeEvent::AddTimelineEvent, record(&tx, "healthy"));

        app.emit(BridgeEvent::AddTimelineEvent, Some(json!("e1"))).unwrap();
        app.emit(BridgeEvent::AddTimelineEvent, Some(json!("e2"))).unwrap();

        assert_eq!(next(&mut rx).await, ("healthy", json!("e1")));
        assert_eq!(next(&mut rx).await, ("healthy", json!("e2")));
    }

    #[tokio::test]
    async fn test_echo_unknown_and_malformed_are_dropped() {
        let (raw, peer) = ChannelTransport::pair();
        let client = Bridge::new(Source::Client, peer);
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on(BridgeEvent::AppConnected, record(&tx, "app-connected"));

        raw.trigger(r#"{"source":"client","event":"app-connected","payload":"1"}"#.to_string());
        raw.trigger(r#"{"source":"app","event":"not-a-real-event"}"#.to_string());
        raw.trigger("][ garbage".to_string());
        raw.trigger(r#"{"source":"app","event":"app-connected","payload":"{bad"}"#.to_string());
        raw.trigger(r#"{"source":"app","event":"connect"}"#.to_string());
        raw.trigger(r#"{"source":"app","event":"app-connected","payload":"2"}"#.to_string());

        assert_eq!(next(&mut rx).await, ("app-connected", json!(2)));
    }

    #[tokio::test]
    async fn test_lifecycle_events_and_status() {
        let (app, _client) = pair();
        assert_eq!(app.status(), ConnectionStatus::Connecting);

        let (tx, mut rx) = mpsc::unbounded_channel();
        app.on(BridgeEvent::Connect, record(&tx, "connect"));
        app.on(BridgeEvent::Disconnect, record(&tx, "disconnect"));

        app.mark_connected();
        app.mark_connected();
        assert!(app.is_connected());
        app.disconnect();
        assert_eq!(app.status(), ConnectionStatus::Disconnected);

        assert_eq!(next(&mut rx).await, ("connect", Value::Null));
        assert_eq!(next(&mut rx).await, ("disconnect", Value::Null));
        assert!(rx.try_recv().is_err());

        assert!(matches!(
            app.emit(BridgeEvent::AppConnected, None),
            Err(BridgeError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_ready_reaches_late_subscribers_once() {
        let (app, _client) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        app.on(BridgeEvent::Ready, record(&tx, "ready"));
        app.once(BridgeEvent::Ready, record(&tx, "ready-once"));
        assert_eq!(app.listener_count(BridgeEvent::Ready), 1);

        app.mark_connected();
        app.disconnect();
        app.on(BridgeEvent::Ready, record(&tx, "after-disconnect"));

        assert_eq!(next(&mut rx).await, ("ready", Value::Null));
        assert_eq!(next(&mut rx).await, ("ready-once", Value::Null));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_events_cannot_be_emitted() {
        let (app, _client) = pair();
        assert!(matches!(
            app.emit(BridgeEvent::Connect, None),
            Err(BridgeError::LocalEvent(BridgeEvent::Connect))
        ));
    }
}
