//! Panel-side mirror of the devtools state
//!
//! The mirror holds one immutable snapshot behind a `watch` channel. Every
//! update swaps in a whole new snapshot, so a reader never sees fields from
//! two different updates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use vdt_rpc::{BridgeEvent, ListenerId, RpcCore, RpcError};

use crate::types::DevToolsState;

#[derive(Clone)]
pub struct DevToolsStateMirror {
    tx: Arc<watch::Sender<Arc<DevToolsState>>>,
    /// Snapshots received as pushes, used to keep a slow initial fetch
    /// from overwriting a newer push
    pushes: Arc<AtomicU64>,
}

impl Default for DevToolsStateMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl DevToolsStateMirror {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(DevToolsState::default()));
        Self {
            tx: Arc::new(tx),
            pushes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe to `devtools-state:updated` on `rpc` and fetch the current
    /// snapshot once.
    ///
    /// Must run again for every new connection; subscriptions do not
    /// survive a reload.
    pub async fn init(&self, rpc: &RpcCore) -> Result<ListenerId, RpcError> {
        let mirror = self.clone();
        let listener = rpc
            .functions()
            .on(BridgeEvent::DevtoolsStateUpdated, move |envelope| {
                let state: DevToolsState = envelope.parse()?;
                mirror.pushes.fetch_add(1, Ordering::SeqCst);
                mirror.replace(state);
                Ok(())
            });

        let seen = self.pushes.load(Ordering::SeqCst);
        let state: DevToolsState = rpc.call(BridgeEvent::GetDevtoolsState, None).await?;
        if self.pushes.load(Ordering::SeqCst) == seen {
            self.replace(state);
        } else {
            tracing::debug!("State push arrived during initial fetch, keeping it");
        }
        Ok(listener)
    }

    /// Swap in a new snapshot
    pub fn replace(&self, state: DevToolsState) {
        self.tx.send_replace(Arc::new(state));
    }

    /// Back to the empty snapshot
    pub fn reset(&self) {
        self.replace(DevToolsState::default());
    }

    pub fn snapshot(&self) -> Arc<DevToolsState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DevToolsState>> {
        self.tx.subscribe()
    }

    /// Both the inspected app and the panel are attached
    pub fn connected(&self) -> bool {
        let state = self.tx.borrow();
        state.connected && state.client_connected
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;
    use vdt_rpc::transport::{ChannelTransport, Transport};
    use vdt_rpc::{Bridge, Envelope, Source};

    use super::*;

    fn state(version: &str, connected: bool) -> DevToolsState {
        DevToolsState {
            connected,
            client_connected: connected,
            vue_version: version.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_init_fetches_then_follows_pushes() {
        let (a, b) = ChannelTransport::pair();
        let app = RpcCore::new(Bridge::new(Source::App, a));
        app.handle(BridgeEvent::GetDevtoolsState, |_| {
            Ok(serde_json::to_value(state("3.4.0", false))?)
        });
        let panel = RpcCore::new(Bridge::new(Source::Client, b));

        let mirror = DevToolsStateMirror::new();
        let mut rx = mirror.subscribe();
        mirror.init(&panel).await.unwrap();
        assert_eq!(mirror.snapshot().vue_version, "3.4.0");
        assert!(!mirror.connected());

        app.notify(
            BridgeEvent::DevtoolsStateUpdated,
            Some(serde_json::to_value(state("3.4.1", true)).unwrap()),
        )
        .unwrap();
        rx.mark_unchanged();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().vue_version, "3.4.1");
        assert!(mirror.connected());

        mirror.reset();
        assert_eq!(*mirror.snapshot(), DevToolsState::default());
    }

    #[tokio::test]
    async fn test_push_during_fetch_wins() {
        let (raw, end) = ChannelTransport::pair();
        let panel = RpcCore::new(Bridge::new(Source::Client, end));
        let (tx, mut requests) = mpsc::unbounded_channel();
        raw.tracker(Box::new(move |data| {
            let _ = tx.send(data);
        }));

        let mirror = DevToolsStateMirror::new();
        let init = {
            let mirror = mirror.clone();
            let panel = panel.clone();
            tokio::spawn(async move { mirror.init(&panel).await })
        };

        let request = Envelope::decode(&requests.recv().await.unwrap()).unwrap();
        let push = Envelope::new(Source::App, BridgeEvent::DevtoolsStateUpdated)
            .with_payload(Some(serde_json::to_value(state("newer", true)).unwrap()))
            .unwrap();
        raw.trigger(push.encode().unwrap());
        let reply = Envelope::new(Source::App, BridgeEvent::RpcReply)
            .with_payload(Some(serde_json::to_value(state("older", false)).unwrap()))
            .unwrap()
            .with_correlation_id(request.correlation_id.unwrap());
        raw.trigger(reply.encode().unwrap());

        tokio::time::timeout(Duration::from_secs(1), init)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(mirror.snapshot().vue_version, "newer");
    }

    #[tokio::test]
    async fn test_malformed_push_keeps_snapshot() {
        let (a, b) = ChannelTransport::pair();
        let app = RpcCore::new(Bridge::new(Source::App, a));
        app.handle(BridgeEvent::GetDevtoolsState, |_| {
            Ok(serde_json::to_value(state("kept", true))?)
        });
        let panel = RpcCore::new(Bridge::new(Source::Client, b));
        let (tx, mut seen) = mpsc::unbounded_channel();
        panel.functions().on(BridgeEvent::AddTimelineEvent, move |_| {
            let _ = tx.send(());
            Ok(())
        });

        let mirror = DevToolsStateMirror::new();
        mirror.init(&panel).await.unwrap();
        let mut rx = mirror.subscribe();
        rx.mark_unchanged();

        app.notify(BridgeEvent::DevtoolsStateUpdated, Some(json!({ "connected": "yes" })))
            .unwrap();
        // Delivery is ordered, so this marker arrives after the bad push
        app.notify(BridgeEvent::AddTimelineEvent, None).unwrap();
        seen.recv().await.unwrap();

        assert_eq!(mirror.snapshot().vue_version, "kept");
        assert_eq!(mirror.pushes.load(Ordering::SeqCst), 0);
        assert!(!rx.has_changed().unwrap());

        app.notify(
            BridgeEvent::DevtoolsStateUpdated,
            Some(serde_json::to_value(state("next", true)).unwrap()),
        )
        .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().vue_version, "next");
        assert_eq!(mirror.pushes.load(Ordering::SeqCst), 1);
    }
}
