//! Devtools panel session
//!
//! The panel side of the app bridge: handshake, state mirror, typed api and
//! the notifications a UI consumes. Every connection gets fresh bridge, rpc
//! and handshake objects; [`PanelSession::reload`] throws the old ones away.

mod api;
mod state;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;
use tokio::sync::watch;
use vdt_rpc::transport::Transport;
use vdt_rpc::{Bridge, BridgeEvent, HandshakeClient, RpcCore, Source};

pub use api::PanelApi;
pub use state::DevToolsStateMirror;

use crate::config::SessionOptions;
use crate::error::SessionError;
use crate::server::BuildServerClient;
use crate::types::{
    CustomCommand, CustomInspector, CustomTab, DevToolsState, InspectorStatePayload,
    InspectorTreePayload, RouterInfo, TimelineEvent,
};

/// Updates for the panel UI
#[derive(Debug, Clone)]
pub enum PanelNotification {
    Connected,
    Disconnected,
    StateUpdated(Arc<DevToolsState>),
    InspectorTreeUpdated(InspectorTreePayload),
    InspectorStateUpdated(InspectorStatePayload),
    RouterInfoUpdated(RouterInfo),
    TimelineEvent(TimelineEvent),
    CustomTabsUpdated(Vec<CustomTab>),
    CustomCommandsUpdated(Vec<CustomCommand>),
    InspectorsUpdated(Vec<CustomInspector>),
    AssetsUpdated,
    ModuleUpdated(String),
}

/// Everything bound to one connection to the inspected app
pub struct PanelConnection {
    pub bridge: Bridge,
    pub rpc: RpcCore,
    pub handshake: HandshakeClient,
    pub api: PanelApi,
}

impl PanelConnection {
    fn new(transport: impl Transport, options: &SessionOptions) -> Self {
        let bridge = Bridge::new(Source::Client, transport);
        let rpc = RpcCore::with_timeout(bridge.clone(), options.rpc_timeout);
        let handshake = HandshakeClient::new(bridge.clone());
        Self {
            api: PanelApi::new(rpc.clone()),
            bridge,
            rpc,
            handshake,
        }
    }

    /// Drop every subscription, then the connection itself
    fn discard(&self) {
        self.bridge.remove_all_listeners();
        self.rpc.reject_all();
        self.bridge.disconnect();
    }
}

struct PanelInner {
    options: SessionOptions,
    connection: RwLock<Option<Arc<PanelConnection>>>,
    build_server: RwLock<Option<BuildServerClient>>,
    mirror: DevToolsStateMirror,
    notification_tx: Sender<PanelNotification>,
    notification_rx: Receiver<PanelNotification>,
}

#[derive(Clone)]
pub struct PanelSession {
    inner: Arc<PanelInner>,
}

impl PanelSession {
    pub fn new(options: SessionOptions) -> Self {
        let (notification_tx, notification_rx) = unbounded();
        Self {
            inner: Arc::new(PanelInner {
                options,
                connection: RwLock::new(None),
                build_server: RwLock::new(None),
                mirror: DevToolsStateMirror::new(),
                notification_tx,
                notification_rx,
            }),
        }
    }

    /// Receiver for UI updates
    pub fn notifications(&self) -> &Receiver<PanelNotification> {
        &self.inner.notification_rx
    }

    pub fn state(&self) -> Arc<DevToolsState> {
        self.inner.mirror.snapshot()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Arc<DevToolsState>> {
        self.inner.mirror.subscribe()
    }

    pub fn connection(&self) -> Option<Arc<PanelConnection>> {
        self.inner.connection.read().clone()
    }

    /// Api of the current connection
    pub fn api(&self) -> Result<PanelApi, SessionError> {
        self.connection()
            .map(|connection| connection.api.clone())
            .ok_or(SessionError::NotConnected)
    }

    pub fn build_server(&self) -> Option<BuildServerClient> {
        self.inner.build_server.read().clone()
    }

    /// Connect to the inspected app over `transport`.
    ///
    /// Runs the handshake, fetches the state snapshot and then announces
    /// the panel with `devtools:client-ready`. The connection only becomes
    /// current once all of that succeeded.
    pub async fn connect(&self, transport: impl Transport) -> Result<(), SessionError> {
        let connection = Arc::new(PanelConnection::new(transport, &self.inner.options));
        self.forward_pushes(&connection);

        let previous = self.inner.connection.write().take();
        if let Some(previous) = previous {
            tracing::debug!("Discarding previous app connection");
            previous.discard();
        }

        if let Err(e) = self.initialize(&connection).await {
            tracing::warn!("Connecting to inspected app failed: {}", e);
            connection.discard();
            self.inner.mirror.reset();
            return Err(e);
        }

        let previous = self.inner.connection.write().replace(connection);
        if let Some(previous) = previous {
            previous.discard();
        }
        tracing::info!("Connected to inspected app");
        self.notify(PanelNotification::Connected);
        Ok(())
    }

    async fn initialize(&self, connection: &PanelConnection) -> Result<(), SessionError> {
        connection.handshake.on_connect().await?;
        self.inner.mirror.init(&connection.rpc).await?;
        connection.rpc.notify(BridgeEvent::DevtoolsClientReady, None)?;
        Ok(())
    }

    /// Forget the current connection and connect again, as after a panel
    /// reload. Subscriptions made on the old connection never fire again.
    pub async fn reload(&self, transport: impl Transport) -> Result<(), SessionError> {
        let previous = self.inner.connection.write().take();
        if let Some(previous) = previous {
            previous.discard();
        }
        self.inner.mirror.reset();
        self.connect(transport).await
    }

    pub fn disconnect(&self) {
        let previous = self.inner.connection.write().take();
        if let Some(previous) = previous {
            previous.discard();
            self.notify(PanelNotification::Disconnected);
        }
        self.inner.mirror.reset();
    }

    /// Connect to the build-tool server at `url` and forward its pushes
    pub async fn attach_build_server(&self, url: &str) -> Result<BuildServerClient, SessionError> {
        let client = BuildServerClient::connect(url).await?;

        let tx = self.inner.notification_tx.clone();
        client.on_assets_updated(move || {
            let _ = tx.send(PanelNotification::AssetsUpdated);
        });
        let tx = self.inner.notification_tx.clone();
        client.on_module_updated(move |id| {
            let _ = tx.send(PanelNotification::ModuleUpdated(id));
        });

        let previous = self.inner.build_server.write().replace(client.clone());
        if let Some(previous) = previous {
            previous.disconnect();
        }
        Ok(client)
    }

    fn notify(&self, notification: PanelNotification) {
        let _ = self.inner.notification_tx.send(notification);
    }

    fn forward_pushes(&self, connection: &PanelConnection) {
        let api = &connection.api;

        let tx = self.inner.notification_tx.clone();
        api.on_devtools_state_updated(move |state| {
            let _ = tx.send(PanelNotification::StateUpdated(Arc::new(state)));
        });
        let tx = self.inner.notification_tx.clone();
        connection.rpc.functions().on(BridgeEvent::SendInspectorTree, move |envelope| {
            let _ = tx.send(PanelNotification::InspectorTreeUpdated(envelope.parse()?));
            Ok(())
        });
        let tx = self.inner.notification_tx.clone();
        connection.rpc.functions().on(BridgeEvent::SendInspectorState, move |envelope| {
            let _ = tx.send(PanelNotification::InspectorStateUpdated(envelope.parse()?));
            Ok(())
        });
        let tx = self.inner.notification_tx.clone();
        api.on_router_info_updated(move |info| {
            let _ = tx.send(PanelNotification::RouterInfoUpdated(info));
        });
        let tx = self.inner.notification_tx.clone();
        api.on_timeline_event(move |event| {
            let _ = tx.send(PanelNotification::TimelineEvent(event));
        });
        let tx = self.inner.notification_tx.clone();
        api.on_custom_tabs_updated(move |tabs| {
            let _ = tx.send(PanelNotification::CustomTabsUpdated(tabs));
        });
        let tx = self.inner.notification_tx.clone();
        api.on_custom_commands_updated(move |commands| {
            let _ = tx.send(PanelNotification::CustomCommandsUpdated(commands));
        });

        let tx = self.inner.notification_tx.clone();
        api.on_inspectors_updated(move |inspectors| {
            let _ = tx.send(PanelNotification::InspectorsUpdated(inspectors));
        });

        let tx = self.inner.notification_tx.clone();
        connection.bridge.on(BridgeEvent::Disconnect, move |_| {
            let _ = tx.send(PanelNotification::Disconnected);
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use vdt_rpc::HandshakeServer;
    use vdt_rpc::transport::{APP_TAG, BroadcastHub, CLIENT_TAG, ChannelTransport};

    use super::*;
    use crate::host::HostSession;

    /// Minimal app side that counts snapshot fetches
    struct FakeHost {
        rpc: RpcCore,
        handshake: HandshakeServer,
        fetches: Arc<AtomicUsize>,
    }

    impl FakeHost {
        fn new(transport: ChannelTransport, version: &'static str) -> Self {
            let bridge = Bridge::new(Source::App, transport);
            let rpc = RpcCore::new(bridge.clone());
            let fetches = Arc::new(AtomicUsize::new(0));
            let counter = fetches.clone();
            rpc.handle(BridgeEvent::GetDevtoolsState, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "connected": true, "vueVersion": version }))
            });
            Self {
                handshake: HandshakeServer::new(bridge),
                rpc,
                fetches,
            }
        }

        fn push(&self, version: &str) {
            self.rpc
                .notify(
                    BridgeEvent::DevtoolsStateUpdated,
                    Some(json!({ "connected": true, "clientConnected": true, "vueVersion": version })),
                )
                .unwrap();
        }
    }

    async fn connect(panel: &PanelSession, reload: bool) -> FakeHost {
        let (app_end, panel_end) = ChannelTransport::pair();
        let host = FakeHost::new(app_end, if reload { "second" } else { "first" });
        let attach = async {
            if reload {
                panel.reload(panel_end).await
            } else {
                panel.connect(panel_end).await
            }
        };
        let (panel_result, host_result) = tokio::join!(attach, host.handshake.on_connect());
        panel_result.unwrap();
        host_result.unwrap();
        host
    }

    async fn next_version(rx: &mut watch::Receiver<Arc<DevToolsState>>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        rx.borrow_and_update().vue_version.clone()
    }

    #[tokio::test]
    async fn test_reload_refetches_once_without_stale_subscribers() {
        let panel = PanelSession::new(SessionOptions::default());
        let first = connect(&panel, false).await;
        assert_eq!(panel.state().vue_version, "first");
        let old_bridge = panel.connection().unwrap().bridge.clone();

        let second = connect(&panel, true).await;
        assert_eq!(second.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(first.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(panel.state().vue_version, "second");
        assert_eq!(old_bridge.listener_count(BridgeEvent::DevtoolsStateUpdated), 0);

        let mut rx = panel.subscribe_state();
        rx.mark_unchanged();
        // The old app keeps talking; nothing on the panel may react
        first.push("stale");
        second.push("fresh-1");
        assert_eq!(next_version(&mut rx).await, "fresh-1");
        second.push("fresh-2");
        assert_eq!(next_version(&mut rx).await, "fresh-2");
        assert_eq!(second.fetches.load(Ordering::SeqCst), 1);

        let stale = panel
            .notifications()
            .try_iter()
            .filter_map(|n| match n {
                PanelNotification::StateUpdated(state) => Some(state.vue_version.clone()),
                _ => None,
            })
            .any(|version| version == "stale");
        assert!(!stale);
    }

    #[tokio::test]
    async fn test_session_over_frame_transport() {
        let hub = BroadcastHub::default();
        let host = HostSession::new(SessionOptions::default()).with_vue_version("3.5.0");
        let panel = PanelSession::new(SessionOptions::default());

        let (host_result, panel_result) = tokio::join!(
            host.connect(hub.frame(APP_TAG, CLIENT_TAG)),
            panel.connect(hub.frame(CLIENT_TAG, APP_TAG))
        );
        host_result.unwrap();
        panel_result.unwrap();

        let api = panel.api().unwrap();
        assert_eq!(api.get_devtools_state().await.unwrap().vue_version, "3.5.0");
        assert!(api.get_inspectors().await.unwrap().is_empty());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        api.on_inspectors_updated(move |inspectors| {
            let _ = tx.send(inspectors);
        });
        host.add_inspector(CustomInspector {
            id: "pinia".to_string(),
            label: "Pinia".to_string(),
            icon: None,
        });
        let inspectors = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inspectors[0].id, "pinia");
        assert!(
            panel
                .notifications()
                .try_iter()
                .any(|n| matches!(n, PanelNotification::InspectorsUpdated(_)))
        );
    }

    #[tokio::test]
    async fn test_failed_init_leaves_no_connection() {
        let panel = PanelSession::new(SessionOptions::default());
        let (app_end, panel_end) = ChannelTransport::pair();
        let bridge = Bridge::new(Source::App, app_end);
        let rpc = RpcCore::new(bridge.clone());
        rpc.handle(BridgeEvent::GetDevtoolsState, |_| anyhow::bail!("state unavailable"));
        let handshake = HandshakeServer::new(bridge);

        let (panel_result, host_result) =
            tokio::join!(panel.connect(panel_end), handshake.on_connect());
        host_result.unwrap();
        assert!(matches!(panel_result, Err(SessionError::Rpc(_))));

        assert!(panel.connection().is_none());
        assert!(matches!(panel.api(), Err(SessionError::NotConnected)));
        assert_eq!(*panel.state(), DevToolsState::default());
        assert!(
            !panel
                .notifications()
                .try_iter()
                .any(|n| matches!(n, PanelNotification::Connected | PanelNotification::Disconnected))
        );
    }

    #[tokio::test]
    async fn test_end_to_end_with_host() {
        let host = HostSession::new(SessionOptions::default()).with_vue_version("3.4.0");
        let panel = PanelSession::new(SessionOptions::default());
        let (app_end, panel_end) = ChannelTransport::pair();

        let (host_result, panel_result) =
            tokio::join!(host.connect(app_end), panel.connect(panel_end));
        host_result.unwrap();
        panel_result.unwrap();

        let mut rx = panel.subscribe_state();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !rx.borrow_and_update().client_connected {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(host.state().client_connected);
        assert_eq!(panel.state().vue_version, "3.4.0");

        let api = panel.api().unwrap();
        let router = api.get_router_info().await.unwrap();
        assert!(router.routes.is_empty());

        let notes: Vec<_> = panel.notifications().try_iter().collect();
        assert!(notes.iter().any(|n| matches!(n, PanelNotification::Connected)));
        assert!(notes.iter().any(|n| matches!(n, PanelNotification::StateUpdated(_))));

        panel.disconnect();
        assert!(matches!(panel.api(), Err(SessionError::NotConnected)));
        assert_eq!(*panel.state(), DevToolsState::default());
    }
}
