//! App-side devtools session
//!
//! A [`HostSession`] lives in the inspected page. It owns the app records,
//! the devtools context and, while a panel is attached, one
//! [`HostConnection`] (bridge, rpc and handshake for that panel). Reloading
//! the panel replaces the connection; nothing from the previous one
//! survives.

mod app_record;
mod context;

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use vdt_rpc::transport::Transport;
use vdt_rpc::{Bridge, BridgeEvent, HandshakeServer, RpcCore, Source};

pub use app_record::{AppRecord, AppRegistry, InspectedApp};
pub use context::DevToolsContext;

use crate::config::SessionOptions;
use crate::error::SessionError;
use crate::types::{
    ComponentInspectorToggle, ComponentInstanceQuery, ComponentSelection, CustomInspector,
    DevToolsState, InspectorStatePayload, InspectorStateQuery, InspectorTreePayload,
    InspectorTreeQuery, OpenInEditorOptions, RouteLocation, RouterInfo, StateEditPayload,
    TimelineEvent, TimelineLayer,
};

/// Requests the host answers for the panel without waiting on the page
const RESPONDERS: [BridgeEvent; 18] = [
    BridgeEvent::GetDevtoolsState,
    BridgeEvent::GetInspectorTree,
    BridgeEvent::GetInspectorState,
    BridgeEvent::EditState,
    BridgeEvent::GetInspectors,
    BridgeEvent::GetRouterInfo,
    BridgeEvent::Navigate,
    BridgeEvent::GetMatchedRoutes,
    BridgeEvent::GetTimelineLayers,
    BridgeEvent::ToggleApp,
    BridgeEvent::UpdateInspectorTreeId,
    BridgeEvent::ToggleComponentInspector,
    BridgeEvent::ScrollToComponent,
    BridgeEvent::GetComponentBoundingRect,
    BridgeEvent::UnhighlightElement,
    BridgeEvent::OpenInEditor,
    BridgeEvent::IsVueInspectorDetected,
    BridgeEvent::EnableVueInspector,
];

/// Everything bound to one attached panel
pub struct HostConnection {
    pub bridge: Bridge,
    pub rpc: RpcCore,
    pub handshake: HandshakeServer,
}

impl HostConnection {
    fn new(transport: impl Transport, options: &SessionOptions) -> Self {
        let bridge = Bridge::new(Source::App, transport);
        let rpc = RpcCore::with_timeout(bridge.clone(), options.rpc_timeout);
        let handshake =
            HandshakeServer::new(bridge.clone()).with_retry(options.handshake_retry);
        Self {
            bridge,
            rpc,
            handshake,
        }
    }
}

#[derive(Debug, Default)]
struct HostFlags {
    connected: bool,
    client_connected: bool,
    vue_version: String,
    vite_plugin_detected: bool,
}

struct HostInner {
    options: SessionOptions,
    apps: RwLock<AppRegistry>,
    context: Mutex<DevToolsContext>,
    flags: Mutex<HostFlags>,
    connection: RwLock<Option<Arc<HostConnection>>>,
    /// Panel request waiting for the user to pick a component
    picker: Mutex<Option<oneshot::Sender<String>>>,
}

#[derive(Clone)]
pub struct HostSession {
    inner: Arc<HostInner>,
}

impl HostSession {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(HostInner {
                options,
                apps: RwLock::new(AppRegistry::default()),
                context: Mutex::new(DevToolsContext::default()),
                flags: Mutex::new(HostFlags::default()),
                connection: RwLock::new(None),
                picker: Mutex::new(None),
            }),
        }
    }

    pub fn with_vue_version(self, version: impl Into<String>) -> Self {
        self.inner.flags.lock().vue_version = version.into();
        self
    }

    pub fn set_vite_plugin_detected(&self, detected: bool) {
        self.inner.flags.lock().vite_plugin_detected = detected;
        self.push_state();
    }

    fn downgrade(&self) -> Weak<HostInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<HostInner>) -> anyhow::Result<Self> {
        let inner = weak
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("host session was dropped"))?;
        Ok(Self { inner })
    }

    /// Add an inspected app. The first one registered becomes active and
    /// registers its plugins.
    pub fn register_app(&self, record: AppRecord) {
        let becomes_active = {
            let mut apps = self.inner.apps.write();
            apps.register(record);
            apps.len() == 1
        };
        if becomes_active {
            self.setup_active_app(false);
        } else {
            self.push_state();
        }
    }

    pub fn unregister_app(&self, id: &str) {
        let (removed, active_changed) = {
            let mut apps = self.inner.apps.write();
            let was_active = apps.active_id() == Some(id);
            (apps.unregister(id), was_active)
        };
        if removed.is_none() {
            return;
        }
        if active_changed {
            self.setup_active_app(true);
        } else {
            self.push_state();
        }
    }

    /// Scope subsequent commands to app record `id`.
    ///
    /// The devtools context belonged to the previously active app. It is
    /// reset and the new app's plugins register on the fresh one.
    pub fn toggle_app(&self, id: &str) -> anyhow::Result<()> {
        self.inner.apps.write().toggle(id)?;
        self.cancel_component_pick();
        self.setup_active_app(true);
        tracing::info!("Active app record is now {}", id);
        Ok(())
    }

    /// Add or replace a custom inspector and tell the panel
    pub fn add_inspector(&self, inspector: CustomInspector) {
        self.with_context(|c| c.add_inspector(inspector));
        self.push_inspectors();
    }

    /// Add or replace a timeline layer. The panel picks it up with its
    /// next layer request.
    pub fn add_timeline_layer(&self, layer: TimelineLayer) {
        self.with_context(|c| c.add_timeline_layer(layer));
    }

    /// Report the component the user picked in the page.
    ///
    /// Answers the panel's pending pick request and hides the picker.
    /// Returns false when no pick was pending.
    pub fn component_selected(&self, id: &str) -> bool {
        let Some(pending) = self.inner.picker.lock().take() else {
            tracing::debug!("Component {} selected with no pick pending", id);
            return false;
        };
        if let Ok(record) = self.active_record() {
            if let Err(e) = record.app.toggle_component_inspector(false) {
                tracing::debug!("Failed to hide component picker: {:#}", e);
            }
        }
        pending.send(id.to_string()).is_ok()
    }

    pub fn active_app(&self) -> Option<AppRecord> {
        self.inner.apps.read().active().cloned()
    }

    /// Run `f` against the devtools context
    pub fn with_context<R>(&self, f: impl FnOnce(&mut DevToolsContext) -> R) -> R {
        f(&mut self.inner.context.lock())
    }

    pub fn state(&self) -> DevToolsState {
        let flags = self.inner.flags.lock();
        let apps = self.inner.apps.read();
        let context = self.inner.context.lock();
        DevToolsState {
            connected: flags.connected,
            client_connected: flags.client_connected,
            vue_version: flags.vue_version.clone(),
            tabs: context.tabs().to_vec(),
            commands: context.commands().to_vec(),
            vite_plugin_detected: flags.vite_plugin_detected,
            app_records: apps.infos(),
            active_app_record_id: apps.active_id().unwrap_or_default().to_string(),
        }
    }

    pub fn connection(&self) -> Option<Arc<HostConnection>> {
        self.inner.connection.read().clone()
    }

    /// Attach a panel over `transport` and run the handshake.
    ///
    /// Any previous connection is torn down first.
    pub async fn connect(&self, transport: impl Transport) -> Result<(), SessionError> {
        let connection = Arc::new(HostConnection::new(transport, &self.inner.options));
        self.register_responders(&connection.rpc);

        let previous = self.inner.connection.write().replace(connection.clone());
        if let Some(previous) = previous {
            tracing::debug!("Discarding previous panel connection");
            previous.bridge.teardown();
        }
        {
            let mut flags = self.inner.flags.lock();
            flags.connected = false;
            flags.client_connected = false;
        }

        connection.handshake.on_connect().await?;

        self.inner.flags.lock().connected = true;
        connection.bridge.emit(BridgeEvent::AppConnected, None)?;
        tracing::info!("Devtools panel attached");
        self.push_state();
        Ok(())
    }

    /// Drop the current connection and attach again over `transport`
    pub async fn reconnect(&self, transport: impl Transport) -> Result<(), SessionError> {
        self.disconnect();
        self.connect(transport).await
    }

    pub fn disconnect(&self) {
        let previous = self.inner.connection.write().take();
        if let Some(previous) = previous {
            previous.bridge.teardown();
        }
        self.cancel_component_pick();
        let mut flags = self.inner.flags.lock();
        flags.connected = false;
        flags.client_connected = false;
    }

    /// Inbound callback for the framework integration.
    ///
    /// Queries and commands are answered like panel requests; push events
    /// are forwarded to the panel. Names outside the vocabulary are ignored.
    pub fn dispatch(&self, name: &str, payload: Option<Value>) -> anyhow::Result<Option<Value>> {
        let Some(event) = BridgeEvent::from_wire(name) else {
            tracing::trace!("Ignoring unknown event `{}` from integration", name);
            return Ok(None);
        };
        let payload = payload.unwrap_or(Value::Null);

        match event {
            BridgeEvent::GetDevtoolsState
            | BridgeEvent::GetInspectorTree
            | BridgeEvent::GetInspectorState
            | BridgeEvent::EditState
            | BridgeEvent::GetRouterInfo
            | BridgeEvent::Navigate
            | BridgeEvent::GetMatchedRoutes
            | BridgeEvent::GetTimelineLayers
            | BridgeEvent::ToggleApp
            | BridgeEvent::UpdateInspectorTreeId
            | BridgeEvent::GetInspectors
            | BridgeEvent::ToggleComponentInspector
            | BridgeEvent::ScrollToComponent
            | BridgeEvent::GetComponentBoundingRect
            | BridgeEvent::UnhighlightElement
            | BridgeEvent::OpenInEditor
            | BridgeEvent::IsVueInspectorDetected
            | BridgeEvent::EnableVueInspector => self.respond(event, payload).map(Some),

            // From the integration this reports the picked component
            BridgeEvent::InspectComponentInspector => {
                let selection: ComponentSelection = serde_json::from_value(payload)?;
                self.component_selected(&selection.id);
                Ok(None)
            }
            BridgeEvent::InspectorsUpdated => {
                if !payload.is_null() {
                    let inspectors: Vec<CustomInspector> = serde_json::from_value(payload)?;
                    self.with_context(|c| inspectors.into_iter().for_each(|i| c.add_inspector(i)));
                }
                self.push_inspectors();
                Ok(None)
            }

            BridgeEvent::DevtoolsStateUpdated => {
                self.push_state();
                Ok(None)
            }
            BridgeEvent::SendInspectorTree => {
                self.push_inspector_tree(&serde_json::from_value(payload)?)?;
                Ok(None)
            }
            BridgeEvent::SendInspectorState => {
                self.push_inspector_state(&serde_json::from_value(payload)?)?;
                Ok(None)
            }
            BridgeEvent::RouterInfoUpdated => {
                if payload.is_null() {
                    self.refresh_router_info();
                } else {
                    let info: RouterInfo = serde_json::from_value(payload)?;
                    self.with_context(|c| c.set_router_info(info));
                }
                self.push_router_info();
                Ok(None)
            }
            BridgeEvent::AddTimelineEvent => {
                self.push_timeline_event(&serde_json::from_value(payload)?);
                Ok(None)
            }
            BridgeEvent::CustomTabsUpdated => {
                let tabs = serde_json::from_value(payload)?;
                self.with_context(|c| c.set_tabs(tabs));
                self.push_custom_tabs();
                Ok(None)
            }
            BridgeEvent::CustomCommandsUpdated => {
                let commands = serde_json::from_value(payload)?;
                self.with_context(|c| c.set_commands(commands));
                self.push_custom_commands();
                Ok(None)
            }

            BridgeEvent::Ready
            | BridgeEvent::Connect
            | BridgeEvent::Disconnect
            | BridgeEvent::ClientCreate
            | BridgeEvent::ClientReady
            | BridgeEvent::AppConnected
            | BridgeEvent::DevtoolsClientReady
            | BridgeEvent::RpcReply
            | BridgeEvent::ServerRoot
            | BridgeEvent::ServerStaticAssets
            | BridgeEvent::ServerImageMeta
            | BridgeEvent::ServerTextAssetContent
            | BridgeEvent::ServerGraph
            | BridgeEvent::ServerAssetsUpdated
            | BridgeEvent::ServerModuleUpdated => {
                tracing::debug!("{} is not an integration event, ignoring", event);
                Ok(None)
            }
        }
    }

    /// Broadcast the current state snapshot
    pub fn push_state(&self) {
        match serde_json::to_value(self.state()) {
            Ok(state) => self.push(BridgeEvent::DevtoolsStateUpdated, state),
            Err(e) => tracing::error!("Failed to serialize devtools state: {}", e),
        }
    }

    pub fn push_inspector_tree(&self, query: &InspectorTreeQuery) -> anyhow::Result<()> {
        let tree = self.inspector_tree(query)?;
        self.push(BridgeEvent::SendInspectorTree, serde_json::to_value(tree)?);
        Ok(())
    }

    pub fn push_inspector_state(&self, query: &InspectorStateQuery) -> anyhow::Result<()> {
        let state = self.inspector_state(query)?;
        self.push(BridgeEvent::SendInspectorState, serde_json::to_value(state)?);
        Ok(())
    }

    pub fn push_router_info(&self) {
        let info = self.with_context(|c| c.router_info().clone());
        self.push_serialized(BridgeEvent::RouterInfoUpdated, &info);
    }

    pub fn push_timeline_event(&self, event: &TimelineEvent) {
        self.push_serialized(BridgeEvent::AddTimelineEvent, event);
    }

    pub fn push_custom_tabs(&self) {
        let tabs = self.with_context(|c| c.tabs().to_vec());
        self.push_serialized(BridgeEvent::CustomTabsUpdated, &tabs);
        self.push_state();
    }

    pub fn push_custom_commands(&self) {
        let commands = self.with_context(|c| c.commands().to_vec());
        self.push_serialized(BridgeEvent::CustomCommandsUpdated, &commands);
        self.push_state();
    }

    /// Broadcast the custom inspector list
    pub fn push_inspectors(&self) {
        let inspectors = self.with_context(|c| c.inspectors().to_vec());
        self.push_serialized(BridgeEvent::InspectorsUpdated, &inspectors);
    }

    fn push_serialized<T: serde::Serialize>(&self, event: BridgeEvent, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.push(event, value),
            Err(e) => tracing::error!("Failed to serialize {} payload: {}", event, e),
        }
    }

    fn push(&self, event: BridgeEvent, payload: Value) {
        let Some(connection) = self.connection() else {
            tracing::trace!("No panel attached, dropping {}", event);
            return;
        };
        if let Err(e) = connection.rpc.notify(event, Some(payload)) {
            tracing::debug!("Failed to push {}: {}", event, e);
        }
    }

    fn register_responders(&self, rpc: &RpcCore) {
        for event in RESPONDERS {
            let weak = self.downgrade();
            rpc.handle(event, move |request| {
                Self::upgrade(&weak)?.respond(event, request.parse()?)
            });
        }

        let weak = self.downgrade();
        rpc.handle_async(BridgeEvent::InspectComponentInspector, move |_| {
            let picked = Self::upgrade(&weak).and_then(|session| session.start_component_pick());
            async move {
                let id = picked?
                    .await
                    .map_err(|_| anyhow::anyhow!("component pick was cancelled"))?;
                Ok::<_, anyhow::Error>(serde_json::to_value(ComponentSelection { id })?)
            }
        });

        let weak = self.downgrade();
        rpc.functions()
            .on(BridgeEvent::DevtoolsClientReady, move |_| {
                let session = Self::upgrade(&weak)?;
                session.inner.flags.lock().client_connected = true;
                tracing::debug!("Devtools client ready");
                session.push_state();
                Ok(())
            });
    }

    fn respond(&self, event: BridgeEvent, payload: Value) -> anyhow::Result<Value> {
        let reply = match event {
            BridgeEvent::GetDevtoolsState => serde_json::to_value(self.state())?,
            BridgeEvent::GetInspectorTree => {
                serde_json::to_value(self.inspector_tree(&serde_json::from_value(payload)?)?)?
            }
            BridgeEvent::GetInspectorState => {
                serde_json::to_value(self.inspector_state(&serde_json::from_value(payload)?)?)?
            }
            BridgeEvent::EditState => {
                let edit: StateEditPayload = serde_json::from_value(payload)?;
                self.active_record()?.app.edit_state(&edit)?;
                let query = InspectorStateQuery {
                    inspector_id: edit.inspector_id,
                    node_id: edit.node_id,
                };
                let state = self.inspector_state(&query)?;
                // Other views of the same node need the new values too
                self.push(BridgeEvent::SendInspectorState, serde_json::to_value(&state)?);
                serde_json::to_value(state)?
            }
            BridgeEvent::GetRouterInfo => {
                serde_json::to_value(self.with_context(|c| c.router_info().clone()))?
            }
            BridgeEvent::Navigate => {
                let target: RouteLocation = serde_json::from_value(payload)?;
                self.active_record()?.app.navigate(&target)?;
                self.refresh_router_info();
                self.push_router_info();
                Value::Null
            }
            BridgeEvent::GetMatchedRoutes => {
                let path: String = serde_json::from_value(payload)?;
                serde_json::to_value(self.active_record()?.app.matched_routes(&path))?
            }
            BridgeEvent::GetTimelineLayers => {
                let mut layers = self.with_context(|c| c.timeline_layers().to_vec());
                if let Ok(record) = self.active_record() {
                    for layer in record.app.timeline_layers() {
                        if !layers.iter().any(|l| l.id == layer.id) {
                            layers.push(layer);
                        }
                    }
                }
                serde_json::to_value(layers)?
            }
            BridgeEvent::ToggleApp => {
                let id: String = serde_json::from_value(payload)?;
                self.toggle_app(&id)?;
                Value::Null
            }
            BridgeEvent::UpdateInspectorTreeId => {
                let id: String = serde_json::from_value(payload)?;
                self.with_context(|c| c.set_active_inspector_tree_id(id));
                Value::Null
            }
            BridgeEvent::GetInspectors => {
                serde_json::to_value(self.with_context(|c| c.inspectors().to_vec()))?
            }
            BridgeEvent::ToggleComponentInspector => {
                let toggle: ComponentInspectorToggle = serde_json::from_value(payload)?;
                if !toggle.visible {
                    self.cancel_component_pick();
                }
                self.active_record()?
                    .app
                    .toggle_component_inspector(toggle.visible)?;
                Value::Null
            }
            BridgeEvent::ScrollToComponent => {
                let query: ComponentInstanceQuery = serde_json::from_value(payload)?;
                self.active_record()?.app.scroll_to_component(&query.instance_id)?;
                Value::Null
            }
            BridgeEvent::GetComponentBoundingRect => {
                let query: ComponentInstanceQuery = serde_json::from_value(payload)?;
                serde_json::to_value(
                    self.active_record()?
                        .app
                        .component_bounding_rect(&query.instance_id)?,
                )?
            }
            BridgeEvent::UnhighlightElement => {
                if let Ok(record) = self.active_record() {
                    record.app.unhighlight_element();
                }
                Value::Null
            }
            BridgeEvent::OpenInEditor => {
                let options: OpenInEditorOptions = serde_json::from_value(payload)?;
                self.active_record()?.app.open_in_editor(&options)?;
                Value::Null
            }
            BridgeEvent::IsVueInspectorDetected => Value::Bool(
                self.active_app()
                    .is_some_and(|record| record.app.vue_inspector_detected()),
            ),
            BridgeEvent::EnableVueInspector => {
                self.active_record()?.app.enable_vue_inspector()?;
                Value::Null
            }
            other => anyhow::bail!("no responder for {other}"),
        };
        Ok(reply)
    }

    fn inspector_tree(&self, query: &InspectorTreeQuery) -> anyhow::Result<InspectorTreePayload> {
        self.ensure_inspector(&query.inspector_id)?;
        let data = self
            .active_record()?
            .app
            .component_tree(&query.inspector_id, query.filter.as_deref())?;
        Ok(InspectorTreePayload {
            inspector_id: query.inspector_id.clone(),
            data,
        })
    }

    fn inspector_state(&self, query: &InspectorStateQuery) -> anyhow::Result<InspectorStatePayload> {
        self.ensure_inspector(&query.inspector_id)?;
        let app = self.active_record()?.app;
        let state = app.inspector_state(&query.inspector_id, &query.node_id)?;
        let getters = app.inspector_getters(&query.inspector_id, &query.node_id);
        Ok(InspectorStatePayload {
            inspector_id: query.inspector_id.clone(),
            node_id: query.node_id.clone(),
            state,
            getters,
        })
    }

    fn ensure_inspector(&self, id: &str) -> anyhow::Result<()> {
        if !self.with_context(|c| c.has_inspector(id)) {
            anyhow::bail!("unknown inspector `{id}`");
        }
        Ok(())
    }

    fn active_record(&self) -> anyhow::Result<AppRecord> {
        self.active_app()
            .ok_or_else(|| anyhow::anyhow!("no active app record"))
    }

    fn refresh_router_info(&self) {
        if let Some(record) = self.active_app() {
            let info = record.app.router_info();
            self.with_context(|c| c.set_router_info(info));
        }
    }

    /// Let the active app register its plugins, optionally on a fresh
    /// context, and tell the panel what changed.
    fn setup_active_app(&self, reset: bool) {
        let record = self.active_app();
        let router_info = record.as_ref().map(|r| r.app.router_info());
        {
            let mut context = self.inner.context.lock();
            if reset {
                context.reset();
            }
            if let Some(record) = &record {
                record.app.register_plugins(&mut context);
            }
            if let Some(info) = router_info {
                context.set_router_info(info);
            }
        }
        self.push_inspectors();
        self.push_custom_commands();
        self.push_custom_tabs();
    }

    fn start_component_pick(&self) -> anyhow::Result<oneshot::Receiver<String>> {
        self.active_record()?.app.toggle_component_inspector(true)?;
        let (tx, rx) = oneshot::channel();
        if self.inner.picker.lock().replace(tx).is_some() {
            tracing::debug!("Replacing pending component pick");
        }
        Ok(rx)
    }

    fn cancel_component_pick(&self) {
        if self.inner.picker.lock().take().is_some() {
            tracing::debug!("Cancelled pending component pick");
        }
    }
}
