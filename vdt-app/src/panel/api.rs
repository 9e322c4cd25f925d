//! Typed panel API over the app bridge

use serde::de::DeserializeOwned;
use serde_json::Value;
use vdt_rpc::{BridgeEvent, ListenerId, RpcCore, RpcError};

use crate::types::{
    ComponentBoundingRect, ComponentInspectorToggle, ComponentInstanceQuery, ComponentSelection,
    CustomCommand, CustomInspector, CustomTab, DevToolsState, InspectorStatePayload,
    InspectorStateQuery, InspectorTreePayload, InspectorTreeQuery, OpenInEditorOptions,
    RouteLocation, RouteRecord, RouterInfo, StateEditPayload, TimelineEvent, TimelineLayer,
};

/// Requests and subscriptions the panel makes against the inspected app.
/// Bound to one connection; build a new one after a reload.
#[derive(Clone)]
pub struct PanelApi {
    rpc: RpcCore,
}

impl PanelApi {
    pub fn new(rpc: RpcCore) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &RpcCore {
        &self.rpc
    }

    pub async fn get_inspector_tree(
        &self,
        query: &InspectorTreeQuery,
    ) -> Result<InspectorTreePayload, RpcError> {
        self.call(BridgeEvent::GetInspectorTree, to_value(query)?)
            .await
    }

    pub async fn get_inspector_state(
        &self,
        query: &InspectorStateQuery,
    ) -> Result<InspectorStatePayload, RpcError> {
        self.call(BridgeEvent::GetInspectorState, to_value(query)?)
            .await
    }

    /// Apply an edit and return the node's refreshed state
    pub async fn edit_inspector_state(
        &self,
        edit: &StateEditPayload,
    ) -> Result<InspectorStatePayload, RpcError> {
        self.call(BridgeEvent::EditState, to_value(edit)?).await
    }

    pub async fn get_devtools_state(&self) -> Result<DevToolsState, RpcError> {
        self.call(BridgeEvent::GetDevtoolsState, None).await
    }

    pub async fn get_timeline_layers(&self) -> Result<Vec<TimelineLayer>, RpcError> {
        self.call(BridgeEvent::GetTimelineLayers, None).await
    }

    pub async fn get_router_info(&self) -> Result<RouterInfo, RpcError> {
        self.call(BridgeEvent::GetRouterInfo, None).await
    }

    pub async fn navigate(&self, target: &RouteLocation) -> Result<(), RpcError> {
        self.call(BridgeEvent::Navigate, to_value(target)?).await
    }

    pub async fn get_matched_routes(&self, path: &str) -> Result<Vec<RouteRecord>, RpcError> {
        self.call(BridgeEvent::GetMatchedRoutes, Some(Value::from(path)))
            .await
    }

    pub async fn toggle_app(&self, id: &str) -> Result<(), RpcError> {
        self.call(BridgeEvent::ToggleApp, Some(Value::from(id))).await
    }

    /// Custom inspectors registered by the active app's plugins
    pub async fn get_inspectors(&self) -> Result<Vec<CustomInspector>, RpcError> {
        self.call(BridgeEvent::GetInspectors, None).await
    }

    pub async fn toggle_component_inspector(&self, visible: bool) -> Result<(), RpcError> {
        self.call(
            BridgeEvent::ToggleComponentInspector,
            to_value(&ComponentInspectorToggle { visible })?,
        )
        .await
    }

    /// Show the component picker and wait for the user to pick one.
    /// Fails if the picker is hidden first.
    pub async fn inspect_component(&self) -> Result<ComponentSelection, RpcError> {
        self.call(BridgeEvent::InspectComponentInspector, None).await
    }

    pub async fn scroll_to_component(&self, instance_id: &str) -> Result<(), RpcError> {
        self.call(BridgeEvent::ScrollToComponent, instance_query(instance_id)?)
            .await
    }

    pub async fn get_component_bounding_rect(
        &self,
        instance_id: &str,
    ) -> Result<ComponentBoundingRect, RpcError> {
        self.call(BridgeEvent::GetComponentBoundingRect, instance_query(instance_id)?)
            .await
    }

    pub async fn unhighlight_element(&self) -> Result<(), RpcError> {
        self.call(BridgeEvent::UnhighlightElement, None).await
    }

    pub async fn open_in_editor(&self, options: &OpenInEditorOptions) -> Result<(), RpcError> {
        self.call(BridgeEvent::OpenInEditor, to_value(options)?).await
    }

    pub async fn is_vue_inspector_detected(&self) -> Result<bool, RpcError> {
        self.call(BridgeEvent::IsVueInspectorDetected, None).await
    }

    pub async fn enable_vue_inspector(&self) -> Result<(), RpcError> {
        self.call(BridgeEvent::EnableVueInspector, None).await
    }

    /// Tell the app which inspector tree the panel shows. No reply.
    pub fn update_inspector_tree_id(&self, id: &str) -> Result<(), RpcError> {
        self.rpc
            .notify(BridgeEvent::UpdateInspectorTreeId, Some(Value::from(id)))
    }

    /// Tree pushes for `inspector_id` only
    pub fn on_inspector_tree_updated<F>(&self, inspector_id: &str, f: F) -> ListenerId
    where
        F: Fn(InspectorTreePayload) + Send + Sync + 'static,
    {
        let inspector_id = inspector_id.to_string();
        self.subscribe(BridgeEvent::SendInspectorTree, move |payload: InspectorTreePayload| {
            if payload.inspector_id == inspector_id {
                f(payload);
            }
        })
    }

    /// State pushes for `inspector_id` only
    pub fn on_inspector_state_updated<F>(&self, inspector_id: &str, f: F) -> ListenerId
    where
        F: Fn(InspectorStatePayload) + Send + Sync + 'static,
    {
        let inspector_id = inspector_id.to_string();
        self.subscribe(BridgeEvent::SendInspectorState, move |payload: InspectorStatePayload| {
            if payload.inspector_id == inspector_id {
                f(payload);
            }
        })
    }

    pub fn on_devtools_state_updated<F>(&self, f: F) -> ListenerId
    where
        F: Fn(DevToolsState) + Send + Sync + 'static,
    {
        self.subscribe(BridgeEvent::DevtoolsStateUpdated, f)
    }

    pub fn on_custom_tabs_updated<F>(&self, f: F) -> ListenerId
    where
        F: Fn(Vec<CustomTab>) + Send + Sync + 'static,
    {
        self.subscribe(BridgeEvent::CustomTabsUpdated, f)
    }

    pub fn on_custom_commands_updated<F>(&self, f: F) -> ListenerId
    where
        F: Fn(Vec<CustomCommand>) + Send + Sync + 'static,
    {
        self.subscribe(BridgeEvent::CustomCommandsUpdated, f)
    }

    pub fn on_router_info_updated<F>(&self, f: F) -> ListenerId
    where
        F: Fn(RouterInfo) + Send + Sync + 'static,
    {
        self.subscribe(BridgeEvent::RouterInfoUpdated, f)
    }

    pub fn on_inspectors_updated<F>(&self, f: F) -> ListenerId
    where
        F: Fn(Vec<CustomInspector>) + Send + Sync + 'static,
    {
        self.subscribe(BridgeEvent::InspectorsUpdated, f)
    }

    pub fn on_timeline_event<F>(&self, f: F) -> ListenerId
    where
        F: Fn(TimelineEvent) + Send + Sync + 'static,
    {
        self.subscribe(BridgeEvent::AddTimelineEvent, f)
    }

    async fn call<R: DeserializeOwned>(
        &self,
        event: BridgeEvent,
        payload: Option<Value>,
    ) -> Result<R, RpcError> {
        self.rpc.call(event, payload).await
    }

    fn subscribe<T, F>(&self, event: BridgeEvent, f: F) -> ListenerId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.rpc.functions().on(event, move |envelope| {
            f(envelope.parse()?);
            Ok(())
        })
    }
}

fn to_value<T: serde::Serialize>(payload: &T) -> Result<Option<Value>, RpcError> {
    Ok(Some(serde_json::to_value(payload)?))
}

fn instance_query(instance_id: &str) -> Result<Option<Value>, RpcError> {
    to_value(&ComponentInstanceQuery {
        instance_id: instance_id.to_string(),
    })
}
