//! Payload types exchanged between the inspected app and the panel
//!
//! Everything here travels inside an envelope payload, so field names are
//! camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inspector id of the built-in component tree
pub const COMPONENTS_INSPECTOR_ID: &str = "components";

/// DevTools state snapshot, replaced wholesale on every update
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevToolsState {
    /// The inspected app finished its handshake
    pub connected: bool,
    /// The panel announced itself with `devtools:client-ready`
    pub client_connected: bool,
    pub vue_version: String,
    pub tabs: Vec<CustomTab>,
    pub commands: Vec<CustomCommand>,
    /// A build-tool server is available for this app
    pub vite_plugin_detected: bool,
    pub app_records: Vec<AppRecordInfo>,
    pub active_app_record_id: String,
}

/// Ecosystem libraries detected on an app
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleDetectives {
    pub vue_router: bool,
    pub pinia: bool,
    pub vue_i18n: bool,
}

/// Public view of an app record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecordInfo {
    /// Stable id, unique within the host page
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router_id: Option<String>,
    #[serde(default)]
    pub module_detectives: ModuleDetectives,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorNodeTag {
    pub label: String,
    pub text_color: u32,
    pub background_color: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
}

/// One node of an inspector tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTreeNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub inactive: bool,
    #[serde(default)]
    pub is_fragment: bool,
    #[serde(default)]
    pub children: Vec<ComponentTreeNode>,
    #[serde(default)]
    pub tags: Vec<InspectorNodeTag>,
    #[serde(default)]
    pub auto_open: bool,
    /// Source file of the component, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// One entry of a node's inspector state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorState {
    pub key: String,
    pub value: Value,
    /// Section the entry is shown under (props, setup, data...)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub editable: bool,
}

/// Request for an inspector tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorTreeQuery {
    pub inspector_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Inspector tree reply and push
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorTreePayload {
    pub inspector_id: String,
    pub data: Vec<ComponentTreeNode>,
}

/// Request for the state of one node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorStateQuery {
    pub inspector_id: String,
    pub node_id: String,
}

/// Inspector state reply and push
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorStatePayload {
    pub inspector_id: String,
    pub node_id: String,
    pub state: Vec<InspectorState>,
    /// Computed values, shown apart from the editable state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub getters: Vec<InspectorState>,
}

/// A state mutation requested by the panel
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEditPayload {
    pub inspector_id: String,
    pub node_id: String,
    /// Key path from the node's state root
    pub path: Vec<String>,
    pub value: Value,
    /// Remove the key instead of assigning it
    #[serde(default)]
    pub remove: bool,
}

/// Show or hide the component picker overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInspectorToggle {
    pub visible: bool,
}

/// Component picked in the page with the component picker
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSelection {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentInstanceQuery {
    pub instance_id: String,
}

/// Page rectangle of a rendered component, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentBoundingRect {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInEditorOptions {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRecord {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterInfo {
    pub current_route: Option<RouteRecord>,
    pub routes: Vec<RouteRecord>,
}

/// Navigation target
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteLocation {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineLayer {
    pub id: String,
    pub label: String,
    pub color: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEventData {
    /// Milliseconds since the epoch
    pub time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub layer_id: String,
    pub event: TimelineEventData,
}

/// Custom inspector registered by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomInspector {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTab {
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCommand {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
