//! Event vocabulary shared by every endpoint of the bridge
//!
//! Both ends agree on this closed set. Names that do not parse into a
//! [`BridgeEvent`] are ignored at the wire boundary.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

/// Which side of the bridge produced an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    /// The devtools panel
    Client,
    /// The inspected application (host page)
    App,
    /// The build-tool dev server
    Server,
}

/// Every message kind that can travel through a bridge
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
pub enum BridgeEvent {
    // Local lifecycle, never sent over a transport
    #[strum(serialize = "ready")]
    Ready,
    #[strum(serialize = "connect")]
    Connect,
    #[strum(serialize = "disconnect")]
    Disconnect,

    // Handshake
    #[strum(serialize = "client-create")]
    ClientCreate,
    #[strum(serialize = "client-ready")]
    ClientReady,
    #[strum(serialize = "app-connected")]
    AppConnected,
    #[strum(serialize = "devtools:client-ready")]
    DevtoolsClientReady,

    // DevTools state
    #[strum(serialize = "devtools-state:get")]
    GetDevtoolsState,
    #[strum(serialize = "devtools-state:updated")]
    DevtoolsStateUpdated,

    // Inspector tree
    #[strum(serialize = "inspector-tree:get")]
    GetInspectorTree,
    #[strum(serialize = "inspector-tree:send")]
    SendInspectorTree,
    #[strum(serialize = "inspector-tree:update-id")]
    UpdateInspectorTreeId,

    // Inspector state
    #[strum(serialize = "inspector-state:get")]
    GetInspectorState,
    #[strum(serialize = "inspector-state:send")]
    SendInspectorState,
    #[strum(serialize = "state:edit")]
    EditState,

    // Custom inspectors
    #[strum(serialize = "inspector:list")]
    GetInspectors,
    #[strum(serialize = "inspector:updated")]
    InspectorsUpdated,

    // Component picker and highlighting in the inspected page
    #[strum(serialize = "component-inspector:toggle")]
    ToggleComponentInspector,
    #[strum(serialize = "component-inspector:inspect")]
    InspectComponentInspector,
    #[strum(serialize = "component-inspector:scroll-to")]
    ScrollToComponent,
    #[strum(serialize = "component-inspector:bounding-rect")]
    GetComponentBoundingRect,
    #[strum(serialize = "component-inspector:unhighlight")]
    UnhighlightElement,

    // Editor and vite-plugin-vue-inspector integration
    #[strum(serialize = "open-in-editor")]
    OpenInEditor,
    #[strum(serialize = "vue-inspector:detected")]
    IsVueInspectorDetected,
    #[strum(serialize = "vue-inspector:enable")]
    EnableVueInspector,

    // Router
    #[strum(serialize = "router-info:get")]
    GetRouterInfo,
    #[strum(serialize = "router-info:updated")]
    RouterInfoUpdated,
    #[strum(serialize = "router:navigate")]
    Navigate,
    #[strum(serialize = "router:matched-routes")]
    GetMatchedRoutes,

    // Timeline
    #[strum(serialize = "timeline:add-event")]
    AddTimelineEvent,
    #[strum(serialize = "timeline:layers")]
    GetTimelineLayers,

    // Custom tabs / commands / apps
    #[strum(serialize = "custom-tabs:updated")]
    CustomTabsUpdated,
    #[strum(serialize = "custom-commands:updated")]
    CustomCommandsUpdated,
    #[strum(serialize = "app:toggle")]
    ToggleApp,

    /// Generic reply for requests without a dedicated reply kind
    #[strum(serialize = "rpc:reply")]
    RpcReply,

    // Build-tool server functions and pushes
    #[strum(serialize = "server:root")]
    ServerRoot,
    #[strum(serialize = "server:static-assets")]
    ServerStaticAssets,
    #[strum(serialize = "server:image-meta")]
    ServerImageMeta,
    #[strum(serialize = "server:text-asset-content")]
    ServerTextAssetContent,
    #[strum(serialize = "server:graph")]
    ServerGraph,
    #[strum(serialize = "server:assets-updated")]
    ServerAssetsUpdated,
    #[strum(serialize = "server:module-updated")]
    ServerModuleUpdated,
}

impl BridgeEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Parse a wire name. Returns `None` for names outside the vocabulary
    /// and for local lifecycle names, which never arrive over a transport.
    pub fn from_wire(name: &str) -> Option<Self> {
        let event: BridgeEvent = name.parse().ok()?;
        (!event.is_local()).then_some(event)
    }

    /// Lifecycle events are dispatched locally and never emitted
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            BridgeEvent::Ready | BridgeEvent::Connect | BridgeEvent::Disconnect
        )
    }

    /// Events that carry the answer to a correlated request
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            BridgeEvent::SendInspectorTree
                | BridgeEvent::SendInspectorState
                | BridgeEvent::RpcReply
        )
    }

    /// The event a responder uses when answering a request of this kind
    pub fn reply_event(&self) -> BridgeEvent {
        match self {
            BridgeEvent::GetInspectorTree => BridgeEvent::SendInspectorTree,
            BridgeEvent::GetInspectorState => BridgeEvent::SendInspectorState,
            _ => BridgeEvent::RpcReply,
        }
    }
}
