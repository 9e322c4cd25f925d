use std::fmt;
use std::sync::Arc;

use super::context::DevToolsContext;
use crate::types::{
    AppRecordInfo, ComponentBoundingRect, ComponentTreeNode, InspectorState, OpenInEditorOptions,
    RouteLocation, RouteRecord, RouterInfo, StateEditPayload, TimelineLayer,
};

/// Capabilities the host needs from the framework integration of one app
pub trait InspectedApp: Send + Sync {
    /// Root nodes of `inspector_id`'s tree, optionally filtered by name
    fn component_tree(
        &self,
        inspector_id: &str,
        filter: Option<&str>,
    ) -> anyhow::Result<Vec<ComponentTreeNode>>;

    fn inspector_state(
        &self,
        inspector_id: &str,
        node_id: &str,
    ) -> anyhow::Result<Vec<InspectorState>>;

    /// Computed values of a node, listed apart from its state
    fn inspector_getters(&self, _inspector_id: &str, _node_id: &str) -> Vec<InspectorState> {
        Vec::new()
    }

    fn edit_state(&self, edit: &StateEditPayload) -> anyhow::Result<()>;

    /// Register the app's plugins: custom inspectors, timeline layers,
    /// tabs and commands.
    ///
    /// Runs every time the app becomes the active record. After a toggle
    /// `context` has just been reset.
    fn register_plugins(&self, _context: &mut DevToolsContext) {}

    fn router_info(&self) -> RouterInfo {
        RouterInfo::default()
    }

    fn navigate(&self, target: &RouteLocation) -> anyhow::Result<()> {
        anyhow::bail!("app has no router, cannot navigate to {}", target.path)
    }

    fn matched_routes(&self, _path: &str) -> Vec<RouteRecord> {
        Vec::new()
    }

    fn timeline_layers(&self) -> Vec<TimelineLayer> {
        Vec::new()
    }

    /// Show or hide the component picker overlay. The picked component is
    /// reported with [`HostSession::component_selected`].
    ///
    /// [`HostSession::component_selected`]: super::HostSession::component_selected
    fn toggle_component_inspector(&self, _visible: bool) -> anyhow::Result<()> {
        anyhow::bail!("app has no component picker")
    }

    fn scroll_to_component(&self, instance_id: &str) -> anyhow::Result<()> {
        anyhow::bail!("cannot scroll to component {instance_id}")
    }

    fn component_bounding_rect(&self, instance_id: &str) -> anyhow::Result<ComponentBoundingRect> {
        anyhow::bail!("no bounding rect for component {instance_id}")
    }

    /// Remove the hover highlight, if any
    fn unhighlight_element(&self) {}

    fn open_in_editor(&self, options: &OpenInEditorOptions) -> anyhow::Result<()> {
        anyhow::bail!("no editor integration to open {}", options.file)
    }

    /// Whether vite-plugin-vue-inspector is loaded in the page
    fn vue_inspector_detected(&self) -> bool {
        false
    }

    fn enable_vue_inspector(&self) -> anyhow::Result<()> {
        anyhow::bail!("vite-plugin-vue-inspector is not loaded")
    }
}

/// One inspected application in the host page
#[derive(Clone)]
pub struct AppRecord {
    pub info: AppRecordInfo,
    pub app: Arc<dyn InspectedApp>,
}

impl AppRecord {
    pub fn new(info: AppRecordInfo, app: Arc<dyn InspectedApp>) -> Self {
        Self { info, app }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }
}

impl fmt::Debug for AppRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppRecord").field("info", &self.info).finish()
    }
}

/// App records of the host page, with the one commands are scoped to
#[derive(Debug, Default)]
pub struct AppRegistry {
    records: Vec<AppRecord>,
    active: Option<String>,
}

impl AppRegistry {
    /// Add or replace a record. The first record becomes active.
    pub fn register(&mut self, record: AppRecord) {
        if self.active.is_none() {
            self.active = Some(record.info.id.clone());
        }
        match self.records.iter_mut().find(|r| r.info.id == record.info.id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Remove a record. If it was active, the first remaining one takes over.
    pub fn unregister(&mut self, id: &str) -> Option<AppRecord> {
        let index = self.records.iter().position(|r| r.info.id == id)?;
        let removed = self.records.remove(index);
        if self.active.as_deref() == Some(id) {
            self.active = self.records.first().map(|r| r.info.id.clone());
        }
        Some(removed)
    }

    /// Make `id` the active record
    pub fn toggle(&mut self, id: &str) -> anyhow::Result<&AppRecord> {
        let Some(record) = self.records.iter().find(|r| r.info.id == id) else {
            anyhow::bail!("unknown app record `{id}`");
        };
        self.active = Some(id.to_string());
        Ok(record)
    }

    pub fn active(&self) -> Option<&AppRecord> {
        let id = self.active.as_deref()?;
        self.records.iter().find(|r| r.info.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn infos(&self) -> Vec<AppRecordInfo> {
        self.records.iter().map(|r| r.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use super::*;
    use crate::types::{CustomInspector, CustomTab};

    /// In-memory app used by the host tests
    #[derive(Default)]
    pub struct FakeApp {
        pub name: String,
        pub state: Mutex<serde_json::Map<String, Value>>,
        pub route: Mutex<String>,
        pub picker_visible: Mutex<bool>,
        pub opened: Mutex<Vec<OpenInEditorOptions>>,
    }

    impl FakeApp {
        pub fn named(name: &str) -> Arc<Self> {
            let mut state = serde_json::Map::new();
            state.insert("count".to_string(), json!(0));
            Arc::new(Self {
                name: name.to_string(),
                state: Mutex::new(state),
                route: Mutex::new("/".to_string()),
                ..Default::default()
            })
        }

        /// Id of the custom inspector this app's store plugin registers
        pub fn store_inspector(&self) -> String {
            format!("{}-store", self.name)
        }
    }

    impl InspectedApp for FakeApp {
        fn component_tree(
            &self,
            _inspector_id: &str,
            filter: Option<&str>,
        ) -> anyhow::Result<Vec<ComponentTreeNode>> {
            let root = ComponentTreeNode {
                id: format!("{}:root", self.name),
                name: self.name.clone(),
                ..Default::default()
            };
            Ok(match filter {
                Some(filter) if !self.name.contains(filter) => Vec::new(),
                _ => vec![root],
            })
        }

        fn inspector_state(
            &self,
            _inspector_id: &str,
            node_id: &str,
        ) -> anyhow::Result<Vec<InspectorState>> {
            if !node_id.starts_with(&self.name) {
                anyhow::bail!("no node `{node_id}`");
            }
            Ok(self
                .state
                .lock()
                .iter()
                .map(|(key, value)| InspectorState {
                    key: key.clone(),
                    value: value.clone(),
                    kind: "setup".to_string(),
                    editable: true,
                })
                .collect())
        }

        fn inspector_getters(&self, _inspector_id: &str, _node_id: &str) -> Vec<InspectorState> {
            let count = self.state.lock().get("count").cloned().unwrap_or(Value::Null);
            vec![InspectorState {
                key: "double".to_string(),
                value: count.as_i64().map_or(Value::Null, |n| json!(n * 2)),
                kind: "getters".to_string(),
                editable: false,
            }]
        }

        fn register_plugins(&self, context: &mut DevToolsContext) {
            context.add_inspector(CustomInspector {
                id: self.store_inspector(),
                label: format!("{} store", self.name),
                icon: None,
            });
            context.set_tabs(vec![CustomTab {
                name: self.name.clone(),
                title: self.name.to_uppercase(),
                ..Default::default()
            }]);
        }

        fn edit_state(&self, edit: &StateEditPayload) -> anyhow::Result<()> {
            let Some(key) = edit.path.first() else {
                anyhow::bail!("empty path");
            };
            let mut state = self.state.lock();
            if edit.remove {
                state.remove(key);
            } else {
                state.insert(key.clone(), edit.value.clone());
            }
            Ok(())
        }

        fn router_info(&self) -> RouterInfo {
            let path = self.route.lock().clone();
            RouterInfo {
                current_route: Some(RouteRecord {
                    path: path.clone(),
                    ..Default::default()
                }),
                routes: vec![
                    RouteRecord {
                        path: "/".to_string(),
                        ..Default::default()
                    },
                    RouteRecord {
                        path: "/about".to_string(),
                        ..Default::default()
                    },
                ],
            }
        }

        fn navigate(&self, target: &RouteLocation) -> anyhow::Result<()> {
            *self.route.lock() = target.path.clone();
            Ok(())
        }

        fn matched_routes(&self, path: &str) -> Vec<RouteRecord> {
            self.router_info()
                .routes
                .into_iter()
                .filter(|r| path.starts_with(&r.path))
                .collect()
        }

        fn timeline_layers(&self) -> Vec<TimelineLayer> {
            vec![TimelineLayer {
                id: "mouse".to_string(),
                label: "Mouse".to_string(),
                color: 0xA451AF,
            }]
        }

        fn toggle_component_inspector(&self, visible: bool) -> anyhow::Result<()> {
            *self.picker_visible.lock() = visible;
            Ok(())
        }

        fn component_bounding_rect(
            &self,
            instance_id: &str,
        ) -> anyhow::Result<ComponentBoundingRect> {
            if !instance_id.starts_with(&self.name) {
                anyhow::bail!("component {instance_id} is not mounted");
            }
            Ok(ComponentBoundingRect {
                top: 10.0,
                left: 20.0,
                width: 300.0,
                height: 40.0,
            })
        }

        fn open_in_editor(&self, options: &OpenInEditorOptions) -> anyhow::Result<()> {
            self.opened.lock().push(options.clone());
            Ok(())
        }

        fn vue_inspector_detected(&self) -> bool {
            true
        }
    }

    pub fn record(id: &str, app: Arc<FakeApp>) -> AppRecord {
        AppRecord::new(
            AppRecordInfo {
                id: id.to_string(),
                name: app.name.clone(),
                version: "3.4.0".to_string(),
                ..Default::default()
            },
            app,
        )
    }

    #[test]
    fn test_first_record_becomes_active() {
        let mut registry = AppRegistry::default();
        registry.register(record("app-1", FakeApp::named("one")));
        registry.register(record("app-2", FakeApp::named("two")));
        assert_eq!(registry.active_id(), Some("app-1"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_toggle_and_unregister() {
        let mut registry = AppRegistry::default();
        registry.register(record("app-1", FakeApp::named("one")));
        registry.register(record("app-2", FakeApp::named("two")));

        assert_eq!(registry.toggle("app-2").unwrap().id(), "app-2");
        assert!(registry.toggle("app-3").is_err());
        assert_eq!(registry.active_id(), Some("app-2"));

        registry.unregister("app-2");
        assert_eq!(registry.active_id(), Some("app-1"));
        registry.unregister("app-1");
        assert!(registry.active().is_none());
        assert!(registry.is_empty());
    }
}
