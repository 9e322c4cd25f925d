use crate::types::{
    COMPONENTS_INSPECTOR_ID, CustomCommand, CustomInspector, CustomTab, RouterInfo, TimelineLayer,
};

/// Per-app devtools context on the host side
///
/// Holds what plugins registered and what the panel last selected.
/// [`DevToolsContext::reset`] returns everything to the initial values,
/// which happens whenever the active app changes.
#[derive(Debug, Clone, PartialEq)]
pub struct DevToolsContext {
    active_inspector_tree_id: String,
    router_info: RouterInfo,
    timeline_layers: Vec<TimelineLayer>,
    inspectors: Vec<CustomInspector>,
    tabs: Vec<CustomTab>,
    commands: Vec<CustomCommand>,
}

impl Default for DevToolsContext {
    fn default() -> Self {
        Self {
            active_inspector_tree_id: COMPONENTS_INSPECTOR_ID.to_string(),
            router_info: RouterInfo::default(),
            timeline_layers: Vec::new(),
            inspectors: Vec::new(),
            tabs: Vec::new(),
            commands: Vec::new(),
        }
    }
}

impl DevToolsContext {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn active_inspector_tree_id(&self) -> &str {
        &self.active_inspector_tree_id
    }

    pub fn set_active_inspector_tree_id(&mut self, id: impl Into<String>) {
        self.active_inspector_tree_id = id.into();
    }

    pub fn router_info(&self) -> &RouterInfo {
        &self.router_info
    }

    pub fn set_router_info(&mut self, info: RouterInfo) {
        self.router_info = info;
    }

    pub fn timeline_layers(&self) -> &[TimelineLayer] {
        &self.timeline_layers
    }

    /// Add or replace a layer by id
    pub fn add_timeline_layer(&mut self, layer: TimelineLayer) {
        match self.timeline_layers.iter_mut().find(|l| l.id == layer.id) {
            Some(existing) => *existing = layer,
            None => self.timeline_layers.push(layer),
        }
    }

    pub fn inspectors(&self) -> &[CustomInspector] {
        &self.inspectors
    }

    /// Add or replace an inspector by id
    pub fn add_inspector(&mut self, inspector: CustomInspector) {
        match self.inspectors.iter_mut().find(|i| i.id == inspector.id) {
            Some(existing) => *existing = inspector,
            None => self.inspectors.push(inspector),
        }
    }

    pub fn has_inspector(&self, id: &str) -> bool {
        id == COMPONENTS_INSPECTOR_ID || self.inspectors.iter().any(|i| i.id == id)
    }

    pub fn tabs(&self) -> &[CustomTab] {
        &self.tabs
    }

    pub fn set_tabs(&mut self, tabs: Vec<CustomTab>) {
        self.tabs = tabs;
    }

    pub fn commands(&self) -> &[CustomCommand] {
        &self.commands
    }

    pub fn set_commands(&mut self, commands: Vec<CustomCommand>) {
        self.commands = commands;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_restores_initial_values() {
        let mut context = DevToolsContext::default();
        context.set_active_inspector_tree_id("pinia");
        context.add_timeline_layer(TimelineLayer {
            id: "mouse".to_string(),
            label: "Mouse".to_string(),
            color: 0xA451AF,
        });
        context.set_tabs(vec![CustomTab {
            name: "i18n".to_string(),
            title: "I18n".to_string(),
            ..Default::default()
        }]);

        context.reset();
        assert_eq!(context, DevToolsContext::default());
        assert_eq!(context.active_inspector_tree_id(), COMPONENTS_INSPECTOR_ID);
    }

    #[test]
    fn test_layers_and_inspectors_replace_by_id() {
        let mut context = DevToolsContext::default();
        for label in ["Keyboard", "Keys"] {
            context.add_timeline_layer(TimelineLayer {
                id: "keyboard".to_string(),
                label: label.to_string(),
                color: 0,
            });
        }
        assert_eq!(context.timeline_layers().len(), 1);
        assert_eq!(context.timeline_layers()[0].label, "Keys");

        assert!(context.has_inspector(COMPONENTS_INSPECTOR_ID));
        assert!(!context.has_inspector("pinia"));
        context.add_inspector(CustomInspector {
            id: "pinia".to_string(),
            label: "Pinia".to_string(),
            icon: None,
        });
        assert!(context.has_inspector("pinia"));
    }
}
