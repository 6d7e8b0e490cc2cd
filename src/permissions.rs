//! Widget permission resolution.
//!
//! A client sees its personal override when one exists, otherwise whatever
//! the global list is *now*. Overrides are keyed by the declared client id so
//! they survive reconnects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// keyword that clears a personal override
pub const USE_GLOBAL: &str = "GLOBAL";

/// target value of an `update_client_widgets` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSelection", into = "RawSelection")]
pub enum WidgetSelection {
    Custom(Vec<String>),
    UseGlobal,
}

/// wire form: either a list of names or the `"GLOBAL"` keyword
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSelection {
    List(Vec<String>),
    Keyword(String),
}

impl TryFrom<RawSelection> for WidgetSelection {
    type Error = String;

    fn try_from(raw: RawSelection) -> Result<Self, Self::Error> {
        match raw {
            RawSelection::List(widgets) => Ok(WidgetSelection::Custom(widgets)),
            RawSelection::Keyword(k) if k == USE_GLOBAL => Ok(WidgetSelection::UseGlobal),
            RawSelection::Keyword(k) => Err(format!("unknown widget selection {:?}", k)),
        }
    }
}

impl From<WidgetSelection> for RawSelection {
    fn from(selection: WidgetSelection) -> Self {
        match selection {
            WidgetSelection::Custom(widgets) => RawSelection::List(widgets),
            WidgetSelection::UseGlobal => RawSelection::Keyword(USE_GLOBAL.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WidgetPermissions {
    global: Vec<String>,
    overrides: HashMap<String, Vec<String>>,
}

impl WidgetPermissions {
    pub fn new(global: Vec<String>) -> Self {
        Self { global, overrides: HashMap::new() }
    }

    pub fn global(&self) -> &[String] {
        &self.global
    }

    pub fn resolve(&self, client_id: &str) -> Vec<String> {
        self.overrides.get(client_id).unwrap_or(&self.global).clone()
    }

    pub fn has_override(&self, client_id: &str) -> bool {
        self.overrides.contains_key(client_id)
    }

    /// total replacement
    pub fn set_global(&mut self, widgets: Vec<String>) {
        self.global = widgets;
    }

    /// Returns false when nothing changed (clearing a missing override).
    pub fn set_client(&mut self, client_id: &str, selection: WidgetSelection) -> bool {
        match selection {
            WidgetSelection::Custom(widgets) => {
                self.overrides.insert(client_id.to_string(), widgets);
                true
            }
            WidgetSelection::UseGlobal => self.overrides.remove(client_id).is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unknown_client_follows_global_without_lag() {
        let mut perms = WidgetPermissions::new(list(&["gauge", "map"]));
        assert_eq!(perms.resolve("viewer-1"), list(&["gauge", "map"]));

        perms.set_global(list(&["altitude"]));
        assert_eq!(perms.resolve("viewer-1"), list(&["altitude"]));
    }

    #[test]
    fn test_override_is_exact_and_ignores_global_changes() {
        let mut perms = WidgetPermissions::new(list(&["gauge", "map"]));
        assert!(perms.set_client("viewer-1", WidgetSelection::Custom(list(&["map", "gauge", "map"]))));
        assert_eq!(perms.resolve("viewer-1"), list(&["map", "gauge", "map"]));

        perms.set_global(list(&["altitude"]));
        assert_eq!(perms.resolve("viewer-1"), list(&["map", "gauge", "map"]));
        assert_eq!(perms.resolve("viewer-2"), list(&["altitude"]));
    }

    #[test]
    fn test_use_global_without_override_is_noop() {
        let mut perms = WidgetPermissions::new(list(&["gauge"]));
        assert!(!perms.set_client("viewer-1", WidgetSelection::UseGlobal));
        assert!(!perms.has_override("viewer-1"));
        assert_eq!(perms.resolve("viewer-1"), list(&["gauge"]));
    }

    #[test]
    fn test_use_global_removes_override() {
        let mut perms = WidgetPermissions::new(list(&["gauge", "map"]));
        perms.set_client("viewer-1", WidgetSelection::Custom(list(&["gauge"])));
        assert!(perms.has_override("viewer-1"));

        assert!(perms.set_client("viewer-1", WidgetSelection::UseGlobal));
        assert!(!perms.has_override("viewer-1"));
        assert_eq!(perms.resolve("viewer-1"), list(&["gauge", "map"]));
    }

    #[test]
    fn test_empty_override_hides_everything() {
        let mut perms = WidgetPermissions::new(list(&["gauge"]));
        perms.set_client("viewer-1", WidgetSelection::Custom(Vec::new()));
        assert!(perms.resolve("viewer-1").is_empty());
    }

    #[test]
    fn test_selection_wire_format() {
        let custom: WidgetSelection = serde_json::from_str(r#"["gauge","map"]"#).unwrap();
        assert_eq!(custom, WidgetSelection::Custom(list(&["gauge", "map"])));

        let global: WidgetSelection = serde_json::from_str(r#""GLOBAL""#).unwrap();
        assert_eq!(global, WidgetSelection::UseGlobal);
        assert_eq!(serde_json::to_string(&global).unwrap(), r#""GLOBAL""#);

        assert!(serde_json::from_str::<WidgetSelection>(r#""everything""#).is_err());
    }
}
