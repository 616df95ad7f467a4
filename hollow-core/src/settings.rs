//! Setting tree — recursive key/value configuration model.
//!
//! A [`SettingNode`] is either a scalar string or an ordered list of named
//! children. The same node round-trips losslessly through two persisted
//! forms: XML elements (the on-disk `settings.xml`) and JSON tokens (the
//! wire payload of the settings RPCs). Booleans and integers are carried as
//! their canonical scalar text (`"True"`/`"False"`, decimal digits), so the
//! local and remote APIs agree on serialized text for every scalar type.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use xmltree::{Element, XMLNode};

use crate::error::{io_err, SettingError};

// ---------------------------------------------------------------------------
// SettingNode
// ---------------------------------------------------------------------------

/// A recursive configuration value: scalar text or named children, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingNode {
    Scalar(String),
    Composite(Vec<(String, SettingNode)>),
}

impl SettingNode {
    pub fn scalar(text: impl Into<String>) -> Self {
        SettingNode::Scalar(text.into())
    }

    pub fn composite(children: Vec<(String, SettingNode)>) -> Self {
        SettingNode::Composite(children)
    }

    /// Canonical boolean scalar text: `True` / `False`.
    pub fn from_bool(value: bool) -> Self {
        SettingNode::Scalar(if value { "True" } else { "False" }.to_string())
    }

    /// Canonical integer scalar text: decimal digits.
    pub fn from_i32(value: i32) -> Self {
        SettingNode::Scalar(value.to_string())
    }

    // -- conversions (total: absence / unparsable text never errors) --------

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingNode::Scalar(s) => Some(s),
            SettingNode::Composite(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.as_text()?.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_text()?.trim().parse().ok()
    }

    pub fn text_or(&self, default: &str) -> String {
        self.as_text().unwrap_or(default).to_string()
    }

    pub fn bool_or(&self, default: bool) -> bool {
        self.as_bool().unwrap_or(default)
    }

    pub fn int_or(&self, default: i32) -> i32 {
        self.as_i32().unwrap_or(default)
    }

    // -- JSON form ----------------------------------------------------------

    /// JSON token form: scalar → string, composite → object in child order.
    pub fn to_json(&self) -> Value {
        match self {
            SettingNode::Scalar(s) => Value::String(s.clone()),
            SettingNode::Composite(children) => {
                let mut map = serde_json::Map::new();
                for (name, child) in children {
                    map.insert(name.clone(), child.to_json());
                }
                Value::Object(map)
            }
        }
    }

    /// Rebuild a node from its JSON token form.
    ///
    /// Strings map back directly; bools and numbers are canonicalized to
    /// scalar text; objects become composites in member order. Arrays have
    /// no element-form equivalent and are rejected.
    pub fn from_json(value: &Value) -> Result<Self, SettingError> {
        match value {
            Value::String(s) => Ok(SettingNode::Scalar(s.clone())),
            Value::Bool(b) => Ok(SettingNode::from_bool(*b)),
            Value::Number(n) => Ok(SettingNode::Scalar(n.to_string())),
            Value::Null => Ok(SettingNode::Scalar(String::new())),
            Value::Object(map) => {
                let mut children = Vec::with_capacity(map.len());
                for (name, child) in map {
                    children.push((name.clone(), SettingNode::from_json(child)?));
                }
                Ok(SettingNode::Composite(children))
            }
            Value::Array(_) => Err(SettingError::UnsupportedJson { kind: "array" }),
        }
    }

    // -- XML form -----------------------------------------------------------

    /// XML element form: element named `name`; scalar → inline text,
    /// composite → nested child elements in order.
    pub fn to_xml(&self, name: &str) -> Element {
        let mut element = Element::new(name);
        match self {
            SettingNode::Scalar(text) => {
                if !text.is_empty() {
                    element.children.push(XMLNode::Text(text.clone()));
                }
            }
            SettingNode::Composite(children) => {
                for (child_name, child) in children {
                    element
                        .children
                        .push(XMLNode::Element(child.to_xml(child_name)));
                }
            }
        }
        element
    }

    /// Rebuild a node from its XML element form. An element with no child
    /// elements is a scalar whose value is its concatenated text content.
    pub fn from_xml(element: &Element) -> Self {
        let mut children = Vec::new();
        let mut text = String::new();
        for node in &element.children {
            match node {
                XMLNode::Element(child) => {
                    children.push((child.name.clone(), SettingNode::from_xml(child)));
                }
                XMLNode::Text(t) => text.push_str(t),
                _ => {}
            }
        }
        if children.is_empty() {
            SettingNode::Scalar(text)
        } else {
            SettingNode::Composite(children)
        }
    }
}

// Wire payloads carry setting nodes as their JSON token form, so serde
// delegates to `to_json` / `from_json` rather than deriving a tagged enum.
impl Serialize for SettingNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettingNode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        SettingNode::from_json(&value).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Setting definitions
// ---------------------------------------------------------------------------

/// The scalar shape a defined setting must parse as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Int,
    Bool,
    Text,
}

/// A known setting: its name, shape, and default scalar text.
#[derive(Debug, Clone, Copy)]
pub struct SettingDefinition {
    pub name: &'static str,
    pub kind: SettingKind,
    pub default: &'static str,
}

/// Well-known setting names shared by the CLI, service, and orchestrator.
pub mod names {
    pub const SERVICE_PORT: &str = "ServicePort";
    pub const MAX_SYNC_CONNECTIONS: &str = "MaxSyncConnections";
    pub const IDLE_CONNECTION_SECONDS: &str = "IdleConnectionSeconds";
    pub const GC_PERIOD_SECONDS: &str = "GcPeriodSeconds";
    pub const RENAME_MAX_ATTEMPTS: &str = "RenameMaxAttempts";
    pub const RENAME_WAIT_MILLIS: &str = "RenameWaitMillis";
    pub const ALWAYS_RESIDENT: &str = "AlwaysResident";
    pub const REMOTE_LOGGING: &str = "RemoteLogging";
}

const DEFINITIONS: &[SettingDefinition] = &[
    SettingDefinition {
        name: names::SERVICE_PORT,
        kind: SettingKind::Int,
        default: "49374",
    },
    SettingDefinition {
        name: names::MAX_SYNC_CONNECTIONS,
        kind: SettingKind::Int,
        default: "4",
    },
    SettingDefinition {
        name: names::IDLE_CONNECTION_SECONDS,
        kind: SettingKind::Int,
        default: "300",
    },
    SettingDefinition {
        name: names::GC_PERIOD_SECONDS,
        kind: SettingKind::Int,
        default: "60",
    },
    SettingDefinition {
        name: names::RENAME_MAX_ATTEMPTS,
        kind: SettingKind::Int,
        default: "5",
    },
    SettingDefinition {
        name: names::RENAME_WAIT_MILLIS,
        kind: SettingKind::Int,
        default: "100",
    },
    SettingDefinition {
        name: names::ALWAYS_RESIDENT,
        kind: SettingKind::Text,
        default: "",
    },
    SettingDefinition {
        name: names::REMOTE_LOGGING,
        kind: SettingKind::Bool,
        default: "True",
    },
];

// ---------------------------------------------------------------------------
// SettingManager
// ---------------------------------------------------------------------------

/// Definition table plus ordered explicit overrides.
///
/// Defaults are never persisted: [`SettingManager::save_to_file`] writes only
/// the overrides, so a reload over a fresh definition table reproduces the
/// exact prior in-memory state.
#[derive(Debug, Clone, Default)]
pub struct SettingManager {
    overrides: Vec<(String, SettingNode)>,
}

impl SettingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn definition(name: &str) -> Option<&'static SettingDefinition> {
        DEFINITIONS.iter().find(|d| d.name == name)
    }

    pub fn definitions() -> &'static [SettingDefinition] {
        DEFINITIONS
    }

    /// Effective value: explicit override, else the definition default.
    /// Unknown names yield `None`.
    pub fn get(&self, name: &str) -> Option<SettingNode> {
        if let Some((_, node)) = self.overrides.iter().find(|(n, _)| n == name) {
            return Some(node.clone());
        }
        Self::definition(name).map(|d| SettingNode::Scalar(d.default.to_string()))
    }

    /// Set a value after validating it against the definition. Returns
    /// `false` (and retains the prior value) for unknown names, composite
    /// values on scalar settings, or text that fails the shape's parse.
    pub fn set(&mut self, name: &str, value: SettingNode) -> bool {
        let Some(definition) = Self::definition(name) else {
            tracing::warn!(setting = name, "rejecting unknown setting");
            return false;
        };
        let valid = match definition.kind {
            SettingKind::Int => value.as_i32().is_some(),
            SettingKind::Bool => value.as_bool().is_some(),
            SettingKind::Text => value.as_text().is_some(),
        };
        if !valid {
            tracing::warn!(setting = name, "rejecting unparsable setting value");
            return false;
        }

        if let Some(entry) = self.overrides.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value;
        } else {
            self.overrides.push((name.to_string(), value));
        }
        true
    }

    /// Typed getters used by the service loops; each re-reads the manager so
    /// changed values take effect without a restart.
    pub fn int(&self, name: &str, default: i32) -> i32 {
        self.get(name).map(|n| n.int_or(default)).unwrap_or(default)
    }

    pub fn bool(&self, name: &str, default: bool) -> bool {
        self.get(name)
            .map(|n| n.bool_or(default))
            .unwrap_or(default)
    }

    pub fn text(&self, name: &str, default: &str) -> String {
        self.get(name)
            .map(|n| n.text_or(default))
            .unwrap_or_else(|| default.to_string())
    }

    /// The full effective property set, definition order first, then any
    /// overrides without a definition (there are none today, but the shape
    /// keeps `GetAllSettings` total).
    pub fn all(&self) -> Vec<(String, SettingNode)> {
        DEFINITIONS
            .iter()
            .filter_map(|d| self.get(d.name).map(|node| (d.name.to_string(), node)))
            .collect()
    }

    // -- persistence --------------------------------------------------------

    /// Save overrides as a `<Settings>` XML document, atomically
    /// (`.tmp` + rename).
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingError> {
        let mut root = Element::new("Settings");
        for (name, node) in &self.overrides {
            root.children.push(XMLNode::Element(node.to_xml(name)));
        }

        let mut buffer = Vec::new();
        root.write(&mut buffer)?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let tmp = path.with_extension("xml.tmp");
        std::fs::write(&tmp, &buffer).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }

    /// Load overrides from a `<Settings>` XML document. A missing file is an
    /// empty manager, not an error.
    pub fn load_from_file(path: &Path) -> Result<Self, SettingError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let contents = std::fs::read(path).map_err(|e| io_err(path, e))?;
        let root = Element::parse(contents.as_slice())?;

        let mut manager = Self::new();
        for node in &root.children {
            if let XMLNode::Element(child) = node {
                manager
                    .overrides
                    .push((child.name.clone(), SettingNode::from_xml(child)));
            }
        }
        if has_duplicate_child_names(&manager.overrides) {
            // A hand-edited file can repeat a property; lookups take the
            // first occurrence.
            tracing::warn!(path = %path.display(), "settings file repeats a property name");
        }
        Ok(manager)
    }
}

/// Validate duplicate-free children for the JSON object form.
///
/// XML tolerates repeated child names; a JSON object cannot. The wire form
/// is only used for settings, whose children are unique by construction, so
/// a duplicate is a caller bug worth surfacing early.
pub fn has_duplicate_child_names(children: &[(String, SettingNode)]) -> bool {
    let mut seen = HashMap::new();
    children
        .iter()
        .any(|(name, _)| seen.insert(name.as_str(), ()).is_some())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> SettingNode {
        SettingNode::composite(vec![
            ("Port".to_string(), SettingNode::from_i32(1666)),
            ("Quiet".to_string(), SettingNode::from_bool(false)),
            (
                "Remap".to_string(),
                SettingNode::composite(vec![
                    ("From".to_string(), SettingNode::scalar("perforce:1666")),
                    ("To".to_string(), SettingNode::scalar("proxy:1666")),
                ]),
            ),
        ])
    }

    #[test]
    fn scalar_conversions_with_defaults() {
        assert_eq!(SettingNode::scalar("7").int_or(0), 7);
        assert_eq!(SettingNode::scalar("not a number").int_or(42), 42);
        assert!(SettingNode::scalar("True").bool_or(false));
        assert!(SettingNode::scalar("1").bool_or(false));
        assert!(!SettingNode::scalar("nope").bool_or(false));
        assert_eq!(
            SettingNode::composite(vec![]).text_or("fallback"),
            "fallback"
        );
    }

    #[test]
    fn canonical_scalar_text() {
        assert_eq!(SettingNode::from_bool(true).as_text(), Some("True"));
        assert_eq!(SettingNode::from_bool(false).as_text(), Some("False"));
        assert_eq!(SettingNode::from_i32(-12).as_text(), Some("-12"));
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let tree = sample_tree();
        let json = tree.to_json();
        let back = SettingNode::from_json(&json).expect("from_json");
        assert_eq!(back, tree);
        assert_eq!(back.to_json(), json);
    }

    #[test]
    fn json_canonicalizes_foreign_scalars() {
        let value: Value = serde_json::from_str(r#"{"A":true,"B":7}"#).expect("json");
        let node = SettingNode::from_json(&value).expect("from_json");
        let SettingNode::Composite(children) = &node else {
            panic!("expected composite");
        };
        assert_eq!(children[0].1.as_text(), Some("True"));
        assert_eq!(children[1].1.as_text(), Some("7"));
    }

    #[test]
    fn json_arrays_are_rejected() {
        let value: Value = serde_json::from_str("[1,2]").expect("json");
        assert!(SettingNode::from_json(&value).is_err());
    }

    #[test]
    fn xml_roundtrip_preserves_order_and_text() {
        let tree = sample_tree();
        let element = tree.to_xml("Settings");

        let mut buffer = Vec::new();
        element.write(&mut buffer).expect("write xml");
        let parsed = Element::parse(buffer.as_slice()).expect("parse xml");

        assert_eq!(SettingNode::from_xml(&parsed), tree);
    }

    #[test]
    fn xml_and_json_forms_agree() {
        let tree = sample_tree();
        let via_xml = {
            let element = tree.to_xml("Settings");
            let mut buffer = Vec::new();
            element.write(&mut buffer).expect("write xml");
            let parsed = Element::parse(buffer.as_slice()).expect("parse xml");
            SettingNode::from_xml(&parsed)
        };
        assert_eq!(via_xml.to_json(), tree.to_json());
    }

    #[test]
    fn manager_returns_defaults_for_unset_names() {
        let manager = SettingManager::new();
        let port = manager.get(names::SERVICE_PORT).expect("definition");
        assert_eq!(port.as_i32(), Some(49374));
        assert!(manager.get("NoSuchSetting").is_none());
    }

    #[test]
    fn set_rejects_unknown_and_unparsable() {
        let mut manager = SettingManager::new();
        assert!(!manager.set("NoSuchSetting", SettingNode::scalar("1")));

        assert!(manager.set(names::MAX_SYNC_CONNECTIONS, SettingNode::scalar("7")));
        assert_eq!(manager.int(names::MAX_SYNC_CONNECTIONS, 0), 7);

        // Non-numeric value is rejected and the prior value retained.
        assert!(!manager.set(names::MAX_SYNC_CONNECTIONS, SettingNode::scalar("lots")));
        assert_eq!(manager.int(names::MAX_SYNC_CONNECTIONS, 0), 7);

        // Composite values are not valid for scalar settings.
        assert!(!manager.set(
            names::MAX_SYNC_CONNECTIONS,
            SettingNode::composite(vec![("X".to_string(), SettingNode::scalar("1"))])
        ));
        assert_eq!(manager.int(names::MAX_SYNC_CONNECTIONS, 0), 7);
    }

    #[test]
    fn duplicate_child_names_detected() {
        let dup = vec![
            ("A".to_string(), SettingNode::scalar("1")),
            ("A".to_string(), SettingNode::scalar("2")),
        ];
        assert!(has_duplicate_child_names(&dup));
        let unique = vec![
            ("A".to_string(), SettingNode::scalar("1")),
            ("B".to_string(), SettingNode::scalar("2")),
        ];
        assert!(!has_duplicate_child_names(&unique));
    }
}
