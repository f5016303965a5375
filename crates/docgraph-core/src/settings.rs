//! User-declared mappings from front matter to graph structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::convert::PropertyType;
use crate::error::{DocGraphError, DocGraphResult};
use crate::item::model::SyncKind;
use crate::names::NameSet;
use crate::validate::is_valid_schema_name;

fn enabled_by_default() -> bool {
    true
}

/// Front-matter property → node property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMapping {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub value_type: PropertyType,
    /// Node property name; defaults to the front-matter name.
    #[serde(default)]
    pub target: Option<String>,
}

impl PropertyMapping {
    pub fn new(value_type: PropertyType) -> Self {
        Self {
            enabled: true,
            value_type,
            target: None,
        }
    }

    pub fn graph_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.target.as_deref().unwrap_or(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
}

/// Front-matter link property → relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMapping {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub direction: Direction,
}

impl RelationshipMapping {
    pub fn new(relationship_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            enabled: true,
            relationship_type: relationship_type.into(),
            direction,
        }
    }
}

/// Label applied to documents whose front matter matches.
///
/// The label itself is the mapping's name. A document matches when `property`
/// is present and truthy, or, with `value` set, equal to (or a list containing)
/// that value, compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMapping {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub property: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl LabelMapping {
    pub fn new(property: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            enabled: true,
            property: property.into(),
            value: value.map(str::to_string),
        }
    }

    pub fn matches(&self, raw: &serde_json::Value) -> bool {
        use serde_json::Value;
        match &self.value {
            None => match raw {
                Value::Null => false,
                Value::Bool(b) => *b,
                Value::String(s) => !s.trim().is_empty(),
                Value::Array(items) => !items.is_empty(),
                _ => true,
            },
            Some(expected) => match raw {
                Value::String(s) => s.trim().eq_ignore_ascii_case(expected),
                Value::Array(items) => items
                    .iter()
                    .any(|item| item.as_str().is_some_and(|s| s.trim().eq_ignore_ascii_case(expected))),
                Value::Number(n) => n.to_string() == *expected,
                Value::Bool(b) => b.to_string().eq_ignore_ascii_case(expected),
                _ => false,
            },
        }
    }
}

/// All sync mappings plus graph layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Label carried by every document node.
    pub node_label: String,
    /// Node property holding the document id.
    pub key_property: String,
    /// Overrides the computed batch size when set.
    pub batch_size: Option<usize>,
    pub properties: BTreeMap<String, PropertyMapping>,
    pub relationships: BTreeMap<String, RelationshipMapping>,
    pub labels: BTreeMap<String, LabelMapping>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            node_label: "Document".to_string(),
            key_property: "key".to_string(),
            batch_size: None,
            properties: BTreeMap::new(),
            relationships: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

impl SyncSettings {
    /// Names of every enabled mapping of a kind.
    pub fn enabled_names(&self, kind: SyncKind) -> NameSet {
        match kind {
            SyncKind::NodeProperty => enabled(&self.properties, |m| m.enabled),
            SyncKind::Relationship => enabled(&self.relationships, |m| m.enabled),
            SyncKind::Label => enabled(&self.labels, |m| m.enabled),
        }
    }

    pub fn is_enabled(&self, kind: SyncKind, name: &str) -> bool {
        match kind {
            SyncKind::NodeProperty => self.properties.get(name).is_some_and(|m| m.enabled),
            SyncKind::Relationship => self.relationships.get(name).is_some_and(|m| m.enabled),
            SyncKind::Label => self.labels.get(name).is_some_and(|m| m.enabled),
        }
    }

    /// Flip a mapping's enabled flag. Errors if the mapping is not declared.
    pub fn set_enabled(&mut self, kind: SyncKind, name: &str, on: bool) -> DocGraphResult<()> {
        let flag = match kind {
            SyncKind::NodeProperty => self.properties.get_mut(name).map(|m| &mut m.enabled),
            SyncKind::Relationship => self.relationships.get_mut(name).map(|m| &mut m.enabled),
            SyncKind::Label => self.labels.get_mut(name).map(|m| &mut m.enabled),
        };
        match flag {
            Some(flag) => {
                *flag = on;
                Ok(())
            }
            None => Err(DocGraphError::MappingNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Check graph layout names that end up inside statements.
    pub fn validate(&self) -> DocGraphResult<()> {
        if !is_valid_schema_name(&self.node_label) {
            return Err(DocGraphError::Config(format!("invalid node label '{}'", self.node_label)));
        }
        if !is_valid_schema_name(&self.key_property) {
            return Err(DocGraphError::Config(format!("invalid key property '{}'", self.key_property)));
        }
        if self.batch_size == Some(0) {
            return Err(DocGraphError::Config("batch_size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

fn enabled<M>(mappings: &BTreeMap<String, M>, is_on: impl Fn(&M) -> bool) -> NameSet {
    mappings
        .iter()
        .filter(|(_, m)| is_on(m))
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> SyncSettings {
        let mut s = SyncSettings::default();
        s.properties.insert("Status".into(), PropertyMapping::new(PropertyType::String));
        let mut off = PropertyMapping::new(PropertyType::Integer);
        off.enabled = false;
        s.properties.insert("Priority".into(), off);
        s.relationships
            .insert("related".into(), RelationshipMapping::new("RELATED_TO", Direction::Outgoing));
        s.labels.insert("DONE".into(), LabelMapping::new("status", Some("done")));
        s
    }

    #[test]
    fn test_enabled_names() {
        let s = settings();
        assert_eq!(s.enabled_names(SyncKind::NodeProperty).to_vec(), vec!["Status"]);
        assert_eq!(s.enabled_names(SyncKind::Relationship).to_vec(), vec!["related"]);
        assert!(s.is_enabled(SyncKind::Label, "DONE"));
        assert!(!s.is_enabled(SyncKind::NodeProperty, "Priority"));
    }

    #[test]
    fn test_set_enabled() {
        let mut s = settings();
        s.set_enabled(SyncKind::NodeProperty, "Priority", true).unwrap();
        assert_eq!(s.enabled_names(SyncKind::NodeProperty).len(), 2);
        assert!(matches!(
            s.set_enabled(SyncKind::Label, "NOPE", true),
            Err(DocGraphError::MappingNotFound { .. })
        ));
    }

    #[test]
    fn test_label_matching() {
        let done = LabelMapping::new("status", Some("done"));
        assert!(done.matches(&json!("Done")));
        assert!(done.matches(&json!(["wip", "DONE"])));
        assert!(!done.matches(&json!("open")));

        let flag = LabelMapping::new("archived", None);
        assert!(flag.matches(&json!(true)));
        assert!(!flag.matches(&json!(false)));
        assert!(!flag.matches(&json!("")));
        assert!(flag.matches(&json!("yes")));
    }

    #[test]
    fn test_validate_layout() {
        let mut s = SyncSettings::default();
        assert!(s.validate().is_ok());
        s.node_label = "Bad Label".into();
        assert!(s.validate().is_err());
        s.node_label = "Note".into();
        s.batch_size = Some(0);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_deserialize_from_json_defaults() {
        let s: SyncSettings = serde_json::from_value(json!({
            "properties": { "Status": { "type": "string" }, "Due": { "type": "date", "target": "due" } },
            "relationships": { "related": { "type": "RELATED_TO", "direction": "incoming" } }
        }))
        .unwrap();
        assert_eq!(s.node_label, "Document");
        assert!(s.properties["Status"].enabled);
        assert_eq!(s.properties["Due"].graph_name("Due"), "due");
        assert_eq!(s.relationships["related"].direction, Direction::Incoming);
    }
}
