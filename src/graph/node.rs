//! Node implementation for the property graph

use super::property::{PropertyMap, PropertyValue};
use super::types::NodeId;
use serde::{Deserialize, Serialize};

/// A node in the property graph
///
/// A `Node` is a copy of one committed version (or of a transaction's
/// pending view). Holding one never keeps the underlying entity alive; use
/// the database or a transaction to re-read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node
    pub id: NodeId,

    /// Commit version that produced this state
    pub version: u64,

    /// Properties associated with this node
    pub properties: PropertyMap,

    /// Commit timestamp of the creating transaction (Unix milliseconds)
    pub created_at: i64,

    /// Commit timestamp of the last modification (Unix milliseconds)
    pub updated_at: i64,
}

impl Node {
    /// Create a new node without properties
    pub fn new(id: NodeId, version: u64, timestamp: i64) -> Self {
        Node {
            id,
            version,
            properties: PropertyMap::new(),
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Set a property value
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    /// Get a property value
    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Remove a property
    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.remove(key)
    }

    /// Check if property exists
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Property keys in sorted order
    pub fn property_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.properties.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Render the property map as JSON, for debugging and export
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.properties {
            let json = match value {
                PropertyValue::String(s) => serde_json::Value::from(s.clone()),
                PropertyValue::Integer(i) => serde_json::Value::from(*i),
                PropertyValue::Float(f) => serde_json::Value::from(*f),
                PropertyValue::Boolean(b) => serde_json::Value::from(*b),
            };
            map.insert(key.clone(), json);
        }
        serde_json::json!({ "id": self.id.as_u64(), "properties": map })
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
