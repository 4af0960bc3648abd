//! Relationship implementation for the property graph

use super::property::{PropertyMap, PropertyValue};
use super::types::{Direction, NodeId, RelationshipId, RelationshipType};
use serde::{Deserialize, Serialize};

/// A directed, typed relationship between two nodes
///
/// Type and endpoints are fixed at creation; only properties change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier for this relationship
    pub id: RelationshipId,

    /// Commit version that produced this state
    pub version: u64,

    /// Start node (relationship goes FROM this node)
    pub start: NodeId,

    /// End node (relationship goes TO this node)
    pub end: NodeId,

    /// Type of relationship (e.g., "PLAYED", "COMPANION_OF")
    pub rel_type: RelationshipType,

    /// Properties associated with this relationship
    pub properties: PropertyMap,

    /// Commit timestamp of the creating transaction (Unix milliseconds)
    pub created_at: i64,
}

impl Relationship {
    pub fn new(
        id: RelationshipId,
        start: NodeId,
        end: NodeId,
        rel_type: impl Into<RelationshipType>,
        version: u64,
        timestamp: i64,
    ) -> Self {
        Relationship {
            id,
            version,
            start,
            end,
            rel_type: rel_type.into(),
            properties: PropertyMap::new(),
            created_at: timestamp,
        }
    }

    pub fn start_node(&self) -> NodeId {
        self.start
    }

    pub fn end_node(&self) -> NodeId {
        self.end
    }

    /// The endpoint opposite `node`, or `None` if `node` is not an endpoint
    pub fn other_node(&self, node: NodeId) -> Option<NodeId> {
        if self.start == node {
            Some(self.end)
        } else if self.end == node {
            Some(self.start)
        } else {
            None
        }
    }

    /// Type filter where an empty slice accepts every type
    pub fn matches_types(&self, types: &[RelationshipType]) -> bool {
        types.is_empty() || types.contains(&self.rel_type)
    }

    /// Whether this relationship is reachable from `node` walking `direction`
    pub fn matches_direction(&self, node: NodeId, direction: Direction) -> bool {
        match direction {
            Direction::Outgoing => self.starts_from(node),
            Direction::Incoming => self.ends_at(node),
            Direction::Both => self.starts_from(node) || self.ends_at(node),
        }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn remove_property(&mut self, key: &str) -> Option<PropertyValue> {
        self.properties.remove(key)
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn property_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.properties.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Check if relationship connects two nodes (in either direction)
    pub fn connects(&self, node1: NodeId, node2: NodeId) -> bool {
        (self.start == node1 && self.end == node2) || (self.start == node2 && self.end == node1)
    }

    pub fn starts_from(&self, node: NodeId) -> bool {
        self.start == node
    }

    pub fn ends_at(&self, node: NodeId) -> bool {
        self.end == node
    }
}

impl PartialEq for Relationship {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Relationship {}

impl std::hash::Hash for Relationship {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
