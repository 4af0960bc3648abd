//! Core type definitions for the graph database

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn new(id: u64) -> Self {
        NodeId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node[{}]", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

/// Unique identifier for a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct RelationshipId(pub u64);

impl RelationshipId {
    pub fn new(id: u64) -> Self {
        RelationshipId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relationship[{}]", self.0)
    }
}

impl From<u64> for RelationshipId {
    fn from(id: u64) -> Self {
        RelationshipId(id)
    }
}

/// Either kind of graph entity. Properties, indexes and conflict tracking
/// are all keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum EntityId {
    Node(NodeId),
    Relationship(RelationshipId),
}

impl EntityId {
    pub fn class(&self) -> EntityClass {
        match self {
            EntityId::Node(_) => EntityClass::Node,
            EntityId::Relationship(_) => EntityClass::Relationship,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            EntityId::Node(id) => Some(*id),
            EntityId::Relationship(_) => None,
        }
    }

    pub fn as_relationship(&self) -> Option<RelationshipId> {
        match self {
            EntityId::Relationship(id) => Some(*id),
            EntityId::Node(_) => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Node(id) => write!(f, "{}", id),
            EntityId::Relationship(id) => write!(f, "{}", id),
        }
    }
}

impl From<NodeId> for EntityId {
    fn from(id: NodeId) -> Self {
        EntityId::Node(id)
    }
}

impl From<RelationshipId> for EntityId {
    fn from(id: RelationshipId) -> Self {
        EntityId::Relationship(id)
    }
}

/// The two entity classes an index can be declared over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityClass {
    Node,
    Relationship,
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityClass::Node => write!(f, "node"),
            EntityClass::Relationship => write!(f, "relationship"),
        }
    }
}

/// Traversal direction relative to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Both => Direction::Both,
        }
    }
}

#[derive(Default)]
struct TypeRegistry {
    names: Vec<Arc<str>>,
    ids: HashMap<Arc<str>, u32>,
}

static TYPE_REGISTRY: LazyLock<RwLock<TypeRegistry>> = LazyLock::new(Default::default);

/// Relationship type (e.g. "PLAYED", "COMPANION_OF")
///
/// Types form an open set: any name can be used, and each distinct name is
/// interned once per process so comparisons are integer comparisons.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationshipType(u32);

impl RelationshipType {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if let Some(id) = TYPE_REGISTRY.read().ids.get(name) {
            return RelationshipType(*id);
        }

        let mut registry = TYPE_REGISTRY.write();
        if let Some(id) = registry.ids.get(name) {
            return RelationshipType(*id);
        }
        let id = registry.names.len() as u32;
        let interned: Arc<str> = Arc::from(name);
        registry.names.push(interned.clone());
        registry.ids.insert(interned, id);
        RelationshipType(id)
    }

    pub fn name(&self) -> Arc<str> {
        let registry = TYPE_REGISTRY.read();
        registry
            .names
            .get(self.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from(""))
    }
}

impl fmt::Debug for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelationshipType({})", self.name())
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl From<&str> for RelationshipType {
    fn from(s: &str) -> Self {
        RelationshipType::new(s)
    }
}

impl From<String> for RelationshipType {
    fn from(s: String) -> Self {
        RelationshipType::new(s)
    }
}

// Interned ids are process-local, so the log stores the name.
impl Serialize for RelationshipType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for RelationshipType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(RelationshipType::new(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id() {
        let id = NodeId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(format!("{}", id), "Node[42]");

        let id2: NodeId = 100.into();
        assert_eq!(id2.as_u64(), 100);
    }

    #[test]
    fn test_relationship_id() {
        let id = RelationshipId::new(99);
        assert_eq!(id.as_u64(), 99);
        assert_eq!(format!("{}", id), "Relationship[99]");
    }

    #[test]
    fn test_entity_id_class() {
        let node: EntityId = NodeId::new(1).into();
        let rel: EntityId = RelationshipId::new(1).into();
        assert_eq!(node.class(), EntityClass::Node);
        assert_eq!(rel.class(), EntityClass::Relationship);
        assert_ne!(node, rel);
        assert_eq!(node.as_node(), Some(NodeId::new(1)));
        assert_eq!(node.as_relationship(), None);
    }

    #[test]
    fn test_relationship_type_interning() {
        let played = RelationshipType::new("PLAYED");
        let again: RelationshipType = "PLAYED".into();
        let other = RelationshipType::new("COMPANION_OF");

        assert_eq!(played, again);
        assert_ne!(played, other);
        assert_eq!(played.name().as_ref(), "PLAYED");
        assert_eq!(format!("{}", other), "COMPANION_OF");
    }

    #[test]
    fn test_relationship_type_serde_uses_name() {
        let rel_type = RelationshipType::new("REGENERATED_TO");
        let json = serde_json::to_string(&rel_type).unwrap();
        assert_eq!(json, "\"REGENERATED_TO\"");
        let back: RelationshipType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rel_type);
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Outgoing.reverse(), Direction::Incoming);
        assert_eq!(Direction::Both.reverse(), Direction::Both);
    }
}
