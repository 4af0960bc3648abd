//! Manager for named and auto indexes
//!
//! Handles creation of and access to indexes, one namespace per entity
//! class. The manager lives inside the graph store and is only mutated while
//! a commit is being applied, so index changes become visible atomically
//! with the storage changes of the same transaction.

use super::inverted::InvertedIndex;
use super::wildcard::WildcardPattern;
use crate::error::{GraphError, GraphResult};
use crate::graph::{EntityClass, EntityId, PropertyValue};
use std::collections::{HashMap, HashSet};

/// Name of the index maintained automatically over node properties
pub const NODE_AUTO_INDEX: &str = "node_auto_index";

/// Name of the index maintained automatically over relationship properties
pub const RELATIONSHIP_AUTO_INDEX: &str = "relationship_auto_index";

/// Manager for all indexes
#[derive(Debug, Default)]
pub struct IndexManager {
    node_indexes: HashMap<String, InvertedIndex>,
    relationship_indexes: HashMap<String, InvertedIndex>,
    node_auto_keys: HashSet<String>,
    relationship_auto_keys: HashSet<String>,
}

impl IndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager whose auto indexes track the given property keys
    pub fn with_auto_keys<N, R>(node_keys: N, relationship_keys: R) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        let mut manager = Self {
            node_auto_keys: node_keys.into_iter().map(Into::into).collect(),
            relationship_auto_keys: relationship_keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        };
        if !manager.node_auto_keys.is_empty() {
            manager.create_index(EntityClass::Node, NODE_AUTO_INDEX, 0);
        }
        if !manager.relationship_auto_keys.is_empty() {
            manager.create_index(EntityClass::Relationship, RELATIONSHIP_AUTO_INDEX, 0);
        }
        manager
    }

    fn namespace(&self, class: EntityClass) -> &HashMap<String, InvertedIndex> {
        match class {
            EntityClass::Node => &self.node_indexes,
            EntityClass::Relationship => &self.relationship_indexes,
        }
    }

    fn namespace_mut(&mut self, class: EntityClass) -> &mut HashMap<String, InvertedIndex> {
        match class {
            EntityClass::Node => &mut self.node_indexes,
            EntityClass::Relationship => &mut self.relationship_indexes,
        }
    }

    /// Create an index; creating an existing index is a no-op
    pub fn create_index(&mut self, class: EntityClass, name: &str, version: u64) -> bool {
        let namespace = self.namespace_mut(class);
        if namespace.contains_key(name) {
            return false;
        }
        namespace.insert(name.to_string(), InvertedIndex::new(name, class, version));
        true
    }

    /// Check if an index exists
    pub fn has_index(&self, class: EntityClass, name: &str) -> bool {
        self.namespace(class).contains_key(name)
    }

    /// Get index for querying
    pub fn get_index(&self, class: EntityClass, name: &str) -> Option<&InvertedIndex> {
        self.namespace(class).get(name)
    }

    pub fn add(
        &mut self,
        name: &str,
        entity: EntityId,
        key: &str,
        value: &PropertyValue,
        version: u64,
    ) -> GraphResult<bool> {
        let index = self
            .namespace_mut(entity.class())
            .get_mut(name)
            .ok_or_else(|| missing_index(entity.class(), name))?;
        Ok(index.insert(entity, key, value, version))
    }

    pub fn remove(
        &mut self,
        name: &str,
        entity: EntityId,
        key: Option<&str>,
        value: Option<&PropertyValue>,
        version: u64,
    ) -> GraphResult<usize> {
        let index = self
            .namespace_mut(entity.class())
            .get_mut(name)
            .ok_or_else(|| missing_index(entity.class(), name))?;
        Ok(index.remove(entity, key, value, version))
    }

    /// Remove every entry of `entity` from every index of its class
    pub fn remove_entity(&mut self, entity: EntityId, version: u64) -> usize {
        self.namespace_mut(entity.class())
            .values_mut()
            .map(|index| index.remove(entity, None, None, version))
            .sum()
    }

    /// Live entries of `entity` across all indexes of its class
    pub fn live_entries(&self, entity: EntityId) -> usize {
        self.namespace(entity.class())
            .values()
            .map(|index| index.live_entries(entity))
            .sum()
    }

    pub fn is_auto_indexed(&self, class: EntityClass, key: &str) -> bool {
        match class {
            EntityClass::Node => self.node_auto_keys.contains(key),
            EntityClass::Relationship => self.relationship_auto_keys.contains(key),
        }
    }

    pub fn auto_index_name(class: EntityClass) -> &'static str {
        match class {
            EntityClass::Node => NODE_AUTO_INDEX,
            EntityClass::Relationship => RELATIONSHIP_AUTO_INDEX,
        }
    }

    /// Track a property write in the auto index of the entity's class
    pub fn auto_index_set(
        &mut self,
        entity: EntityId,
        key: &str,
        old: Option<&PropertyValue>,
        new: &PropertyValue,
        version: u64,
    ) {
        let class = entity.class();
        if !self.is_auto_indexed(class, key) {
            return;
        }
        let name = Self::auto_index_name(class);
        if let Some(index) = self.namespace_mut(class).get_mut(name) {
            if let Some(old) = old {
                index.remove(entity, Some(key), Some(old), version);
            }
            index.insert(entity, key, new, version);
        }
    }

    /// Track a property removal in the auto index of the entity's class
    pub fn auto_index_remove(&mut self, entity: EntityId, key: &str, version: u64) {
        let class = entity.class();
        if !self.is_auto_indexed(class, key) {
            return;
        }
        let name = Self::auto_index_name(class);
        if let Some(index) = self.namespace_mut(class).get_mut(name) {
            index.remove(entity, Some(key), None, version);
        }
    }

    /// Exact lookup; an index that does not exist at `at` has no hits
    pub fn get(&self, class: EntityClass, name: &str, key: &str, value: &PropertyValue, at: u64) -> Vec<EntityId> {
        self.get_index(class, name)
            .filter(|index| index.exists_at(at))
            .map(|index| index.get(key, value, at))
            .unwrap_or_default()
    }

    /// Wildcard lookup; an index that does not exist at `at` has no hits
    pub fn query(
        &self,
        class: EntityClass,
        name: &str,
        key: &str,
        pattern: &WildcardPattern,
        at: u64,
    ) -> Vec<EntityId> {
        self.get_index(class, name)
            .filter(|index| index.exists_at(at))
            .map(|index| index.query(key, pattern, at))
            .unwrap_or_default()
    }

    pub fn vacuum(&mut self, horizon: u64) -> usize {
        self.node_indexes
            .values_mut()
            .chain(self.relationship_indexes.values_mut())
            .map(|index| index.vacuum(horizon))
            .sum()
    }
}

fn missing_index(class: EntityClass, name: &str) -> GraphError {
    GraphError::IndexInconsistency(format!("{} index '{}' does not exist", class, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeId, RelationshipId};

    #[test]
    fn test_create_index_per_class() {
        let mut manager = IndexManager::new();
        assert!(manager.create_index(EntityClass::Node, "characters", 1));
        assert!(!manager.create_index(EntityClass::Node, "characters", 2));
        assert!(manager.has_index(EntityClass::Node, "characters"));
        assert!(!manager.has_index(EntityClass::Relationship, "characters"));
    }

    #[test]
    fn test_add_requires_index() {
        let mut manager = IndexManager::new();
        let result = manager.add("missing", NodeId::new(1).into(), "k", &"v".into(), 1);
        assert!(matches!(result, Err(GraphError::IndexInconsistency(_))));
    }

    #[test]
    fn test_remove_entity_across_indexes() {
        let mut manager = IndexManager::new();
        let doctor: EntityId = NodeId::new(1).into();
        manager.create_index(EntityClass::Node, "characters", 1);
        manager.create_index(EntityClass::Node, "heroes", 1);
        manager.add("characters", doctor, "character", &"Doctor".into(), 1).unwrap();
        manager.add("heroes", doctor, "name", &"Doctor".into(), 1).unwrap();
        assert_eq!(manager.live_entries(doctor), 2);

        assert_eq!(manager.remove_entity(doctor, 2), 2);
        assert_eq!(manager.live_entries(doctor), 0);
        assert!(manager.get(EntityClass::Node, "characters", "character", &"Doctor".into(), 2).is_empty());
        assert_eq!(
            manager.get(EntityClass::Node, "characters", "character", &"Doctor".into(), 1),
            vec![doctor]
        );
    }

    #[test]
    fn test_auto_index_tracks_property_changes() {
        let mut manager = IndexManager::with_auto_keys(["name"], Vec::<String>::new());
        let node: EntityId = NodeId::new(1).into();
        assert!(manager.has_index(EntityClass::Node, NODE_AUTO_INDEX));
        assert!(!manager.has_index(EntityClass::Relationship, RELATIONSHIP_AUTO_INDEX));

        manager.auto_index_set(node, "name", None, &"Rose".into(), 1);
        manager.auto_index_set(node, "name", Some(&"Rose".into()), &"Bad Wolf".into(), 2);
        manager.auto_index_set(node, "ignored", None, &"x".into(), 2);

        let get = |value: &str, at| manager.get(EntityClass::Node, NODE_AUTO_INDEX, "name", &value.into(), at);
        assert_eq!(get("Rose", 1), vec![node]);
        assert!(get("Rose", 2).is_empty());
        assert_eq!(get("Bad Wolf", 2), vec![node]);
        assert!(manager.get(EntityClass::Node, NODE_AUTO_INDEX, "ignored", &"x".into(), 2).is_empty());

        manager.auto_index_remove(node, "name", 3);
        assert!(manager
            .get(EntityClass::Node, NODE_AUTO_INDEX, "name", &"Bad Wolf".into(), 3)
            .is_empty());
    }

    #[test]
    fn test_index_created_later_is_invisible_to_older_reads() {
        let mut manager = IndexManager::new();
        let rel: EntityId = RelationshipId::new(1).into();
        manager.create_index(EntityClass::Relationship, "regenerations", 5);
        manager.add("regenerations", rel, "year", &1966.into(), 5).unwrap();

        assert!(manager.get(EntityClass::Relationship, "regenerations", "year", &1966.into(), 4).is_empty());
        assert_eq!(manager.get(EntityClass::Relationship, "regenerations", "year", &1966.into(), 5), vec![rel]);
    }
}
