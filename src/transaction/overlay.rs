//! Per-transaction overlay of pending changes
//!
//! Pending writes are kept keyed by entity id and layered over the
//! transaction's snapshot on every read. Nothing touches the shared store
//! until commit; rollback simply drops the overlay.

use crate::graph::{
    ChangeSet, Direction, EntityClass, EntityId, Mutation, Node, NodeId, PropertyValue, Relationship,
    RelationshipId, RelationshipType,
};
use crate::index::WildcardPattern;
use std::collections::{HashMap, HashSet};

/// A pending index change, kept for reads inside the transaction
#[derive(Debug, Clone)]
enum IndexOp {
    Add {
        entity: EntityId,
        key: String,
        term: String,
    },
    Remove {
        entity: EntityId,
        key: Option<String>,
        term: Option<String>,
    },
}

/// Which pending index entries a lookup should consider
pub(crate) enum TermMatch<'a> {
    Exact(&'a str),
    Pattern(&'a WildcardPattern),
}

impl TermMatch<'_> {
    fn matches(&self, term: &str) -> bool {
        match self {
            TermMatch::Exact(expected) => *expected == term,
            TermMatch::Pattern(pattern) => pattern.matches(term),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Overlay {
    changes: ChangeSet,
    created_nodes: HashSet<NodeId>,
    created_relationships: HashMap<RelationshipId, Relationship>,
    /// key -> `Some(value)` set, `None` removed
    properties: HashMap<EntityId, HashMap<String, Option<PropertyValue>>>,
    deleted: HashSet<EntityId>,
    created_indexes: HashSet<(EntityClass, String)>,
    index_ops: HashMap<(EntityClass, String), Vec<IndexOp>>,
}

impl Overlay {
    pub(crate) fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub(crate) fn is_created(&self, entity: EntityId) -> bool {
        match entity {
            EntityId::Node(id) => self.created_nodes.contains(&id),
            EntityId::Relationship(id) => self.created_relationships.contains_key(&id),
        }
    }

    pub(crate) fn create_node(&mut self, id: NodeId) {
        self.changes.push(Mutation::CreateNode { id });
        self.created_nodes.insert(id);
    }

    pub(crate) fn create_relationship(&mut self, rel: Relationship) {
        self.changes.push(Mutation::CreateRelationship {
            id: rel.id,
            start: rel.start,
            end: rel.end,
            rel_type: rel.rel_type,
        });
        self.created_relationships.insert(rel.id, rel);
    }

    pub(crate) fn set_property(&mut self, entity: EntityId, key: String, value: PropertyValue) {
        self.properties
            .entry(entity)
            .or_default()
            .insert(key.clone(), Some(value.clone()));
        self.changes.push(Mutation::SetProperty { entity, key, value });
    }

    pub(crate) fn remove_property(&mut self, entity: EntityId, key: String) {
        self.properties.entry(entity).or_default().insert(key.clone(), None);
        self.changes.push(Mutation::RemoveProperty { entity, key });
    }

    pub(crate) fn delete(&mut self, entity: EntityId) {
        self.deleted.insert(entity);
        self.changes.push(match entity {
            EntityId::Node(id) => Mutation::DeleteNode { id },
            EntityId::Relationship(id) => Mutation::DeleteRelationship { id },
        });
    }

    /// Record an index creation unless this transaction already did
    pub(crate) fn create_index(&mut self, class: EntityClass, name: &str) {
        if self.created_indexes.insert((class, name.to_string())) {
            self.changes.push(Mutation::CreateIndex {
                class,
                name: name.to_string(),
            });
        }
    }

    pub(crate) fn has_created_index(&self, class: EntityClass, name: &str) -> bool {
        self.created_indexes.contains(&(class, name.to_string()))
    }

    pub(crate) fn index_add(&mut self, index: &str, entity: EntityId, key: &str, value: PropertyValue) {
        self.index_ops
            .entry((entity.class(), index.to_string()))
            .or_default()
            .push(IndexOp::Add {
                entity,
                key: key.to_string(),
                term: value.index_term(),
            });
        self.changes.push(Mutation::IndexAdd {
            index: index.to_string(),
            entity,
            key: key.to_string(),
            value,
        });
    }

    pub(crate) fn index_remove(
        &mut self,
        index: &str,
        entity: EntityId,
        key: Option<&str>,
        value: Option<PropertyValue>,
    ) {
        self.index_ops
            .entry((entity.class(), index.to_string()))
            .or_default()
            .push(IndexOp::Remove {
                entity,
                key: key.map(str::to_string),
                term: value.as_ref().map(PropertyValue::index_term),
            });
        self.changes.push(Mutation::IndexRemove {
            index: index.to_string(),
            entity,
            key: key.map(str::to_string),
            value,
        });
    }

    /// Mirror an auto index update the store will make at commit, so reads
    /// inside the transaction see it; no mutation is recorded
    pub(crate) fn shadow_auto_index(
        &mut self,
        index: &str,
        entity: EntityId,
        key: &str,
        old: Option<&PropertyValue>,
        new: Option<&PropertyValue>,
    ) {
        let ops = self.index_ops.entry((entity.class(), index.to_string())).or_default();
        if let Some(old) = old {
            ops.push(IndexOp::Remove {
                entity,
                key: Some(key.to_string()),
                term: Some(old.index_term()),
            });
        }
        if let Some(new) = new {
            ops.push(IndexOp::Add {
                entity,
                key: key.to_string(),
                term: new.index_term(),
            });
        }
    }

    /// Replay this transaction's index changes over committed hits
    pub(crate) fn index_hits(
        &self,
        class: EntityClass,
        index: &str,
        key: &str,
        matcher: TermMatch<'_>,
        committed: Vec<EntityId>,
    ) -> Vec<EntityId> {
        let mut hits = committed;
        if let Some(ops) = self.index_ops.get(&(class, index.to_string())) {
            for op in ops {
                match op {
                    IndexOp::Add { entity, key: k, term } => {
                        if k == key && matcher.matches(term) && !hits.contains(entity) {
                            hits.push(*entity);
                        }
                    }
                    IndexOp::Remove { entity, key: k, term } => {
                        let key_matches = k.as_deref().map_or(true, |k| k == key);
                        let term_matches = term.as_deref().map_or(true, |t| matcher.matches(t));
                        if key_matches && term_matches {
                            hits.retain(|hit| hit != entity);
                        }
                    }
                }
            }
        }
        hits.retain(|hit| !self.deleted.contains(hit));
        hits
    }

    fn apply_properties(&self, entity: EntityId, properties: &mut crate::graph::PropertyMap) {
        if let Some(pending) = self.properties.get(&entity) {
            for (key, value) in pending {
                match value {
                    Some(value) => {
                        properties.insert(key.clone(), value.clone());
                    }
                    None => {
                        properties.remove(key);
                    }
                }
            }
        }
    }

    /// The node as this transaction sees it, given its committed state
    pub(crate) fn node_view(&self, id: NodeId, committed: Option<Node>) -> Option<Node> {
        let entity = EntityId::Node(id);
        if self.deleted.contains(&entity) {
            return None;
        }
        let mut node = if self.created_nodes.contains(&id) {
            Node::new(id, 0, 0)
        } else {
            committed?
        };
        self.apply_properties(entity, &mut node.properties);
        Some(node)
    }

    /// The relationship as this transaction sees it, given its committed state
    pub(crate) fn relationship_view(&self, id: RelationshipId, committed: Option<Relationship>) -> Option<Relationship> {
        let entity = EntityId::Relationship(id);
        if self.deleted.contains(&entity) {
            return None;
        }
        let mut rel = match self.created_relationships.get(&id) {
            Some(created) => created.clone(),
            None => committed?,
        };
        self.apply_properties(entity, &mut rel.properties);
        Some(rel)
    }

    /// Relationships of `node` as this transaction sees them
    pub(crate) fn relationships_view(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
        committed: Vec<Relationship>,
    ) -> Vec<Relationship> {
        let mut result: Vec<Relationship> = committed
            .into_iter()
            .filter_map(|rel| self.relationship_view(rel.id, Some(rel)))
            .collect();
        let mut created: Vec<&Relationship> = self
            .created_relationships
            .values()
            .filter(|rel| {
                !self.deleted.contains(&EntityId::Relationship(rel.id))
                    && rel.matches_direction(node, direction)
                    && rel.matches_types(types)
            })
            .collect();
        created.sort_by_key(|rel| rel.id);
        for rel in created {
            if let Some(view) = self.relationship_view(rel.id, None) {
                result.push(view);
            }
        }
        result
    }

    pub(crate) fn into_changes(self) -> ChangeSet {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_view_layers_properties() {
        let mut overlay = Overlay::default();
        let id = NodeId::new(1);
        let mut committed = Node::new(id, 1, 0);
        committed.set_property("character", "Doctor");
        committed.set_property("regenerations", 10);

        overlay.set_property(id.into(), "character".into(), "The Doctor".into());
        overlay.remove_property(id.into(), "regenerations".into());

        let view = overlay.node_view(id, Some(committed)).unwrap();
        assert_eq!(view.get_property("character"), Some(&"The Doctor".into()));
        assert!(!view.has_property("regenerations"));
        assert_eq!(overlay.changes().len(), 2);
    }

    #[test]
    fn test_created_and_deleted_entities() {
        let mut overlay = Overlay::default();
        let id = NodeId::new(7);
        overlay.create_node(id);
        assert!(overlay.is_created(id.into()));
        assert!(overlay.node_view(id, None).is_some());

        overlay.delete(id.into());
        assert!(overlay.node_view(id, None).is_none());
    }

    #[test]
    fn test_relationships_view_merges_created() {
        let mut overlay = Overlay::default();
        let (a, b) = (NodeId::new(1), NodeId::new(2));
        let existing = Relationship::new(RelationshipId::new(1), a, b, "PLAYED", 1, 0);
        let gone = Relationship::new(RelationshipId::new(2), a, b, "PLAYED", 1, 0);
        overlay.delete(gone.id.into());
        overlay.create_relationship(Relationship::new(RelationshipId::new(3), b, a, "ENEMY_OF", 0, 0));

        let view = overlay.relationships_view(a, Direction::Both, &[], vec![existing.clone(), gone]);
        let ids: Vec<u64> = view.iter().map(|r| r.id.as_u64()).collect();
        assert_eq!(ids, vec![1, 3]);

        let outgoing = overlay.relationships_view(a, Direction::Outgoing, &[], vec![existing]);
        assert_eq!(outgoing.len(), 1);
        let incoming = overlay.relationships_view(a, Direction::Incoming, &[], Vec::new());
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].id, RelationshipId::new(3));
    }

    #[test]
    fn test_index_hits_replay() {
        let mut overlay = Overlay::default();
        let (a, b, c): (EntityId, EntityId, EntityId) =
            (NodeId::new(1).into(), NodeId::new(2).into(), NodeId::new(3).into());
        overlay.index_add("species", b, "species", "Sontaran".into());
        overlay.index_add("species", c, "species", "Dalek".into());
        overlay.index_remove("species", a, Some("species"), None);

        let pattern = WildcardPattern::compile("S*n").unwrap();
        let hits = overlay.index_hits(EntityClass::Node, "species", "species", TermMatch::Pattern(&pattern), vec![a]);
        assert_eq!(hits, vec![b]);

        overlay.delete(b);
        let hits = overlay.index_hits(EntityClass::Node, "species", "species", TermMatch::Exact("Sontaran"), vec![]);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_create_index_recorded_once() {
        let mut overlay = Overlay::default();
        overlay.create_index(EntityClass::Node, "characters");
        overlay.create_index(EntityClass::Node, "characters");
        assert!(overlay.has_created_index(EntityClass::Node, "characters"));
        assert_eq!(overlay.changes().len(), 1);
    }
}
