//! Graph mutations
//!
//! A committed transaction is an ordered list of mutations. The same list is
//! applied to the store at commit, written to the write-ahead log, and
//! re-applied on recovery.

use super::property::PropertyValue;
use super::types::{EntityClass, EntityId, NodeId, RelationshipId, RelationshipType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    CreateNode {
        id: NodeId,
    },
    CreateRelationship {
        id: RelationshipId,
        start: NodeId,
        end: NodeId,
        rel_type: RelationshipType,
    },
    SetProperty {
        entity: EntityId,
        key: String,
        value: PropertyValue,
    },
    RemoveProperty {
        entity: EntityId,
        key: String,
    },
    DeleteNode {
        id: NodeId,
    },
    DeleteRelationship {
        id: RelationshipId,
    },
    CreateIndex {
        class: EntityClass,
        name: String,
    },
    IndexAdd {
        index: String,
        entity: EntityId,
        key: String,
        value: PropertyValue,
    },
    /// Remove index entries of `entity`; `None` key/value widen the match
    IndexRemove {
        index: String,
        entity: EntityId,
        key: Option<String>,
        value: Option<PropertyValue>,
    },
}

impl Mutation {
    /// The pre-existing entity whose committed state this mutation replaces,
    /// used for write-conflict detection. Creations and index operations
    /// return `None`.
    pub fn written_entity(&self) -> Option<EntityId> {
        match self {
            Mutation::SetProperty { entity, .. } | Mutation::RemoveProperty { entity, .. } => Some(*entity),
            Mutation::DeleteNode { id } => Some(EntityId::Node(*id)),
            Mutation::DeleteRelationship { id } => Some(EntityId::Relationship(*id)),
            _ => None,
        }
    }
}

/// Ordered mutations of one transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    mutations: Vec<Mutation>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mutation> {
        self.mutations.iter()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Highest node and relationship ids created by this change set
    pub fn max_created_ids(&self) -> (Option<u64>, Option<u64>) {
        let mut max_node = None;
        let mut max_rel = None;
        for mutation in &self.mutations {
            match mutation {
                Mutation::CreateNode { id } => max_node = max_node.max(Some(id.as_u64())),
                Mutation::CreateRelationship { id, .. } => max_rel = max_rel.max(Some(id.as_u64())),
                _ => {}
            }
        }
        (max_node, max_rel)
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a Mutation;
    type IntoIter = std::slice::Iter<'a, Mutation>;

    fn into_iter(self) -> Self::IntoIter {
        self.mutations.iter()
    }
}
