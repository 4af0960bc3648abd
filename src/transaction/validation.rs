//! Commit-time validation
//!
//! Runs under the store's write lock, against the latest committed state:
//! - first committer wins: an entity this transaction writes must not have
//!   been written by anyone else since the transaction's snapshot
//! - a new relationship needs both endpoints live when it commits
//! - a deleted node must be left without relationships
//! - index entries may only be added for entities that still exist

use crate::error::GraphError;
use crate::graph::{ChangeSet, EntityId, GraphStore, Mutation, NodeId, RelationshipId};
use std::collections::{HashMap, HashSet};

/// Why a transaction cannot commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Written entity was changed by a transaction that committed after our snapshot
    WriteConflict {
        entity: EntityId,
        snapshot: u64,
        current_version: u64,
    },
    /// Relationship endpoint no longer exists
    DanglingReference { relationship: RelationshipId, node: NodeId },
    /// Deleted node would still have relationships
    NodeHasRelationships { node: NodeId, count: usize },
}

impl From<Violation> for GraphError {
    fn from(violation: Violation) -> Self {
        match violation {
            Violation::WriteConflict { entity, .. } => GraphError::WriteConflict(entity),
            Violation::DanglingReference { node, .. } => GraphError::DanglingReference(node),
            Violation::NodeHasRelationships { node, count } => GraphError::NodeHasRelationships { node, count },
        }
    }
}

/// Accumulated outcome of validating one change set
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn violation(violation: Violation) -> Self {
        ValidationResult {
            violations: vec![violation],
        }
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.violations.extend(other.violations);
    }

    /// First violation as an error, `Ok` when valid
    pub fn into_result(self) -> Result<(), GraphError> {
        match self.violations.into_iter().next() {
            Some(violation) => Err(violation.into()),
            None => Ok(()),
        }
    }
}

/// Validate `changes`, prepared against snapshot `snapshot`, for commit
pub fn validate_commit(store: &GraphStore, snapshot: u64, changes: &ChangeSet) -> ValidationResult {
    let mut result = validate_write_set(store, snapshot, changes);
    result.merge(validate_references(store, changes));
    result
}

/// First-committer-wins check over the written entities
pub fn validate_write_set(store: &GraphStore, snapshot: u64, changes: &ChangeSet) -> ValidationResult {
    let mut result = ValidationResult::ok();
    let mut checked = HashSet::new();

    let touched = changes.iter().filter_map(|mutation| match mutation {
        Mutation::IndexAdd { entity, .. } => Some(*entity),
        other => other.written_entity(),
    });
    for entity in touched {
        if !checked.insert(entity) {
            continue;
        }
        // Entities created by this transaction have no committed history
        if let Some(current_version) = store.last_modified(entity) {
            if current_version > snapshot {
                result.merge(ValidationResult::violation(Violation::WriteConflict {
                    entity,
                    snapshot,
                    current_version,
                }));
            }
        }
    }
    result
}

/// Endpoint liveness and node deletion constraints at the latest version
pub fn validate_references(store: &GraphStore, changes: &ChangeSet) -> ValidationResult {
    let mut result = ValidationResult::ok();
    let latest = store.committed_version();

    let mut created_nodes = HashSet::new();
    let mut deleted_nodes = HashSet::new();
    let mut deleted_relationships = HashSet::new();
    let mut created_relationships: HashMap<RelationshipId, (NodeId, NodeId)> = HashMap::new();
    for mutation in changes {
        match mutation {
            Mutation::CreateNode { id } => {
                created_nodes.insert(*id);
            }
            Mutation::CreateRelationship { id, start, end, .. } => {
                created_relationships.insert(*id, (*start, *end));
            }
            Mutation::DeleteNode { id } => {
                deleted_nodes.insert(*id);
            }
            Mutation::DeleteRelationship { id } => {
                deleted_relationships.insert(*id);
            }
            _ => {}
        }
    }

    let committed_live = |node: NodeId| matches!(store.node_at(node, latest), Ok(Some(_)));

    for (id, (start, end)) in &created_relationships {
        for node in [*start, *end] {
            let live = created_nodes.contains(&node) || committed_live(node);
            if !live || (deleted_nodes.contains(&node) && !deleted_relationships.contains(id)) {
                result.merge(ValidationResult::violation(Violation::DanglingReference {
                    relationship: *id,
                    node,
                }));
            }
        }
    }

    for node in &deleted_nodes {
        let committed = if created_nodes.contains(node) {
            Vec::new()
        } else {
            store
                .relationships_at(*node, crate::graph::Direction::Both, &[], latest)
                .map(|rels| rels.iter().map(|rel| rel.id).collect())
                .unwrap_or_default()
        };
        let remaining = committed
            .into_iter()
            .filter(|id| !deleted_relationships.contains(id))
            .count()
            + created_relationships
                .iter()
                .filter(|(id, (start, end))| {
                    (start == node || end == node) && !deleted_relationships.contains(*id)
                })
                .count();
        if remaining > 0 {
            result.merge(ValidationResult::violation(Violation::NodeHasRelationships {
                node: *node,
                count: remaining,
            }));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PropertyValue, RelationshipType};

    fn committed(store: &mut GraphStore, mutations: Vec<Mutation>) -> u64 {
        let version = store.committed_version() + 1;
        let mut changes = ChangeSet::new();
        for mutation in mutations {
            changes.push(mutation);
        }
        store.apply(version, 0, &changes).unwrap();
        version
    }

    fn set(entity: impl Into<EntityId>, key: &str, value: &str) -> Mutation {
        Mutation::SetProperty {
            entity: entity.into(),
            key: key.into(),
            value: PropertyValue::from(value),
        }
    }

    fn changes(mutations: Vec<Mutation>) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for mutation in mutations {
            changes.push(mutation);
        }
        changes
    }

    fn doctor_and_master() -> GraphStore {
        let mut store = GraphStore::new();
        committed(
            &mut store,
            vec![
                Mutation::CreateNode { id: NodeId::new(1) },
                Mutation::CreateNode { id: NodeId::new(2) },
                Mutation::CreateRelationship {
                    id: RelationshipId::new(1),
                    start: NodeId::new(1),
                    end: NodeId::new(2),
                    rel_type: RelationshipType::new("ENEMY_OF"),
                },
            ],
        );
        store
    }

    #[test]
    fn test_first_committer_wins() {
        let mut store = doctor_and_master();
        let snapshot = store.committed_version();
        committed(&mut store, vec![set(NodeId::new(1), "character", "Doctor")]);

        let result = validate_commit(&store, snapshot, &changes(vec![set(NodeId::new(1), "character", "The Doctor")]));
        assert!(!result.violations.is_empty());
        assert!(matches!(
            result.into_result(),
            Err(GraphError::WriteConflict(EntityId::Node(NodeId(1))))
        ));

        let untouched = validate_commit(&store, snapshot, &changes(vec![set(NodeId::new(2), "character", "Master")]));
        assert!(untouched.violations.is_empty());
    }

    #[test]
    fn test_dangling_relationship() {
        let mut store = doctor_and_master();
        let snapshot = store.committed_version();
        committed(
            &mut store,
            vec![
                Mutation::DeleteRelationship { id: RelationshipId::new(1) },
                Mutation::DeleteNode { id: NodeId::new(2) },
            ],
        );

        let result = validate_commit(
            &store,
            snapshot,
            &changes(vec![Mutation::CreateRelationship {
                id: RelationshipId::new(2),
                start: NodeId::new(1),
                end: NodeId::new(2),
                rel_type: RelationshipType::new("ENEMY_OF"),
            }]),
        );
        assert_eq!(result.violations.len(), 1);
        assert!(matches!(
            result.into_result(),
            Err(GraphError::DanglingReference(NodeId(2)))
        ));
    }

    #[test]
    fn test_delete_node_with_relationships() {
        let store = doctor_and_master();
        let snapshot = store.committed_version();

        let result = validate_commit(&store, snapshot, &changes(vec![Mutation::DeleteNode { id: NodeId::new(1) }]));
        assert!(matches!(
            result.violations.as_slice(),
            [Violation::NodeHasRelationships { count: 1, .. }]
        ));

        let detached = validate_commit(
            &store,
            snapshot,
            &changes(vec![
                Mutation::DeleteRelationship { id: RelationshipId::new(1) },
                Mutation::DeleteNode { id: NodeId::new(1) },
            ]),
        );
        assert!(detached.violations.is_empty());
    }

    #[test]
    fn test_created_entities_never_conflict() {
        let store = doctor_and_master();
        let result = validate_commit(
            &store,
            0,
            &changes(vec![
                Mutation::CreateNode { id: NodeId::new(3) },
                set(NodeId::new(3), "character", "Rose"),
                Mutation::CreateRelationship {
                    id: RelationshipId::new(2),
                    start: NodeId::new(1),
                    end: NodeId::new(3),
                    rel_type: RelationshipType::new("COMPANION_OF"),
                },
            ]),
        );
        assert!(result.violations.is_empty());
    }
}
