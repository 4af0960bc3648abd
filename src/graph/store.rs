//! Multi-versioned in-memory graph storage
//!
//! Every entity id owns a version chain. A commit at version `v` appends a
//! new version (copy-on-write) or a tombstone; readers resolve the newest
//! version that is not newer than their snapshot. Adjacency lists only grow
//! between vacuums and are filtered by relationship visibility on read.

use super::mutation::{ChangeSet, Mutation};
use super::node::Node;
use super::property::PropertyValue;
use super::relationship::Relationship;
use super::types::{Direction, EntityClass, EntityId, NodeId, RelationshipId, RelationshipType};
use crate::error::{GraphError, GraphResult};
use crate::index::IndexManager;
use tracing::debug;

#[derive(Debug, Clone)]
struct Version<T> {
    version: u64,
    /// `None` marks the entity deleted as of `version`
    value: Option<T>,
}

trait Stamped: Clone {
    fn stamp(&mut self, version: u64, timestamp: i64);
}

impl Stamped for Node {
    fn stamp(&mut self, version: u64, timestamp: i64) {
        self.version = version;
        self.updated_at = timestamp;
    }
}

impl Stamped for Relationship {
    fn stamp(&mut self, version: u64, _timestamp: i64) {
        self.version = version;
    }
}

/// Newest value in `chain` visible at `at`
fn visible<T>(chain: &[Version<T>], at: u64) -> Option<&T> {
    chain
        .iter()
        .rev()
        .find(|v| v.version <= at)
        .and_then(|v| v.value.as_ref())
}

/// Latest live value, copied into a new version unless it already belongs
/// to `version`
fn writable<T: Stamped>(chain: &mut Vec<Version<T>>, version: u64, timestamp: i64) -> Option<&mut T> {
    let last = chain.last()?;
    last.value.as_ref()?;
    if last.version < version {
        let mut copy = last.clone();
        copy.version = version;
        if let Some(value) = copy.value.as_mut() {
            value.stamp(version, timestamp);
        }
        chain.push(copy);
    }
    chain.last_mut()?.value.as_mut()
}

/// Drop versions no reader at or after `horizon` can see
fn prune<T>(chain: &mut Vec<Version<T>>, horizon: u64) -> usize {
    let Some(base) = chain.iter().rposition(|v| v.version <= horizon) else {
        return 0;
    };
    chain.drain(..base);
    if chain.len() == 1 && chain[0].value.is_none() {
        chain.clear();
        return base + 1;
    }
    base
}

/// Counts reported by [`GraphStore::vacuum`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumStats {
    pub versions_pruned: usize,
    pub postings_pruned: usize,
}

/// Multi-versioned graph storage
///
/// - nodes / relationships: id -> version chain (arena indexed by id)
/// - outgoing / incoming: node id -> relationship ids (adjacency lists)
/// - indexes: named and auto indexes, versioned alongside the entities
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: Vec<Vec<Version<Node>>>,

    relationships: Vec<Vec<Version<Relationship>>>,

    outgoing: Vec<Vec<RelationshipId>>,

    incoming: Vec<Vec<RelationshipId>>,

    /// Named and auto indexes
    pub(crate) indexes: IndexManager,

    /// Version of the newest applied commit
    committed_version: u64,

    /// Versions older than this may have been reclaimed
    horizon: u64,
}

impl GraphStore {
    /// Create a new empty graph store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose auto indexes track the given property keys
    pub fn with_indexes(indexes: IndexManager) -> Self {
        GraphStore {
            indexes,
            ..Self::default()
        }
    }

    pub fn committed_version(&self) -> u64 {
        self.committed_version
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    /// Fails when versions needed by a read at `at` may already be gone
    pub fn check_snapshot(&self, at: u64) -> GraphResult<()> {
        if at < self.horizon {
            return Err(GraphError::SnapshotTooOld(at));
        }
        Ok(())
    }

    /// Get a node as of version `at`
    pub fn node_at(&self, id: NodeId, at: u64) -> GraphResult<Option<&Node>> {
        self.check_snapshot(at)?;
        Ok(self
            .nodes
            .get(id.as_u64() as usize)
            .and_then(|chain| visible(chain, at)))
    }

    /// Get a relationship as of version `at`
    pub fn relationship_at(&self, id: RelationshipId, at: u64) -> GraphResult<Option<&Relationship>> {
        self.check_snapshot(at)?;
        Ok(self
            .relationships
            .get(id.as_u64() as usize)
            .and_then(|chain| visible(chain, at)))
    }

    /// Get a node at the latest committed version
    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.as_u64() as usize)
            .and_then(|chain| visible(chain, self.committed_version))
    }

    /// Get a relationship at the latest committed version
    pub fn get_relationship(&self, id: RelationshipId) -> Option<&Relationship> {
        self.relationships
            .get(id.as_u64() as usize)
            .and_then(|chain| visible(chain, self.committed_version))
    }

    /// Whether the entity is live at version `at`
    pub fn entity_exists_at(&self, entity: EntityId, at: u64) -> GraphResult<bool> {
        Ok(match entity {
            EntityId::Node(id) => self.node_at(id, at)?.is_some(),
            EntityId::Relationship(id) => self.relationship_at(id, at)?.is_some(),
        })
    }

    /// Commit version of the newest state of `entity` (tombstones included)
    pub fn last_modified(&self, entity: EntityId) -> Option<u64> {
        match entity {
            EntityId::Node(id) => self.nodes.get(id.as_u64() as usize)?.last().map(|v| v.version),
            EntityId::Relationship(id) => self
                .relationships
                .get(id.as_u64() as usize)?
                .last()
                .map(|v| v.version),
        }
    }

    /// Relationships of `node` visible at `at`, filtered by direction and type.
    /// A self-loop is reported once for [`Direction::Both`].
    pub fn relationships_at(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
        at: u64,
    ) -> GraphResult<Vec<&Relationship>> {
        self.check_snapshot(at)?;
        let idx = node.as_u64() as usize;
        let empty = Vec::new();
        let outgoing = match direction {
            Direction::Outgoing | Direction::Both => self.outgoing.get(idx).unwrap_or(&empty),
            Direction::Incoming => &empty,
        };
        let incoming = match direction {
            Direction::Incoming | Direction::Both => self.incoming.get(idx).unwrap_or(&empty),
            Direction::Outgoing => &empty,
        };

        let mut result = Vec::new();
        for rel_id in outgoing {
            if let Some(rel) = self.relationship_at(*rel_id, at)? {
                if rel.matches_types(types) {
                    result.push(rel);
                }
            }
        }
        for rel_id in incoming {
            if let Some(rel) = self.relationship_at(*rel_id, at)? {
                let seen_as_outgoing = direction == Direction::Both && rel.start == node;
                if !seen_as_outgoing && rel.matches_types(types) {
                    result.push(rel);
                }
            }
        }
        Ok(result)
    }

    /// All node ids visible at `at`, in id order
    pub fn node_ids_at(&self, at: u64) -> GraphResult<Vec<NodeId>> {
        self.check_snapshot(at)?;
        Ok(self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, chain)| visible(chain, at).is_some())
            .map(|(idx, _)| NodeId::new(idx as u64))
            .collect())
    }

    /// All relationship ids visible at `at`, in id order
    pub fn relationship_ids_at(&self, at: u64) -> GraphResult<Vec<RelationshipId>> {
        self.check_snapshot(at)?;
        Ok(self
            .relationships
            .iter()
            .enumerate()
            .filter(|(_, chain)| visible(chain, at).is_some())
            .map(|(idx, _)| RelationshipId::new(idx as u64))
            .collect())
    }

    /// Apply a validated change set as commit `version`
    ///
    /// The caller has already checked existence, constraints and conflicts
    /// against the latest committed state; a failure here means the store
    /// and the change set disagree, which is reported as an inconsistency.
    pub fn apply(&mut self, version: u64, timestamp: i64, changes: &ChangeSet) -> GraphResult<()> {
        for mutation in changes {
            self.apply_one(version, timestamp, mutation)?;
        }
        self.committed_version = self.committed_version.max(version);
        debug!("Applied {} mutation(s) at version {}", changes.len(), version);
        Ok(())
    }

    fn apply_one(&mut self, version: u64, timestamp: i64, mutation: &Mutation) -> GraphResult<()> {
        match mutation {
            Mutation::CreateNode { id } => {
                let idx = id.as_u64() as usize;
                self.ensure_node_slot(idx);
                if !self.nodes[idx].is_empty() {
                    return Err(inconsistent(format!("{} created twice", id)));
                }
                self.nodes[idx].push(Version {
                    version,
                    value: Some(Node::new(*id, version, timestamp)),
                });
            }
            Mutation::CreateRelationship { id, start, end, rel_type } => {
                for endpoint in [start, end] {
                    if !self.node_is_live(*endpoint) {
                        return Err(GraphError::DanglingReference(*endpoint));
                    }
                }
                let idx = id.as_u64() as usize;
                if self.relationships.len() <= idx {
                    self.relationships.resize_with(idx + 1, Vec::new);
                }
                if !self.relationships[idx].is_empty() {
                    return Err(inconsistent(format!("{} created twice", id)));
                }
                let rel = Relationship::new(*id, *start, *end, *rel_type, version, timestamp);
                self.relationships[idx].push(Version { version, value: Some(rel) });
                self.outgoing[start.as_u64() as usize].push(*id);
                self.incoming[end.as_u64() as usize].push(*id);
            }
            Mutation::SetProperty { entity, key, value } => {
                let old = self.write_property(*entity, version, timestamp, key, Some(value.clone()))?;
                self.indexes.auto_index_set(*entity, key, old.as_ref(), value, version);
            }
            Mutation::RemoveProperty { entity, key } => {
                let old = self.write_property(*entity, version, timestamp, key, None)?;
                if old.is_some() {
                    self.indexes.auto_index_remove(*entity, key, version);
                }
            }
            Mutation::DeleteNode { id } => {
                let chain = self
                    .nodes
                    .get_mut(id.as_u64() as usize)
                    .filter(|chain| chain.last().is_some_and(|v| v.value.is_some()))
                    .ok_or(GraphError::NodeNotFound(*id))?;
                chain.push(Version { version, value: None });
                self.indexes.remove_entity(EntityId::Node(*id), version);
            }
            Mutation::DeleteRelationship { id } => {
                let chain = self
                    .relationships
                    .get_mut(id.as_u64() as usize)
                    .filter(|chain| chain.last().is_some_and(|v| v.value.is_some()))
                    .ok_or(GraphError::RelationshipNotFound(*id))?;
                chain.push(Version { version, value: None });
                self.indexes.remove_entity(EntityId::Relationship(*id), version);
            }
            Mutation::CreateIndex { class, name } => {
                self.indexes.create_index(*class, name, version);
            }
            Mutation::IndexAdd { index, entity, key, value } => {
                self.indexes.add(index, *entity, key, value, version)?;
            }
            Mutation::IndexRemove { index, entity, key, value } => {
                self.indexes
                    .remove(index, *entity, key.as_deref(), value.as_ref(), version)?;
            }
        }
        Ok(())
    }

    fn ensure_node_slot(&mut self, idx: usize) {
        if self.nodes.len() <= idx {
            self.nodes.resize_with(idx + 1, Vec::new);
            self.outgoing.resize_with(idx + 1, Vec::new);
            self.incoming.resize_with(idx + 1, Vec::new);
        }
    }

    /// Whether the newest version of `id`, committed or being applied, is live
    fn node_is_live(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.as_u64() as usize)
            .and_then(|chain| chain.last())
            .is_some_and(|v| v.value.is_some())
    }

    /// Set (`Some`) or remove (`None`) a property, returning the old value
    fn write_property(
        &mut self,
        entity: EntityId,
        version: u64,
        timestamp: i64,
        key: &str,
        value: Option<PropertyValue>,
    ) -> GraphResult<Option<PropertyValue>> {
        let properties = match entity {
            EntityId::Node(id) => {
                let chain = self
                    .nodes
                    .get_mut(id.as_u64() as usize)
                    .ok_or(GraphError::NodeNotFound(id))?;
                &mut writable(chain, version, timestamp)
                    .ok_or(GraphError::NodeNotFound(id))?
                    .properties
            }
            EntityId::Relationship(id) => {
                let chain = self
                    .relationships
                    .get_mut(id.as_u64() as usize)
                    .ok_or(GraphError::RelationshipNotFound(id))?;
                &mut writable(chain, version, timestamp)
                    .ok_or(GraphError::RelationshipNotFound(id))?
                    .properties
            }
        };
        Ok(match value {
            Some(value) => properties.insert(key.to_string(), value),
            None => properties.remove(key),
        })
    }

    /// Reclaim versions and index postings invisible to every reader at or
    /// after `horizon`
    pub fn vacuum(&mut self, horizon: u64) -> VacuumStats {
        let horizon = horizon.min(self.committed_version);
        let mut stats = VacuumStats::default();
        if horizon <= self.horizon {
            return stats;
        }

        for chain in &mut self.nodes {
            stats.versions_pruned += prune(chain, horizon);
        }
        for chain in &mut self.relationships {
            stats.versions_pruned += prune(chain, horizon);
        }

        let relationships = &self.relationships;
        let is_reclaimed = |id: &RelationshipId| {
            relationships
                .get(id.as_u64() as usize)
                .map_or(true, |chain| chain.is_empty())
        };
        for list in self.outgoing.iter_mut().chain(self.incoming.iter_mut()) {
            list.retain(|id| !is_reclaimed(id));
        }

        stats.postings_pruned = self.indexes.vacuum(horizon);
        self.horizon = horizon;
        debug!(
            "Vacuum to version {}: {} version(s), {} posting(s) reclaimed",
            horizon, stats.versions_pruned, stats.postings_pruned
        );
        stats
    }

    /// Whether `class` has an index called `name` at the latest version
    pub fn has_index(&self, class: EntityClass, name: &str) -> bool {
        self.indexes.has_index(class, name)
    }
}

fn inconsistent(message: String) -> GraphError {
    GraphError::IndexInconsistency(message)
}
