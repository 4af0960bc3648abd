//! Snapshots: stable read views over the multi-versioned store
//!
//! A snapshot pins one committed version. It takes the store's read lock
//! only for the duration of each call, so holding a snapshot never blocks a
//! writer; the registry keeps the vacuum from reclaiming any version a live
//! snapshot can still see.

use super::GraphRead;
use crate::database::Shared;
use crate::error::{GraphError, GraphResult};
use crate::graph::{Direction, EntityClass, EntityId, Node, NodeId, Relationship, RelationshipId, RelationshipType};
use crate::index::{IndexHits, IndexedEntity, WildcardPattern};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live snapshot versions with reference counts
#[derive(Debug, Default)]
pub(crate) struct SnapshotRegistry {
    active: Mutex<BTreeMap<u64, usize>>,
}

impl SnapshotRegistry {
    /// Pin the current committed version
    pub(crate) fn acquire(&self, committed: &AtomicU64) -> u64 {
        let mut active = self.active.lock();
        let version = committed.load(Ordering::Acquire);
        *active.entry(version).or_default() += 1;
        version
    }

    pub(crate) fn release(&self, version: u64) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(&version) {
            *count -= 1;
            if *count == 0 {
                active.remove(&version);
            }
        }
    }

    /// Oldest version any current or future snapshot may read
    pub(crate) fn horizon(&self, committed: &AtomicU64) -> u64 {
        let active = self.active.lock();
        let committed = committed.load(Ordering::Acquire);
        active
            .keys()
            .next()
            .map_or(committed, |oldest| (*oldest).min(committed))
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.lock().values().sum()
    }
}

/// A consistent read view at one committed version
pub struct Snapshot {
    shared: Arc<Shared>,
    version: u64,
}

impl Snapshot {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let version = shared.snapshots.acquire(&shared.committed);
        Snapshot { shared, version }
    }

    /// The committed version this snapshot reads
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Ids of all nodes visible in this snapshot
    pub fn node_ids(&self) -> GraphResult<Vec<NodeId>> {
        self.shared.store.read().node_ids_at(self.version)
    }

    /// Ids of all relationships visible in this snapshot
    pub fn relationship_ids(&self) -> GraphResult<Vec<RelationshipId>> {
        self.shared.store.read().relationship_ids_at(self.version)
    }

    pub fn node_count(&self) -> GraphResult<usize> {
        Ok(self.node_ids()?.len())
    }

    pub fn relationship_count(&self) -> GraphResult<usize> {
        Ok(self.relationship_ids()?.len())
    }

    /// Exact index lookup
    pub fn index_get<E: IndexedEntity>(
        &self,
        index: &str,
        key: &str,
        value: &crate::graph::PropertyValue,
    ) -> GraphResult<IndexHits<E>> {
        let entities = self.index_lookup(E::CLASS, index, key, Lookup::Exact(value))?;
        Ok(IndexHits::from_entities(entities))
    }

    /// Wildcard index lookup (`?` and `*`)
    pub fn index_query<E: IndexedEntity>(&self, index: &str, key: &str, pattern: &str) -> GraphResult<IndexHits<E>> {
        let pattern = WildcardPattern::compile(pattern)?;
        let entities = self.index_lookup(E::CLASS, index, key, Lookup::Pattern(&pattern))?;
        Ok(IndexHits::from_entities(entities))
    }

    pub(crate) fn index_lookup(
        &self,
        class: EntityClass,
        index: &str,
        key: &str,
        lookup: Lookup<'_>,
    ) -> GraphResult<Vec<EntityId>> {
        let store = self.shared.store.read();
        store.check_snapshot(self.version)?;
        let hits = match lookup {
            Lookup::Exact(value) => store.indexes().get(class, index, key, value, self.version),
            Lookup::Pattern(pattern) => store.indexes().query(class, index, key, pattern, self.version),
        };
        for entity in &hits {
            if !store.entity_exists_at(*entity, self.version)? {
                return Err(GraphError::IndexInconsistency(format!(
                    "{} index '{}' refers to {} which is not visible at version {}",
                    class, index, entity, self.version
                )));
            }
        }
        Ok(hits)
    }

    pub(crate) fn find_node(&self, id: NodeId) -> GraphResult<Option<Node>> {
        Ok(self.shared.store.read().node_at(id, self.version)?.cloned())
    }

    pub(crate) fn find_relationship(&self, id: RelationshipId) -> GraphResult<Option<Relationship>> {
        Ok(self.shared.store.read().relationship_at(id, self.version)?.cloned())
    }

    /// Relationships of `node` without checking that the node itself is visible
    pub(crate) fn find_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> GraphResult<Vec<Relationship>> {
        Ok(self
            .shared
            .store
            .read()
            .relationships_at(node, direction, types, self.version)?
            .into_iter()
            .cloned()
            .collect())
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// How an index is searched
#[derive(Debug, Clone, Copy)]
pub(crate) enum Lookup<'a> {
    Exact(&'a crate::graph::PropertyValue),
    Pattern(&'a WildcardPattern),
}

impl GraphRead for Snapshot {
    fn get_node(&self, id: NodeId) -> GraphResult<Node> {
        self.find_node(id)?.ok_or(GraphError::NodeNotFound(id))
    }

    fn get_relationship(&self, id: RelationshipId) -> GraphResult<Relationship> {
        self.find_relationship(id)?
            .ok_or(GraphError::RelationshipNotFound(id))
    }

    fn get_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> GraphResult<Vec<Relationship>> {
        if self.find_node(node)?.is_none() {
            return Err(GraphError::NodeNotFound(node));
        }
        self.find_relationships(node, direction, types)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.shared.snapshots.release(self.version);
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("version", &self.version).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_horizon() {
        let registry = SnapshotRegistry::default();
        let committed = AtomicU64::new(5);
        assert_eq!(registry.horizon(&committed), 5);

        let v = registry.acquire(&committed);
        assert_eq!(v, 5);
        committed.store(9, Ordering::Release);
        let w = registry.acquire(&committed);
        assert_eq!(w, 9);
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.horizon(&committed), 5);

        registry.release(v);
        assert_eq!(registry.horizon(&committed), 9);
        registry.release(w);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_registry_reference_counts() {
        let registry = SnapshotRegistry::default();
        let committed = AtomicU64::new(2);
        let a = registry.acquire(&committed);
        let b = registry.acquire(&committed);
        registry.release(a);
        committed.store(3, Ordering::Release);
        assert_eq!(registry.horizon(&committed), 2);
        registry.release(b);
        assert_eq!(registry.horizon(&committed), 3);
    }
}
