//! Transactions
//!
//! A transaction reads from a registered snapshot and buffers its writes in
//! an [`Overlay`](overlay::Overlay). Nothing reaches the shared store until
//! `finish` commits; the commit is validated and applied under the store's
//! write lock so readers never see a partial transaction.
//!
//! ```text
//!   begin ─▶ Active ──finish (success marked)──▶ Committed
//!              │    └─finish / drop──────────────▶ RolledBack
//!              └─ error in a write ─▶ aborted (later operations fail)
//! ```

mod overlay;
pub mod snapshot;
pub mod validation;

pub use snapshot::Snapshot;
pub use validation::{ValidationResult, Violation};

use crate::error::{GraphError, GraphResult};
use crate::graph::{
    Direction, EntityClass, EntityId, Node, NodeId, PropertyMap, PropertyValue, Relationship, RelationshipId,
    RelationshipType,
};
use crate::index::{split_query, IndexHits, IndexManager, IndexedEntity, WildcardPattern};
use overlay::{Overlay, TermMatch};
use snapshot::Lookup;
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Read access to a consistent view of the graph
///
/// Implemented by [`Snapshot`], [`Transaction`] (which also sees its own
/// pending writes) and [`GraphDatabase`](crate::GraphDatabase) (latest
/// committed state).
pub trait GraphRead {
    fn get_node(&self, id: NodeId) -> GraphResult<Node>;

    fn get_relationship(&self, id: RelationshipId) -> GraphResult<Relationship>;

    /// Relationships of `node` in `direction`; an empty `types` slice accepts every type
    fn get_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> GraphResult<Vec<Relationship>>;

    fn properties<E: Into<EntityId>>(&self, entity: E) -> GraphResult<PropertyMap> {
        Ok(match entity.into() {
            EntityId::Node(id) => self.get_node(id)?.properties,
            EntityId::Relationship(id) => self.get_relationship(id)?.properties,
        })
    }

    /// Fails with `PropertyNotFound` when the key is absent
    fn get_property<E: Into<EntityId>>(&self, entity: E, key: &str) -> GraphResult<PropertyValue> {
        let entity = entity.into();
        self.properties(entity)?
            .remove(key)
            .ok_or_else(|| GraphError::PropertyNotFound {
                entity,
                key: key.to_string(),
            })
    }

    fn has_property<E: Into<EntityId>>(&self, entity: E, key: &str) -> GraphResult<bool> {
        Ok(self.properties(entity)?.contains_key(key))
    }

    /// Property keys in sorted order
    fn property_keys<E: Into<EntityId>>(&self, entity: E) -> GraphResult<Vec<String>> {
        let mut keys: Vec<String> = self.properties(entity)?.into_keys().collect();
        keys.sort();
        Ok(keys)
    }

    fn node_exists(&self, id: NodeId) -> GraphResult<bool> {
        match self.get_node(id) {
            Ok(_) => Ok(true),
            Err(GraphError::NodeNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The endpoint of `relationship` opposite `node`
    fn other_node(&self, relationship: RelationshipId, node: NodeId) -> GraphResult<NodeId> {
        self.get_relationship(relationship)?
            .other_node(node)
            .ok_or(GraphError::NotAttached { node, relationship })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// A unit of work against the database
///
/// Consumed by [`finish`](Transaction::finish). Dropping an unfinished
/// transaction rolls it back.
pub struct Transaction {
    snapshot: Snapshot,
    overlay: Overlay,
    state: TxState,
    success: bool,
    failure: bool,
    aborted: bool,
}

impl Transaction {
    pub(crate) fn new(snapshot: Snapshot) -> Self {
        debug!("Begin transaction at version {}", snapshot.version());
        Transaction {
            snapshot,
            overlay: Overlay::default(),
            state: TxState::Active,
            success: false,
            failure: false,
            aborted: false,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Version of the snapshot this transaction reads
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.version()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Commit on [`finish`](Transaction::finish) unless failure is also marked
    pub fn mark_success(&mut self) {
        self.success = true;
    }

    /// Roll back on [`finish`](Transaction::finish), whatever else was marked
    pub fn mark_failure(&mut self) {
        self.failure = true;
    }

    fn ensure_active(&self) -> GraphResult<()> {
        if self.snapshot.shared().is_shut_down() {
            return Err(GraphError::DatabaseShutdown);
        }
        if self.aborted {
            return Err(GraphError::TransactionAborted);
        }
        Ok(())
    }

    /// Run a write; any error aborts the transaction
    fn write<T>(&mut self, op: impl FnOnce(&mut Self) -> GraphResult<T>) -> GraphResult<T> {
        self.ensure_active()?;
        let result = op(self);
        if let Err(e) = &result {
            debug!("Transaction aborted: {}", e);
            self.aborted = true;
        }
        result
    }

    fn node_view(&self, id: NodeId) -> GraphResult<Option<Node>> {
        let committed = if self.overlay.is_created(id.into()) {
            None
        } else {
            self.snapshot.find_node(id)?
        };
        Ok(self.overlay.node_view(id, committed))
    }

    fn relationship_view(&self, id: RelationshipId) -> GraphResult<Option<Relationship>> {
        let committed = if self.overlay.is_created(id.into()) {
            None
        } else {
            self.snapshot.find_relationship(id)?
        };
        Ok(self.overlay.relationship_view(id, committed))
    }

    fn require_entity(&self, entity: EntityId) -> GraphResult<PropertyMap> {
        match entity {
            EntityId::Node(id) => self
                .node_view(id)?
                .map(|node| node.properties)
                .ok_or(GraphError::NodeNotFound(id)),
            EntityId::Relationship(id) => self
                .relationship_view(id)?
                .map(|rel| rel.properties)
                .ok_or(GraphError::RelationshipNotFound(id)),
        }
    }

    fn auto_indexed(&self, class: EntityClass, key: &str) -> bool {
        self.snapshot.shared().store.read().indexes().is_auto_indexed(class, key)
    }

    pub fn create_node(&mut self) -> GraphResult<NodeId> {
        self.write(|tx| {
            let id = tx.snapshot.shared().allocate_node_id()?;
            tx.overlay.create_node(id);
            Ok(id)
        })
    }

    /// Fails with `DanglingReference` if either endpoint is not visible
    pub fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: impl Into<RelationshipType>,
    ) -> GraphResult<RelationshipId> {
        let rel_type = rel_type.into();
        self.write(|tx| {
            for endpoint in [start, end] {
                if tx.node_view(endpoint)?.is_none() {
                    return Err(GraphError::DanglingReference(endpoint));
                }
            }
            let id = tx.snapshot.shared().allocate_relationship_id()?;
            tx.overlay
                .create_relationship(Relationship::new(id, start, end, rel_type, 0, 0));
            Ok(id)
        })
    }

    /// Set a property, returning the previous value
    pub fn set_property(
        &mut self,
        entity: impl Into<EntityId>,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<Option<PropertyValue>> {
        let (entity, key, value) = (entity.into(), key.into(), value.into());
        self.write(|tx| {
            let old = tx.require_entity(entity)?.remove(&key);
            if tx.auto_indexed(entity.class(), &key) {
                tx.overlay.shadow_auto_index(
                    IndexManager::auto_index_name(entity.class()),
                    entity,
                    &key,
                    old.as_ref(),
                    Some(&value),
                );
            }
            tx.overlay.set_property(entity, key, value);
            Ok(old)
        })
    }

    /// Remove a property, returning its value; removing an absent key does nothing
    pub fn remove_property(&mut self, entity: impl Into<EntityId>, key: &str) -> GraphResult<Option<PropertyValue>> {
        let entity = entity.into();
        self.write(|tx| {
            let old = tx.require_entity(entity)?.remove(key);
            if old.is_some() {
                if tx.auto_indexed(entity.class(), key) {
                    tx.overlay.shadow_auto_index(
                        IndexManager::auto_index_name(entity.class()),
                        entity,
                        key,
                        old.as_ref(),
                        None,
                    );
                }
                tx.overlay.remove_property(entity, key.to_string());
            }
            Ok(old)
        })
    }

    /// Delete a node that has no relationships
    ///
    /// Fails with `NodeHasRelationships` otherwise; see
    /// [`detach_delete_node`](Transaction::detach_delete_node).
    pub fn delete_node(&mut self, id: NodeId) -> GraphResult<()> {
        self.write(|tx| {
            let count = tx.get_relationships(id, Direction::Both, &[])?.len();
            if count > 0 {
                return Err(GraphError::NodeHasRelationships { node: id, count });
            }
            tx.overlay.delete(id.into());
            Ok(())
        })
    }

    /// Delete a node together with all of its relationships, returning how
    /// many relationships were deleted
    pub fn detach_delete_node(&mut self, id: NodeId) -> GraphResult<usize> {
        self.write(|tx| {
            let relationships = tx.get_relationships(id, Direction::Both, &[])?;
            for rel in &relationships {
                tx.overlay.delete(rel.id.into());
            }
            tx.overlay.delete(id.into());
            Ok(relationships.len())
        })
    }

    pub fn delete_relationship(&mut self, id: RelationshipId) -> GraphResult<()> {
        self.write(|tx| {
            if tx.relationship_view(id)?.is_none() {
                return Err(GraphError::RelationshipNotFound(id));
            }
            tx.overlay.delete(id.into());
            Ok(())
        })
    }

    /// Handle on the node index `name`; the index is created on first add
    pub fn index_for_nodes(&mut self, name: &str) -> TxIndex<'_, NodeId> {
        TxIndex::new(self, name)
    }

    /// Handle on the relationship index `name`; the index is created on first add
    pub fn index_for_relationships(&mut self, name: &str) -> TxIndex<'_, RelationshipId> {
        TxIndex::new(self, name)
    }

    fn index_exists(&self, class: EntityClass, name: &str) -> bool {
        self.overlay.has_created_index(class, name) || self.snapshot.shared().store.read().has_index(class, name)
    }

    /// Commit if success was marked (and failure was not), otherwise roll back
    ///
    /// Returns the final state. A commit that fails validation rolls back and
    /// returns the error; so does a transaction aborted by an earlier error
    /// that was marked successful (`TransactionAborted`).
    pub fn finish(mut self) -> GraphResult<TxState> {
        let commit = self.success && !self.failure;
        if commit && self.aborted {
            self.rollback();
            return Err(GraphError::TransactionAborted);
        }
        if !commit {
            self.rollback();
            return Ok(self.state);
        }

        let changes = std::mem::take(&mut self.overlay).into_changes();
        match self.snapshot.shared().commit(self.snapshot.version(), changes) {
            Ok(version) => {
                debug!("Transaction committed at version {}", version);
                self.state = TxState::Committed;
                Ok(self.state)
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("Transaction rolled back on conflict: {}", e);
                } else {
                    debug!("Transaction rolled back: {}", e);
                }
                self.state = TxState::RolledBack;
                Err(e)
            }
        }
    }

    fn rollback(&mut self) {
        self.overlay = Overlay::default();
        self.state = TxState::RolledBack;
        debug!("Transaction rolled back");
    }
}

impl GraphRead for Transaction {
    fn get_node(&self, id: NodeId) -> GraphResult<Node> {
        self.ensure_active()?;
        self.node_view(id)?.ok_or(GraphError::NodeNotFound(id))
    }

    fn get_relationship(&self, id: RelationshipId) -> GraphResult<Relationship> {
        self.ensure_active()?;
        self.relationship_view(id)?
            .ok_or(GraphError::RelationshipNotFound(id))
    }

    fn get_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> GraphResult<Vec<Relationship>> {
        self.ensure_active()?;
        if self.node_view(node)?.is_none() {
            return Err(GraphError::NodeNotFound(node));
        }
        let committed = if self.overlay.is_created(node.into()) {
            Vec::new()
        } else {
            self.snapshot.find_relationships(node, direction, types)?
        };
        Ok(self.overlay.relationships_view(node, direction, types, committed))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            warn!(
                "Transaction at version {} dropped without finish; rolling back",
                self.snapshot.version()
            );
            self.rollback();
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("snapshot", &self.snapshot.version())
            .field("state", &self.state)
            .field("pending", &self.overlay.changes().len())
            .field("aborted", &self.aborted)
            .finish()
    }
}

/// A named index as seen from inside a transaction
///
/// Writes are buffered with the transaction's other changes; reads see the
/// committed entries of the transaction's snapshot plus its own pending ones.
pub struct TxIndex<'tx, E> {
    tx: &'tx mut Transaction,
    name: String,
    _entity: PhantomData<E>,
}

impl<'tx, E: IndexedEntity> TxIndex<'tx, E> {
    fn new(tx: &'tx mut Transaction, name: &str) -> Self {
        TxIndex {
            tx,
            name: name.to_string(),
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index `entity` under `key` = `value`
    pub fn add(&mut self, entity: E, key: &str, value: impl Into<PropertyValue>) -> GraphResult<()> {
        let value = value.into();
        let name = self.name.as_str();
        self.tx.write(|tx| {
            tx.require_entity(entity.into())?;
            if !tx.index_exists(E::CLASS, name) {
                tx.overlay.create_index(E::CLASS, name);
            }
            tx.overlay.index_add(name, entity.into(), key, value);
            Ok(())
        })
    }

    /// Remove the entry `key` = `value` of `entity`
    pub fn remove(&mut self, entity: E, key: &str, value: impl Into<PropertyValue>) -> GraphResult<()> {
        self.remove_matching(entity, Some(key), Some(value.into()))
    }

    /// Remove every entry of `entity` under `key`
    pub fn remove_key(&mut self, entity: E, key: &str) -> GraphResult<()> {
        self.remove_matching(entity, Some(key), None)
    }

    /// Remove every entry of `entity`
    pub fn remove_entity(&mut self, entity: E) -> GraphResult<()> {
        self.remove_matching(entity, None, None)
    }

    fn remove_matching(&mut self, entity: E, key: Option<&str>, value: Option<PropertyValue>) -> GraphResult<()> {
        let name = self.name.as_str();
        self.tx.write(|tx| {
            if tx.index_exists(E::CLASS, name) {
                tx.overlay.index_remove(name, entity.into(), key, value);
            }
            Ok(())
        })
    }

    /// Exact lookup
    pub fn get(&self, key: &str, value: impl Into<PropertyValue>) -> GraphResult<IndexHits<E>> {
        let value = value.into();
        self.tx.ensure_active()?;
        let committed = self
            .tx
            .snapshot
            .index_lookup(E::CLASS, &self.name, key, Lookup::Exact(&value))?;
        let term = value.index_term();
        let hits = self
            .tx
            .overlay
            .index_hits(E::CLASS, &self.name, key, TermMatch::Exact(&term), committed);
        Ok(IndexHits::from_entities(hits))
    }

    /// Wildcard lookup (`?` one character, `*` any run)
    pub fn query(&self, key: &str, pattern: &str) -> GraphResult<IndexHits<E>> {
        self.tx.ensure_active()?;
        let pattern = WildcardPattern::compile(pattern)?;
        let committed = self
            .tx
            .snapshot
            .index_lookup(E::CLASS, &self.name, key, Lookup::Pattern(&pattern))?;
        let hits = self
            .tx
            .overlay
            .index_hits(E::CLASS, &self.name, key, TermMatch::Pattern(&pattern), committed);
        Ok(IndexHits::from_entities(hits))
    }

    /// Lookup in the combined `key:pattern` form
    pub fn query_string(&self, query: &str) -> GraphResult<IndexHits<E>> {
        let (key, pattern) = split_query(query)?;
        self.query(key, pattern)
    }
}
