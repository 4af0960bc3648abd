//! Typed index results

use crate::error::{GraphError, GraphResult};
use crate::graph::{EntityClass, EntityId, NodeId, RelationshipId};
use std::fmt;

/// An entity id type that can be stored in an index
pub trait IndexedEntity: Copy + Eq + fmt::Debug + Into<EntityId> + Send + Sync + 'static {
    const CLASS: EntityClass;

    fn from_entity(entity: EntityId) -> Option<Self>;
}

impl IndexedEntity for NodeId {
    const CLASS: EntityClass = EntityClass::Node;

    fn from_entity(entity: EntityId) -> Option<Self> {
        entity.as_node()
    }
}

impl IndexedEntity for RelationshipId {
    const CLASS: EntityClass = EntityClass::Relationship;

    fn from_entity(entity: EntityId) -> Option<Self> {
        entity.as_relationship()
    }
}

/// Result of an index lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHits<E> {
    hits: Vec<E>,
}

impl<E: IndexedEntity> IndexHits<E> {
    pub fn new(hits: Vec<E>) -> Self {
        Self { hits }
    }

    pub(crate) fn from_entities(entities: Vec<EntityId>) -> Self {
        Self {
            hits: entities.into_iter().filter_map(E::from_entity).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.hits.iter()
    }

    pub fn first(&self) -> Option<E> {
        self.hits.first().copied()
    }

    /// The only hit, `None` when there are none
    ///
    /// Fails with [`GraphError::NotUnique`] when more than one entity matched.
    pub fn single(&self) -> GraphResult<Option<E>> {
        match self.hits.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            many => Err(GraphError::NotUnique(many.len())),
        }
    }

    pub fn contains(&self, entity: E) -> bool {
        self.hits.contains(&entity)
    }

    pub fn into_vec(self) -> Vec<E> {
        self.hits
    }
}

impl<E> IntoIterator for IndexHits<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a IndexHits<E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single() {
        let none: IndexHits<NodeId> = IndexHits::new(vec![]);
        assert_eq!(none.single().unwrap(), None);

        let one = IndexHits::new(vec![NodeId::new(3)]);
        assert_eq!(one.single().unwrap(), Some(NodeId::new(3)));

        let two = IndexHits::new(vec![NodeId::new(3), NodeId::new(4)]);
        assert!(matches!(two.single(), Err(GraphError::NotUnique(2))));
    }

    #[test]
    fn test_from_entities_filters_class() {
        let hits: IndexHits<RelationshipId> = IndexHits::from_entities(vec![
            NodeId::new(1).into(),
            RelationshipId::new(2).into(),
        ]);
        assert_eq!(hits.into_vec(), vec![RelationshipId::new(2)]);
    }
}
