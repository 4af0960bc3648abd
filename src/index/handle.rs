//! Read handles on named indexes

use super::hits::{IndexHits, IndexedEntity};
use super::wildcard::split_query;
use crate::database::GraphDatabase;
use crate::error::GraphResult;
use crate::graph::PropertyValue;
use std::marker::PhantomData;

/// A named index read at the latest committed version
///
/// Every call takes a fresh snapshot. Writes go through
/// [`Transaction::index_for_nodes`](crate::Transaction::index_for_nodes).
#[derive(Debug, Clone)]
pub struct IndexHandle<E> {
    db: GraphDatabase,
    name: String,
    _entity: PhantomData<E>,
}

impl<E: IndexedEntity> IndexHandle<E> {
    pub(crate) fn new(db: GraphDatabase, name: &str) -> Self {
        IndexHandle {
            db,
            name: name.to_string(),
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entities indexed under `key` = `value`
    pub fn get(&self, key: &str, value: impl Into<PropertyValue>) -> GraphResult<IndexHits<E>> {
        self.db.snapshot()?.index_get(&self.name, key, &value.into())
    }

    /// Entities whose `key` entry matches a `?`/`*` wildcard pattern
    pub fn query(&self, key: &str, pattern: &str) -> GraphResult<IndexHits<E>> {
        self.db.snapshot()?.index_query(&self.name, key, pattern)
    }

    /// Lookup in the combined `key:pattern` form, e.g. `species:S*n`
    pub fn query_string(&self, query: &str) -> GraphResult<IndexHits<E>> {
        let (key, pattern) = split_query(query)?;
        self.query(key, pattern)
    }
}
