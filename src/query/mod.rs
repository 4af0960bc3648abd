//! Query processing module
//!
//! A Cypher-style read language: `start` binds variables from indexes or
//! ids, `match` walks relationship patterns, `where` filters, and `return`
//! projects with optional aggregation, ordering and paging.
//!
//! Text is parsed into an [`ast::Query`], planned into a tree of pull-based
//! operators and executed lazily against a [`Snapshot`].

pub mod ast;
pub mod executor;
pub mod parser;
pub mod result;

pub use ast::Query;
pub use executor::{Record, Value};
pub use parser::{parse_query, ParseError, ParseResult};
pub use result::{ColumnIter, ResultSet, Row};

use crate::error::GraphResult;
use crate::transaction::Snapshot;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Query engine - parses, caches and executes queries
///
/// Parsed queries are cached by their text; planning and execution run
/// afresh every time.
pub struct QueryEngine {
    cache: Option<Mutex<LruCache<String, Arc<Query>>>>,
}

impl QueryEngine {
    /// Create an engine caching up to `cache_size` parsed queries (0 disables the cache)
    pub fn new(cache_size: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(cache_size).map(|size| Mutex::new(LruCache::new(size))),
        }
    }

    /// Parse `text`, reusing a cached parse when available
    pub fn parse(&self, text: &str) -> GraphResult<Arc<Query>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(parse_query(text)?));
        };
        if let Some(query) = cache.lock().get(text) {
            trace!(query = text, "query cache hit");
            return Ok(Arc::clone(query));
        }
        let query = Arc::new(parse_query(text)?);
        cache.lock().put(text.to_string(), Arc::clone(&query));
        Ok(query)
    }

    /// Parse, plan and start executing `text` against `snapshot`
    pub fn execute(&self, snapshot: Snapshot, text: &str) -> GraphResult<ResultSet> {
        let query = self.parse(text)?;
        executor::execute(&query, snapshot)
    }

    /// Number of cached parses
    pub fn cached(&self) -> usize {
        self.cache.as_ref().map_or(0, |cache| cache.lock().len())
    }
}
