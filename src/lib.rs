//! Tardis Graph Database
//!
//! An embedded, transactional property-graph database. Nodes and
//! relationships carry typed properties; relationships are typed and
//! directed. Changes are made in ACID transactions with snapshot isolation,
//! entities are found through explicit or automatic inverted indexes with
//! wildcard queries, and a Cypher-style query language reads the graph.
//!
//! # Architecture
//!
//! - [`graph`]: multi-versioned storage of nodes, relationships and properties
//! - [`transaction`]: snapshots, per-transaction overlays and optimistic commit
//! - [`index`]: named inverted indexes, auto indexing and wildcard lookups
//! - [`query`]: parser, planner and pull-based executor
//! - [`persistence`]: write-ahead log and recovery
//!
//! ## Example Usage
//!
//! ```rust
//! use tardis::{DatabaseConfig, GraphDatabase};
//!
//! let db = GraphDatabase::open_in_memory(DatabaseConfig::default());
//!
//! db.with_transaction(|tx| {
//!     let doctor = tx.create_node()?;
//!     tx.set_property(doctor, "character", "Doctor")?;
//!     let actor = tx.create_node()?;
//!     tx.set_property(actor, "actor", "Tom Baker")?;
//!     tx.create_relationship(actor, doctor, "PLAYED")?;
//!     tx.index_for_nodes("characters").add(doctor, "character", "Doctor")?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! let actors: Vec<_> = db
//!     .execute("start d = node:characters(character = 'Doctor') match (d)<-[:PLAYED]-(a) return a.actor")
//!     .unwrap()
//!     .column_as("a.actor")
//!     .unwrap()
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(actors.len(), 1);
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod database;
pub mod error;
pub mod graph;
pub mod index;
pub mod persistence;
pub mod query;
pub mod transaction;

// Re-export main types for convenience
pub use config::DatabaseConfig;
pub use database::GraphDatabase;
pub use error::{ErrorKind, GraphError, GraphResult};
pub use graph::{
    Direction, EntityClass, EntityId, Node, NodeId, PropertyMap, PropertyValue, Relationship, RelationshipId,
    RelationshipType, VacuumStats,
};
pub use index::{IndexHandle, IndexHits, IndexedEntity, WildcardPattern};
pub use query::{ColumnIter, ResultSet, Row, Value};
pub use transaction::{GraphRead, Snapshot, Transaction, TxIndex, TxState};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
