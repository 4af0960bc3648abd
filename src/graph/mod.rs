//! Property graph data model and multi-versioned storage
//!
//! - Nodes and relationships with typed scalar properties
//! - Directed relationships with interned, user-defined types
//! - Mutations as the unit of change shared by commit, log and recovery

pub mod mutation;
pub mod node;
pub mod property;
pub mod relationship;
pub mod store;
pub mod types;

pub use mutation::{ChangeSet, Mutation};
pub use node::Node;
pub use property::{PropertyMap, PropertyValue};
pub use relationship::Relationship;
pub use store::{GraphStore, VacuumStats};
pub use types::{Direction, EntityClass, EntityId, NodeId, RelationshipId, RelationshipType};
