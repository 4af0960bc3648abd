//! Named secondary indexes
//!
//! Inverted indexes from (key, term) to versioned postings, one namespace
//! per entity class. Lookups are exact or wildcard (`?`, `*`).

pub mod handle;
pub mod hits;
pub mod inverted;
pub mod manager;
pub mod wildcard;

pub use handle::IndexHandle;
pub use hits::{IndexHits, IndexedEntity};
pub use inverted::InvertedIndex;
pub use manager::{IndexManager, NODE_AUTO_INDEX, RELATIONSHIP_AUTO_INDEX};
pub use wildcard::{split_query, WildcardPattern};
