//! Persistence layer
//!
//! Durability comes from the write-ahead log alone: the in-memory store is
//! rebuilt on open by re-applying every logged commit in order. Id
//! reservations in the log keep allocation monotonic across restarts.

pub mod wal;

pub use wal::{Wal, WalEntry, WalError, WalResult};

use crate::error::GraphResult;
use crate::graph::{EntityClass, GraphStore};
use std::path::Path;
use tracing::info;

/// What [`recover`] rebuilt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub commits: u64,
    pub last_version: u64,
    /// Highest node id seen, if any
    pub max_node_id: Option<u64>,
    /// Highest relationship id seen, if any
    pub max_relationship_id: Option<u64>,
    /// Largest logged node id reservation
    pub node_id_limit: u64,
    /// Largest logged relationship id reservation
    pub relationship_id_limit: u64,
}

impl RecoveryStats {
    /// First node id that was never created nor possibly handed out
    pub fn next_node_id(&self) -> u64 {
        next_id(self.max_node_id, self.node_id_limit)
    }

    /// First relationship id that was never created nor possibly handed out
    pub fn next_relationship_id(&self) -> u64 {
        next_id(self.max_relationship_id, self.relationship_id_limit)
    }
}

fn next_id(max_created: Option<u64>, limit: u64) -> u64 {
    max_created.map_or(1, |max| max + 1).max(limit).max(1)
}

/// Open the log under `base_path/wal` and replay it into `store`
pub fn recover(base_path: &Path, store: &mut GraphStore) -> GraphResult<(Wal, RecoveryStats)> {
    let wal_path = base_path.join("wal");
    info!("Recovering database from {:?}", wal_path);

    let mut wal = Wal::new(&wal_path)?;
    let mut stats = RecoveryStats::default();

    wal.replay(|entry| -> GraphResult<()> {
        match entry {
            WalEntry::Commit {
                version,
                timestamp,
                changes,
            } => {
                store.apply(version, timestamp, &changes)?;
                let (max_node, max_rel) = changes.max_created_ids();
                stats.max_node_id = stats.max_node_id.max(max_node);
                stats.max_relationship_id = stats.max_relationship_id.max(max_rel);
                stats.last_version = stats.last_version.max(version);
                stats.commits += 1;
            }
            WalEntry::Reserve { class, limit } => {
                let reserved = match class {
                    EntityClass::Node => &mut stats.node_id_limit,
                    EntityClass::Relationship => &mut stats.relationship_id_limit,
                };
                *reserved = (*reserved).max(limit);
            }
        }
        Ok(())
    })?;

    info!(
        "Recovered {} commit(s), last version {}",
        stats.commits, stats.last_version
    );
    Ok((wal, stats))
}
