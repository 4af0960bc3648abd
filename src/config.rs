//! Database configuration

use serde::{Deserialize, Serialize};

/// Settings for an embedded database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// fsync the write-ahead log on every commit
    pub sync_on_commit: bool,
    /// Node property keys maintained in `node_auto_index`
    pub node_auto_index_keys: Vec<String>,
    /// Relationship property keys maintained in `relationship_auto_index`
    pub relationship_auto_index_keys: Vec<String>,
    /// Reclaim old versions every this many commits (0 = only on demand)
    pub vacuum_interval: u64,
    /// Number of parsed queries kept for reuse (0 disables the cache)
    pub query_cache_size: usize,
    /// Size at which the write-ahead log starts a new file
    pub wal_segment_bytes: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            node_auto_index_keys: Vec::new(),
            relationship_auto_index_keys: Vec::new(),
            vacuum_interval: 64,
            query_cache_size: 128,
            wal_segment_bytes: 64 * 1024 * 1024,
        }
    }
}

impl DatabaseConfig {
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    pub fn with_node_auto_index<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_auto_index_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_relationship_auto_index<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationship_auto_index_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_vacuum_interval(mut self, commits: u64) -> Self {
        self.vacuum_interval = commits;
        self
    }

    pub fn with_query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    pub fn with_wal_segment_bytes(mut self, bytes: u64) -> Self {
        self.wal_segment_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DatabaseConfig::default();
        assert!(config.sync_on_commit);
        assert!(config.node_auto_index_keys.is_empty());
        assert_eq!(config.vacuum_interval, 64);
    }

    #[test]
    fn test_builder() {
        let config = DatabaseConfig::default()
            .with_sync_on_commit(false)
            .with_node_auto_index(["character", "species"])
            .with_vacuum_interval(0);
        assert!(!config.sync_on_commit);
        assert_eq!(config.node_auto_index_keys, vec!["character", "species"]);
        assert_eq!(config.vacuum_interval, 0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DatabaseConfig = serde_json::from_str(r#"{"query_cache_size": 4}"#).unwrap();
        assert_eq!(config.query_cache_size, 4);
        assert_eq!(config.wal_segment_bytes, DatabaseConfig::default().wal_segment_bytes);
    }
}
