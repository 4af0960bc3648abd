//! The embedded database handle
//!
//! [`GraphDatabase`] is a cheap, cloneable handle over shared state: the
//! multi-versioned store behind a read/write lock, the snapshot registry,
//! id allocators and (for on-disk databases) the write-ahead log and the
//! directory lock.

use crate::config::DatabaseConfig;
use crate::error::{GraphError, GraphResult};
use crate::graph::{
    ChangeSet, Direction, EntityClass, GraphStore, Node, NodeId, Relationship, RelationshipId, RelationshipType,
    VacuumStats,
};
use crate::index::{IndexHandle, IndexManager};
use crate::persistence::{self, Wal, WalEntry};
use crate::query::{QueryEngine, ResultSet};
use crate::transaction::snapshot::SnapshotRegistry;
use crate::transaction::{validation, GraphRead, Snapshot, Transaction};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lock file taken in the database directory while it is open
pub const LOCK_FILE: &str = "LOCK";

/// Ids reserved in the log at a time
const ID_BLOCK: u64 = 1024;

/// Monotonic id source
///
/// On-disk databases log a reservation before handing out ids past the
/// last one, so ids given to rolled-back transactions stay used after a
/// restart.
struct IdAllocator {
    class: EntityClass,
    next: AtomicU64,
    /// Ids below this are covered by a logged reservation
    reserved: AtomicU64,
}

impl IdAllocator {
    fn new(class: EntityClass, next: u64, reserved: u64) -> Self {
        IdAllocator {
            class,
            next: AtomicU64::new(next),
            reserved: AtomicU64::new(reserved),
        }
    }
}

/// Log and lock of an on-disk database
struct Durable {
    wal: Wal,
    dir_lock: File,
    next_node_id: u64,
    next_relationship_id: u64,
}

/// State shared by every handle, snapshot and transaction of one database
pub(crate) struct Shared {
    pub(crate) store: RwLock<GraphStore>,
    pub(crate) snapshots: SnapshotRegistry,
    /// Newest version readers may pin
    pub(crate) committed: AtomicU64,
    node_ids: IdAllocator,
    relationship_ids: IdAllocator,
    wal: Option<Mutex<Wal>>,
    dir_lock: Mutex<Option<File>>,
    config: DatabaseConfig,
    engine: QueryEngine,
    commits_since_vacuum: AtomicU64,
    shut_down: AtomicBool,
    path: Option<PathBuf>,
}

impl Shared {
    fn new(store: GraphStore, durable: Option<Durable>, config: DatabaseConfig, path: Option<PathBuf>) -> Self {
        let committed = store.committed_version();
        // Reserving only matters when there is a log to reserve in
        let (node_ids, relationship_ids, wal, dir_lock) = match durable {
            Some(durable) => (
                IdAllocator::new(EntityClass::Node, durable.next_node_id, durable.next_node_id),
                IdAllocator::new(
                    EntityClass::Relationship,
                    durable.next_relationship_id,
                    durable.next_relationship_id,
                ),
                Some(Mutex::new(durable.wal)),
                Some(durable.dir_lock),
            ),
            None => (
                IdAllocator::new(EntityClass::Node, 1, u64::MAX),
                IdAllocator::new(EntityClass::Relationship, 1, u64::MAX),
                None,
                None,
            ),
        };
        Shared {
            store: RwLock::new(store),
            snapshots: SnapshotRegistry::default(),
            committed: AtomicU64::new(committed),
            node_ids,
            relationship_ids,
            wal,
            dir_lock: Mutex::new(dir_lock),
            engine: QueryEngine::new(config.query_cache_size),
            config,
            commits_since_vacuum: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            path,
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn check_open(&self) -> GraphResult<()> {
        if self.is_shut_down() {
            return Err(GraphError::DatabaseShutdown);
        }
        Ok(())
    }

    pub(crate) fn allocate_node_id(&self) -> GraphResult<NodeId> {
        self.allocate(&self.node_ids).map(NodeId::new)
    }

    pub(crate) fn allocate_relationship_id(&self) -> GraphResult<RelationshipId> {
        self.allocate(&self.relationship_ids).map(RelationshipId::new)
    }

    fn allocate(&self, ids: &IdAllocator) -> GraphResult<u64> {
        self.check_open()?;
        let id = ids.next.fetch_add(1, Ordering::Relaxed);
        if id < ids.reserved.load(Ordering::Acquire) {
            return Ok(id);
        }
        let Some(wal) = &self.wal else {
            return Ok(id);
        };

        let mut wal = wal.lock();
        if id >= ids.reserved.load(Ordering::Acquire) {
            let limit = id + 1 + ID_BLOCK;
            wal.append(WalEntry::Reserve { class: ids.class, limit })?;
            ids.reserved.store(limit, Ordering::Release);
            debug!("Reserved {} ids up to {}", ids.class, limit);
        }
        Ok(id)
    }

    /// Validate, log and apply `changes` prepared against `snapshot`
    ///
    /// Returns the new committed version. An empty change set commits
    /// without creating a version.
    pub(crate) fn commit(&self, snapshot: u64, changes: ChangeSet) -> GraphResult<u64> {
        self.check_open()?;
        if changes.is_empty() {
            return Ok(self.committed.load(Ordering::Acquire));
        }

        let mut store = self.store.write();
        validation::validate_commit(&store, snapshot, &changes).into_result()?;

        let version = store.committed_version() + 1;
        let timestamp = chrono::Utc::now().timestamp_millis();
        if let Some(wal) = &self.wal {
            wal.lock().append(WalEntry::Commit {
                version,
                timestamp,
                changes: changes.clone(),
            })?;
        }
        store.apply(version, timestamp, &changes)?;
        self.committed.store(version, Ordering::Release);
        debug!("Committed {} mutation(s) as version {}", changes.len(), version);

        let interval = self.config.vacuum_interval;
        if interval > 0 && self.commits_since_vacuum.fetch_add(1, Ordering::Relaxed) + 1 >= interval {
            self.commits_since_vacuum.store(0, Ordering::Relaxed);
            let horizon = self.snapshots.horizon(&self.committed);
            store.vacuum(horizon);
        }
        Ok(version)
    }

    fn vacuum(&self) -> GraphResult<VacuumStats> {
        self.check_open()?;
        let mut store = self.store.write();
        let horizon = self.snapshots.horizon(&self.committed);
        let stats = store.vacuum(horizon);
        self.commits_since_vacuum.store(0, Ordering::Relaxed);
        info!(
            "Vacuum up to version {}: {} version(s), {} posting(s) reclaimed",
            horizon, stats.versions_pruned, stats.postings_pruned
        );
        Ok(stats)
    }

    fn shutdown(&self) -> GraphResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let closed = match &self.wal {
            Some(wal) => wal.lock().close(),
            None => Ok(()),
        };
        if let Some(lock) = self.dir_lock.lock().take() {
            if let Err(e) = FileExt::unlock(&lock) {
                warn!("Could not release database lock: {}", e);
            }
        }
        closed?;
        info!("Database shut down");
        Ok(())
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Error while shutting down database: {}", e);
        }
    }
}

/// An embedded graph database
///
/// Cloning is cheap; every clone refers to the same database. The database
/// shuts down when [`shutdown`](GraphDatabase::shutdown) is called or the
/// last handle, snapshot, transaction or result set is dropped.
#[derive(Clone)]
pub struct GraphDatabase {
    shared: Arc<Shared>,
}

impl GraphDatabase {
    /// Open (or create) a durable database under `path`
    ///
    /// The directory is locked for the lifetime of the database; a second
    /// open of the same path fails with `DatabaseLocked`. The write-ahead
    /// log in `path/wal` is replayed before the handle is returned.
    pub fn open(path: impl AsRef<Path>, config: DatabaseConfig) -> GraphResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;
        info!("Opening database at {:?}", path);
        let dir_lock = Self::lock_directory(&path)?;

        let mut store = GraphStore::with_indexes(Self::auto_indexes(&config));
        let (mut wal, stats) = persistence::recover(&path, &mut store)?;
        wal.set_sync_mode(config.sync_on_commit);
        wal.set_segment_bytes(config.wal_segment_bytes);

        let durable = Durable {
            wal,
            dir_lock,
            next_node_id: stats.next_node_id(),
            next_relationship_id: stats.next_relationship_id(),
        };
        let shared = Shared::new(store, Some(durable), config, Some(path));
        info!("Database ready at version {}", shared.committed.load(Ordering::Acquire));
        Ok(GraphDatabase {
            shared: Arc::new(shared),
        })
    }

    /// A volatile database; nothing is written to disk
    pub fn open_in_memory(config: DatabaseConfig) -> Self {
        debug!("Opening in-memory database");
        let store = GraphStore::with_indexes(Self::auto_indexes(&config));
        GraphDatabase {
            shared: Arc::new(Shared::new(store, None, config, None)),
        }
    }

    fn lock_directory(path: &Path) -> GraphResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path.join(LOCK_FILE))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(GraphError::DatabaseLocked(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn auto_indexes(config: &DatabaseConfig) -> IndexManager {
        IndexManager::with_auto_keys(
            config.node_auto_index_keys.iter().cloned(),
            config.relationship_auto_index_keys.iter().cloned(),
        )
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Directory of an on-disk database
    pub fn path(&self) -> Option<&Path> {
        self.shared.path.as_deref()
    }

    /// Newest committed version
    pub fn committed_version(&self) -> u64 {
        self.shared.committed.load(Ordering::Acquire)
    }

    pub fn begin_transaction(&self) -> GraphResult<Transaction> {
        Ok(Transaction::new(self.snapshot()?))
    }

    /// Run `f` in a transaction that commits if `f` returns `Ok` and rolls
    /// back otherwise
    pub fn with_transaction<T, F>(&self, f: F) -> GraphResult<T>
    where
        F: FnOnce(&mut Transaction) -> GraphResult<T>,
    {
        let mut tx = self.begin_transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.mark_success();
                tx.finish()?;
                Ok(value)
            }
            Err(e) => {
                tx.mark_failure();
                tx.finish()?;
                Err(e)
            }
        }
    }

    /// A stable read view at the latest committed version
    pub fn snapshot(&self) -> GraphResult<Snapshot> {
        self.shared.check_open()?;
        Ok(Snapshot::new(Arc::clone(&self.shared)))
    }

    /// Compile and run a query against a fresh snapshot
    pub fn execute(&self, query: &str) -> GraphResult<ResultSet> {
        let snapshot = self.snapshot()?;
        self.shared.engine.execute(snapshot, query)
    }

    pub fn node_count(&self) -> GraphResult<usize> {
        self.snapshot()?.node_count()
    }

    pub fn relationship_count(&self) -> GraphResult<usize> {
        self.snapshot()?.relationship_count()
    }

    /// Read-only handle on the node index `name`
    pub fn index_for_nodes(&self, name: &str) -> IndexHandle<NodeId> {
        IndexHandle::new(self.clone(), name)
    }

    /// Read-only handle on the relationship index `name`
    pub fn index_for_relationships(&self, name: &str) -> IndexHandle<RelationshipId> {
        IndexHandle::new(self.clone(), name)
    }

    /// Reclaim versions no live snapshot can see
    pub fn vacuum(&self) -> GraphResult<VacuumStats> {
        self.shared.vacuum()
    }

    /// Number of live snapshots (transactions and result sets included)
    pub fn active_snapshots(&self) -> usize {
        self.shared.snapshots.active_count()
    }

    /// Flush and close the log; later operations fail with `DatabaseShutdown`
    pub fn shutdown(&self) -> GraphResult<()> {
        self.shared.shutdown()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }
}

impl GraphRead for GraphDatabase {
    fn get_node(&self, id: NodeId) -> GraphResult<Node> {
        self.snapshot()?.get_node(id)
    }

    fn get_relationship(&self, id: RelationshipId) -> GraphResult<Relationship> {
        self.snapshot()?.get_relationship(id)
    }

    fn get_relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> GraphResult<Vec<Relationship>> {
        self.snapshot()?.get_relationships(node, direction, types)
    }
}

impl std::fmt::Debug for GraphDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDatabase")
            .field("path", &self.shared.path)
            .field("committed", &self.committed_version())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::persistence::wal::Fault;
    use tempfile::TempDir;

    fn db() -> GraphDatabase {
        GraphDatabase::open_in_memory(DatabaseConfig::default())
    }

    #[test]
    fn test_ids_are_never_reused() {
        let db = db();
        let mut tx = db.begin_transaction().unwrap();
        let rolled_back = tx.create_node().unwrap();
        tx.mark_failure();
        tx.finish().unwrap();

        let kept = db
            .with_transaction(|tx| tx.create_node())
            .unwrap();
        assert!(kept.as_u64() > rolled_back.as_u64());
        assert!(db.get_node(rolled_back).unwrap_err().is_not_found());
    }

    #[test]
    fn test_empty_commit_keeps_version() {
        let db = db();
        db.with_transaction(|_| Ok(())).unwrap();
        assert_eq!(db.committed_version(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let db = db();
        db.shutdown().unwrap();
        db.shutdown().unwrap();
        assert!(matches!(db.begin_transaction(), Err(GraphError::DatabaseShutdown)));
        assert!(matches!(db.execute("start n=node(*) return n"), Err(GraphError::DatabaseShutdown)));
    }

    #[test]
    fn test_vacuum_respects_live_snapshots() {
        let db = GraphDatabase::open_in_memory(DatabaseConfig::default().with_vacuum_interval(0));
        let id = db
            .with_transaction(|tx| {
                let id = tx.create_node()?;
                tx.set_property(id, "character", "Doctor")?;
                Ok(id)
            })
            .unwrap();
        let old = db.snapshot().unwrap();
        db.with_transaction(|tx| tx.set_property(id, "character", "The Doctor"))
            .unwrap();

        db.vacuum().unwrap();
        assert_eq!(old.get_property(id, "character").unwrap(), "Doctor".into());
        drop(old);

        let stats = db.vacuum().unwrap();
        assert_eq!(stats.versions_pruned, 1);
        assert_eq!(db.get_property(id, "character").unwrap(), "The Doctor".into());
    }

    fn create_named(db: &GraphDatabase, character: &str) -> NodeId {
        db.with_transaction(|tx| {
            let id = tx.create_node()?;
            tx.set_property(id, "character", character)?;
            Ok(id)
        })
        .unwrap()
    }

    #[test]
    fn test_failed_log_append_loses_only_that_commit() {
        for fault in [Fault::TornWrite, Fault::FailedSync] {
            let dir = TempDir::new().unwrap();
            let (first, failed, last, version) = {
                let db = GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap();
                let first = create_named(&db, "Susan");

                let mut tx = db.begin_transaction().unwrap();
                let failed = tx.create_node().unwrap();
                tx.set_property(failed, "character", "Ian").unwrap();
                tx.set_property(first, "character", "Susan Foreman").unwrap();
                db.shared.wal.as_ref().unwrap().lock().inject_fault(fault);
                tx.mark_success();
                assert_eq!(tx.finish().unwrap_err().kind(), ErrorKind::Durability);
                assert!(db.get_node(failed).unwrap_err().is_not_found());

                let last = create_named(&db, "Barbara");
                let version = db.committed_version();
                db.shutdown().unwrap();
                (first, failed, last, version)
            };

            let db = GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap();
            assert_eq!(db.committed_version(), version, "{:?}", fault);
            assert_eq!(db.node_count().unwrap(), 2);
            assert!(db.get_node(failed).unwrap_err().is_not_found());
            assert_eq!(db.get_property(first, "character").unwrap(), "Susan".into());
            assert_eq!(db.get_property(last, "character").unwrap(), "Barbara".into());
        }
    }

    #[test]
    fn test_rolled_back_ids_stay_used_after_reopen() {
        let dir = TempDir::new().unwrap();
        let rolled_back = {
            let db = GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap();
            let mut tx = db.begin_transaction().unwrap();
            // Crosses a reservation block
            let ids: Vec<NodeId> = (0..ID_BLOCK + 5).map(|_| tx.create_node().unwrap()).collect();
            tx.mark_failure();
            tx.finish().unwrap();
            db.shutdown().unwrap();
            ids
        };

        let db = GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap();
        assert_eq!(db.node_count().unwrap(), 0);
        let next = db.with_transaction(|tx| tx.create_node()).unwrap();
        assert!(rolled_back.iter().all(|id| *id < next));
    }

    #[test]
    fn test_directory_is_locked_while_open() {
        let dir = TempDir::new().unwrap();
        let db = GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap();
        assert!(dir.path().join(LOCK_FILE).exists());

        let err = GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap_err();
        assert!(matches!(err, GraphError::DatabaseLocked(_)));
        assert_eq!(err.kind(), ErrorKind::Lifecycle);

        db.shutdown().unwrap();
        let reopened = GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap();
        drop(reopened);
        drop(db);
        GraphDatabase::open(dir.path(), DatabaseConfig::default()).unwrap();
    }
}
