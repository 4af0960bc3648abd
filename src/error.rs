//! Crate-wide error type

use crate::graph::{EntityId, NodeId, RelationshipId};
use crate::persistence::WalError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by storage, transactions, indexes and queries
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("{0} not found")]
    NodeNotFound(NodeId),

    #[error("{0} not found")]
    RelationshipNotFound(RelationshipId),

    #[error("Property '{key}' not found on {entity}")]
    PropertyNotFound { entity: EntityId, key: String },

    #[error("{node} is not attached to {relationship}")]
    NotAttached { node: NodeId, relationship: RelationshipId },

    #[error("Relationship endpoint {0} does not exist")]
    DanglingReference(NodeId),

    #[error("Cannot delete {node}: {count} relationship(s) still attached")]
    NodeHasRelationships { node: NodeId, count: usize },

    #[error("Write conflict on {0}: modified by a concurrent transaction")]
    WriteConflict(EntityId),

    #[error("Snapshot at version {0} is no longer available")]
    SnapshotTooOld(u64),

    #[error("Unbound variable '{0}'")]
    UnboundVariable(String),

    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Index inconsistency: {0}")]
    IndexInconsistency(String),

    #[error("Transaction aborted by an earlier error")]
    TransactionAborted,

    #[error("Database has been shut down")]
    DatabaseShutdown,

    #[error("Database at {0:?} is open elsewhere")]
    DatabaseLocked(PathBuf),

    #[error("Expected at most one index hit, found {0}")]
    NotUnique(usize),

    #[error("Write-ahead log error: {0}")]
    Wal(#[from] WalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Coarse classification of a [`GraphError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    DanglingReference,
    Constraint,
    Conflict,
    UnboundVariable,
    QuerySyntax,
    TypeMismatch,
    IndexInconsistency,
    Lifecycle,
    Durability,
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::NodeNotFound(_)
            | GraphError::RelationshipNotFound(_)
            | GraphError::PropertyNotFound { .. }
            | GraphError::NotAttached { .. } => ErrorKind::NotFound,
            GraphError::DanglingReference(_) => ErrorKind::DanglingReference,
            GraphError::NodeHasRelationships { .. } => ErrorKind::Constraint,
            GraphError::WriteConflict(_) | GraphError::SnapshotTooOld(_) => ErrorKind::Conflict,
            GraphError::UnboundVariable(_) => ErrorKind::UnboundVariable,
            GraphError::QuerySyntax(_) => ErrorKind::QuerySyntax,
            GraphError::TypeError(_) => ErrorKind::TypeMismatch,
            GraphError::IndexInconsistency(_) => ErrorKind::IndexInconsistency,
            GraphError::TransactionAborted
            | GraphError::DatabaseShutdown
            | GraphError::DatabaseLocked(_)
            | GraphError::NotUnique(_) => ErrorKind::Lifecycle,
            GraphError::Wal(_) | GraphError::Io(_) => ErrorKind::Durability,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}
