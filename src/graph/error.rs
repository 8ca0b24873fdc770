use thiserror::Error;

use crate::types::{EdgeId, NodeId};

/// Errors raised by a [`super::GraphBackend`].
#[derive(Debug, Error)]
pub enum GraphError {
    /// The node does not exist (or was deleted in the current transaction).
    #[error("node {0} not found")]
    NodeNotFound(NodeId),
    /// The edge does not exist.
    #[error("edge {0} not found")]
    EdgeNotFound(EdgeId),
    /// A node cannot be deleted while edges still reference it.
    #[error("node {0} still has edges")]
    NodeHasEdges(NodeId),
    /// A write was attempted outside of a transaction or bulk session.
    #[error("no active transaction or bulk session")]
    NoActiveTransaction,
    /// A transaction is already open; transactions do not nest.
    #[error("a transaction is already active")]
    TransactionActive,
    /// Transactional operations are not available while in bulk mode.
    #[error("backend is in bulk mode")]
    BulkModeActive,
    /// The backend cannot serve requests.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for graph backend operations.
pub type Result<T> = std::result::Result<T, GraphError>;
