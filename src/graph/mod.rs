//! Property-graph backend abstraction.
//!
//! The synchronisation engine talks to storage exclusively through
//! [`GraphBackend`]: labelled nodes and edges with property maps, named
//! secondary indexes keyed by `(key, value)` pairs, and two write modes.
//! Transactional mode gives all-or-nothing batches; bulk mode trades
//! atomicity for throughput and is used for first-time insertion.

mod error;
mod index;
mod memory;
mod value;

pub use error::{GraphError, Result};
pub use index::{pattern_matches, NodeIndex, WILDCARD};
pub use memory::{MemGraph, MemGraphStats};
pub use value::{PropMap, PropValue};

use tracing::warn;

use crate::types::{EdgeId, NodeId};

/// Write mode the backend is currently in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GraphMode {
    /// Writes require an explicit transaction.
    Transactional,
    /// Writes are applied immediately without rollback support.
    Bulk,
}

/// Edge direction relative to a node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dir {
    /// Edges whose source is the node.
    Out,
    /// Edges whose target is the node.
    In,
    /// Both directions; self-loops are reported once.
    Both,
}

/// Materialised edge record.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeData {
    /// Edge identifier.
    pub id: EdgeId,
    /// Source node.
    pub src: NodeId,
    /// Target node.
    pub dst: NodeId,
    /// Edge label.
    pub label: String,
    /// Edge properties.
    pub props: PropMap,
}

impl EdgeData {
    /// Returns a boolean edge property, treating absence as `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.props
            .get(key)
            .and_then(PropValue::as_bool)
            .unwrap_or(false)
    }
}

/// Storage operations the synchronisation engine relies on.
pub trait GraphBackend {
    /// Current write mode.
    fn mode(&self) -> GraphMode;
    /// Opens a transaction. Fails in bulk mode or when one is already open.
    fn begin_tx(&mut self) -> Result<()>;
    /// Commits the open transaction.
    fn commit_tx(&mut self) -> Result<()>;
    /// Discards every write since [`GraphBackend::begin_tx`].
    fn rollback_tx(&mut self) -> Result<()>;
    /// Switches to bulk mode. Fails while a transaction is open.
    fn enter_bulk_mode(&mut self) -> Result<()>;
    /// Leaves bulk mode, making bulk writes durable.
    fn exit_bulk_mode(&mut self) -> Result<()>;

    /// Creates a node with `label` and initial properties.
    fn create_node(&mut self, label: &str, props: PropMap) -> Result<NodeId>;
    /// Deletes a node. Fails with [`GraphError::NodeHasEdges`] if any edge remains.
    fn delete_node(&mut self, node: NodeId) -> Result<()>;
    /// Returns true if `node` exists.
    fn contains_node(&self, node: NodeId) -> bool;
    /// Label of `node`.
    fn node_label(&self, node: NodeId) -> Result<String>;
    /// Reads a node property.
    fn property(&self, node: NodeId, key: &str) -> Result<Option<PropValue>>;
    /// Property keys present on `node`, in sorted order.
    fn property_keys(&self, node: NodeId) -> Result<Vec<String>>;
    /// Sets a node property, replacing any previous value.
    fn set_property(&mut self, node: NodeId, key: &str, value: PropValue) -> Result<()>;
    /// Removes a node property, returning the previous value.
    fn remove_property(&mut self, node: NodeId, key: &str) -> Result<Option<PropValue>>;

    /// Creates a directed edge.
    fn create_edge(&mut self, src: NodeId, dst: NodeId, label: &str, props: PropMap)
        -> Result<EdgeId>;
    /// Deletes an edge.
    fn delete_edge(&mut self, edge: EdgeId) -> Result<()>;
    /// Reads an edge.
    fn edge(&self, edge: EdgeId) -> Result<EdgeData>;
    /// Edges incident to `node`, optionally restricted to one label.
    fn edges(&self, node: NodeId, dir: Dir, label: Option<&str>) -> Result<Vec<EdgeData>>;

    /// Adds `node` to the named index under `(key, value)`.
    fn index_add(&mut self, index: &str, node: NodeId, key: &str, value: &str) -> Result<()>;
    /// Removes `node` from one entry of the named index, or from all its
    /// entries in that index when `entry` is `None`.
    fn index_remove(&mut self, index: &str, node: NodeId, entry: Option<(&str, &str)>)
        -> Result<()>;
    /// Exact index lookup.
    fn index_get(&self, index: &str, key: &str, value: &str) -> Result<Vec<NodeId>>;
    /// Pattern index lookup; see [`pattern_matches`].
    fn index_query(&self, index: &str, key_pattern: &str, value_pattern: &str)
        -> Result<Vec<NodeId>>;
    /// Entries `node` holds in the named index.
    fn index_entries(&self, index: &str, node: NodeId) -> Result<Vec<(String, String)>>;
    /// Names of all indexes that exist.
    fn index_names(&self) -> Vec<String>;
    /// Drops a whole index. Returns false if it did not exist.
    fn drop_index(&mut self, index: &str) -> Result<bool>;

    /// Reads a string property; non-string values read as `None`.
    fn string_property(&self, node: NodeId, key: &str) -> Result<Option<String>> {
        Ok(self
            .property(node, key)?
            .and_then(|value| value.as_str().map(str::to_owned)))
    }

    /// Returns true if `node` has at least one incident edge.
    fn has_edges(&self, node: NodeId) -> Result<bool> {
        Ok(!self.edges(node, Dir::Both, None)?.is_empty())
    }

    /// Removes `node` from every index.
    fn remove_from_all_indexes(&mut self, node: NodeId) -> Result<()> {
        for name in self.index_names() {
            self.index_remove(&name, node, None)?;
        }
        Ok(())
    }
}

/// Transaction guard. Rolls back on drop unless [`Tx::commit`] was called.
pub struct Tx<'g> {
    graph: &'g mut dyn GraphBackend,
    open: bool,
}

impl<'g> Tx<'g> {
    /// Opens a transaction on `graph`.
    pub fn begin(graph: &'g mut dyn GraphBackend) -> Result<Self> {
        graph.begin_tx()?;
        Ok(Self { graph, open: true })
    }

    /// Backend view for writes inside this transaction.
    pub fn graph(&mut self) -> &mut dyn GraphBackend {
        &mut *self.graph
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        self.graph.commit_tx()
    }

    /// Rolls back explicitly.
    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.graph.rollback_tx()
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.graph.rollback_tx() {
                warn!(error = %err, "graph.tx.rollback_on_drop_failed");
            }
        }
    }
}

/// Bulk-mode guard. Leaves bulk mode on drop unless [`BulkSession::finish`]
/// was called.
pub struct BulkSession<'g> {
    graph: &'g mut dyn GraphBackend,
    active: bool,
}

impl<'g> BulkSession<'g> {
    /// Enters bulk mode on `graph`.
    pub fn enter(graph: &'g mut dyn GraphBackend) -> Result<Self> {
        graph.enter_bulk_mode()?;
        Ok(Self {
            graph,
            active: true,
        })
    }

    /// Backend view for writes inside this session.
    pub fn graph(&mut self) -> &mut dyn GraphBackend {
        &mut *self.graph
    }

    /// Leaves bulk mode and reports any failure to do so.
    pub fn finish(mut self) -> Result<()> {
        self.active = false;
        self.graph.exit_bulk_mode()
    }
}

impl Drop for BulkSession<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.graph.exit_bulk_mode() {
                warn!(error = %err, "graph.bulk.exit_on_drop_failed");
            }
        }
    }
}
