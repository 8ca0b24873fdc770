use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tracing::trace;

use super::error::{GraphError, Result};
use super::index::NodeIndex;
use super::value::{PropMap, PropValue};
use super::{Dir, EdgeData, GraphBackend, GraphMode};
use crate::types::{EdgeId, NodeId};

#[derive(Clone, Debug)]
struct NodeRecord {
    label: String,
    props: PropMap,
    out_edges: BTreeSet<EdgeId>,
    in_edges: BTreeSet<EdgeId>,
}

#[derive(Clone, Debug)]
struct EdgeRecord {
    src: NodeId,
    dst: NodeId,
    label: String,
    props: PropMap,
}

#[derive(Clone, Debug, Default)]
struct State {
    nodes: FxHashMap<NodeId, NodeRecord>,
    edges: FxHashMap<EdgeId, EdgeRecord>,
    indexes: BTreeMap<String, NodeIndex>,
    next_node: u64,
    next_edge: u64,
}

/// Counters describing how a [`MemGraph`] has been driven.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemGraphStats {
    /// Transactions committed.
    pub commits: u64,
    /// Transactions rolled back.
    pub rollbacks: u64,
    /// Bulk sessions entered.
    pub bulk_sessions: u64,
}

/// In-memory [`GraphBackend`].
///
/// Transactions snapshot the whole state on begin and restore it on rollback,
/// which keeps the implementation obviously correct at the cost of O(n)
/// begin. Identifiers are never reused.
#[derive(Debug, Default)]
pub struct MemGraph {
    state: State,
    snapshot: Option<State>,
    bulk: bool,
    unavailable: Option<String>,
    stats: MemGraphStats,
}

impl MemGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.state.nodes.len()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.state.edges.len()
    }

    /// Nodes carrying `label`, in ascending id order.
    pub fn nodes_with_label(&self, label: &str) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .state
            .nodes
            .iter()
            .filter(|(_, rec)| rec.label == label)
            .map(|(id, _)| *id)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Usage counters.
    pub fn stats(&self) -> MemGraphStats {
        self.stats
    }

    /// Makes every subsequent transaction or bulk session fail with
    /// [`GraphError::Unavailable`] until cleared with `None`.
    pub fn set_unavailable(&mut self, reason: Option<&str>) {
        self.unavailable = reason.map(str::to_owned);
    }

    fn check_available(&self) -> Result<()> {
        match &self.unavailable {
            Some(reason) => Err(GraphError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn check_writable(&self) -> Result<()> {
        self.check_available()?;
        if self.bulk || self.snapshot.is_some() {
            Ok(())
        } else {
            Err(GraphError::NoActiveTransaction)
        }
    }

    fn node(&self, node: NodeId) -> Result<&NodeRecord> {
        self.state
            .nodes
            .get(&node)
            .ok_or(GraphError::NodeNotFound(node))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut NodeRecord> {
        self.state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::NodeNotFound(node))
    }

    fn edge_data(&self, id: EdgeId) -> Result<EdgeData> {
        let rec = self.state.edges.get(&id).ok_or(GraphError::EdgeNotFound(id))?;
        Ok(EdgeData {
            id,
            src: rec.src,
            dst: rec.dst,
            label: rec.label.clone(),
            props: rec.props.clone(),
        })
    }
}

impl GraphBackend for MemGraph {
    fn mode(&self) -> GraphMode {
        if self.bulk {
            GraphMode::Bulk
        } else {
            GraphMode::Transactional
        }
    }

    fn begin_tx(&mut self) -> Result<()> {
        self.check_available()?;
        if self.bulk {
            return Err(GraphError::BulkModeActive);
        }
        if self.snapshot.is_some() {
            return Err(GraphError::TransactionActive);
        }
        self.snapshot = Some(self.state.clone());
        trace!("memgraph.tx.begin");
        Ok(())
    }

    fn commit_tx(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            return Err(GraphError::NoActiveTransaction);
        }
        self.stats.commits += 1;
        trace!("memgraph.tx.commit");
        Ok(())
    }

    fn rollback_tx(&mut self) -> Result<()> {
        let snapshot = self.snapshot.take().ok_or(GraphError::NoActiveTransaction)?;
        self.state = snapshot;
        self.stats.rollbacks += 1;
        trace!("memgraph.tx.rollback");
        Ok(())
    }

    fn enter_bulk_mode(&mut self) -> Result<()> {
        self.check_available()?;
        if self.snapshot.is_some() {
            return Err(GraphError::TransactionActive);
        }
        if !self.bulk {
            self.bulk = true;
            self.stats.bulk_sessions += 1;
        }
        Ok(())
    }

    fn exit_bulk_mode(&mut self) -> Result<()> {
        self.bulk = false;
        Ok(())
    }

    fn create_node(&mut self, label: &str, props: PropMap) -> Result<NodeId> {
        self.check_writable()?;
        self.state.next_node += 1;
        let id = NodeId(self.state.next_node);
        self.state.nodes.insert(
            id,
            NodeRecord {
                label: label.to_owned(),
                props,
                out_edges: BTreeSet::new(),
                in_edges: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    fn delete_node(&mut self, node: NodeId) -> Result<()> {
        self.check_writable()?;
        let rec = self.node(node)?;
        if !rec.out_edges.is_empty() || !rec.in_edges.is_empty() {
            return Err(GraphError::NodeHasEdges(node));
        }
        self.state.nodes.remove(&node);
        for index in self.state.indexes.values_mut() {
            index.remove(node, None);
        }
        Ok(())
    }

    fn contains_node(&self, node: NodeId) -> bool {
        self.state.nodes.contains_key(&node)
    }

    fn node_label(&self, node: NodeId) -> Result<String> {
        Ok(self.node(node)?.label.clone())
    }

    fn property(&self, node: NodeId, key: &str) -> Result<Option<PropValue>> {
        Ok(self.node(node)?.props.get(key).cloned())
    }

    fn property_keys(&self, node: NodeId) -> Result<Vec<String>> {
        Ok(self.node(node)?.props.keys().cloned().collect())
    }

    fn set_property(&mut self, node: NodeId, key: &str, value: PropValue) -> Result<()> {
        self.check_writable()?;
        self.node_mut(node)?.props.insert(key.to_owned(), value);
        Ok(())
    }

    fn remove_property(&mut self, node: NodeId, key: &str) -> Result<Option<PropValue>> {
        self.check_writable()?;
        Ok(self.node_mut(node)?.props.remove(key))
    }

    fn create_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        label: &str,
        props: PropMap,
    ) -> Result<EdgeId> {
        self.check_writable()?;
        self.node(src)?;
        self.node(dst)?;
        self.state.next_edge += 1;
        let id = EdgeId(self.state.next_edge);
        self.state.edges.insert(
            id,
            EdgeRecord {
                src,
                dst,
                label: label.to_owned(),
                props,
            },
        );
        self.node_mut(src)?.out_edges.insert(id);
        self.node_mut(dst)?.in_edges.insert(id);
        Ok(id)
    }

    fn delete_edge(&mut self, edge: EdgeId) -> Result<()> {
        self.check_writable()?;
        let rec = self
            .state
            .edges
            .remove(&edge)
            .ok_or(GraphError::EdgeNotFound(edge))?;
        if let Some(src) = self.state.nodes.get_mut(&rec.src) {
            src.out_edges.remove(&edge);
        }
        if let Some(dst) = self.state.nodes.get_mut(&rec.dst) {
            dst.in_edges.remove(&edge);
        }
        Ok(())
    }

    fn edge(&self, edge: EdgeId) -> Result<EdgeData> {
        self.edge_data(edge)
    }

    fn edges(&self, node: NodeId, dir: Dir, label: Option<&str>) -> Result<Vec<EdgeData>> {
        let rec = self.node(node)?;
        let ids: BTreeSet<EdgeId> = match dir {
            Dir::Out => rec.out_edges.clone(),
            Dir::In => rec.in_edges.clone(),
            Dir::Both => rec.out_edges.union(&rec.in_edges).copied().collect(),
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let data = self.edge_data(id)?;
            if label.map_or(true, |l| l == data.label) {
                out.push(data);
            }
        }
        Ok(out)
    }

    fn index_add(&mut self, index: &str, node: NodeId, key: &str, value: &str) -> Result<()> {
        self.check_writable()?;
        self.node(node)?;
        self.state
            .indexes
            .entry(index.to_owned())
            .or_default()
            .add(node, key, value);
        Ok(())
    }

    fn index_remove(
        &mut self,
        index: &str,
        node: NodeId,
        entry: Option<(&str, &str)>,
    ) -> Result<()> {
        self.check_writable()?;
        if let Some(idx) = self.state.indexes.get_mut(index) {
            idx.remove(node, entry);
        }
        Ok(())
    }

    fn index_get(&self, index: &str, key: &str, value: &str) -> Result<Vec<NodeId>> {
        Ok(self
            .state
            .indexes
            .get(index)
            .map(|idx| idx.get(key, value))
            .unwrap_or_default())
    }

    fn index_query(
        &self,
        index: &str,
        key_pattern: &str,
        value_pattern: &str,
    ) -> Result<Vec<NodeId>> {
        Ok(self
            .state
            .indexes
            .get(index)
            .map(|idx| idx.query(key_pattern, value_pattern))
            .unwrap_or_default())
    }

    fn index_entries(&self, index: &str, node: NodeId) -> Result<Vec<(String, String)>> {
        Ok(self
            .state
            .indexes
            .get(index)
            .map(|idx| idx.entries_of(node))
            .unwrap_or_default())
    }

    fn index_names(&self) -> Vec<String> {
        self.state.indexes.keys().cloned().collect()
    }

    fn drop_index(&mut self, index: &str) -> Result<bool> {
        self.check_writable()?;
        Ok(self.state.indexes.remove(index).is_some())
    }
}
