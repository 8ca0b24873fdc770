#![forbid(unsafe_code)]

//! Identifier newtypes shared by the graph port and the synchronization core.

use std::fmt;

/// Stable identifier of a node inside a graph backend.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// Stable identifier of an edge inside a graph backend.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EdgeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl NodeId {
    /// Parses the decimal form produced by [`fmt::Display`].
    ///
    /// Secondary indexes store node identifiers as strings; this is the inverse.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse::<u64>().ok().map(NodeId)
    }
}
