use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::types::NodeId;

/// Wildcard accepted by [`pattern_matches`].
pub const WILDCARD: &str = "*";

/// Matches `candidate` against an index query pattern.
///
/// `*` matches anything, a trailing `*` matches by prefix, anything else is an
/// exact comparison.
pub fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => pattern == candidate,
    }
}

/// A named secondary index mapping `(key, value)` pairs to node sets.
///
/// The reverse map lets a node be dropped from every entry without a scan.
/// Node sets are ordered so lookups return ids in ascending order.
#[derive(Clone, Debug, Default)]
pub struct NodeIndex {
    entries: FxHashMap<(String, String), BTreeSet<NodeId>>,
    by_node: FxHashMap<NodeId, BTreeSet<(String, String)>>,
}

impl NodeIndex {
    /// Registers `node` under `(key, value)`.
    pub fn add(&mut self, node: NodeId, key: &str, value: &str) {
        let entry = (key.to_owned(), value.to_owned());
        self.entries.entry(entry.clone()).or_default().insert(node);
        self.by_node.entry(node).or_default().insert(entry);
    }

    /// Removes `node` from one entry, or from every entry when `entry` is `None`.
    pub fn remove(&mut self, node: NodeId, entry: Option<(&str, &str)>) {
        let Some(owned) = self.by_node.get_mut(&node) else {
            return;
        };
        let targets: Vec<(String, String)> = match entry {
            Some((key, value)) => {
                let pair = (key.to_owned(), value.to_owned());
                if owned.remove(&pair) {
                    vec![pair]
                } else {
                    Vec::new()
                }
            }
            None => std::mem::take(owned).into_iter().collect(),
        };
        if owned.is_empty() {
            self.by_node.remove(&node);
        }
        for pair in targets {
            if let Some(nodes) = self.entries.get_mut(&pair) {
                nodes.remove(&node);
                if nodes.is_empty() {
                    self.entries.remove(&pair);
                }
            }
        }
    }

    /// Exact lookup.
    pub fn get(&self, key: &str, value: &str) -> Vec<NodeId> {
        self.entries
            .get(&(key.to_owned(), value.to_owned()))
            .map(|nodes| nodes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Pattern lookup; see [`pattern_matches`]. Results are deduplicated.
    pub fn query(&self, key_pattern: &str, value_pattern: &str) -> Vec<NodeId> {
        let mut out = BTreeSet::new();
        for ((key, value), nodes) in &self.entries {
            if pattern_matches(key_pattern, key) && pattern_matches(value_pattern, value) {
                out.extend(nodes.iter().copied());
            }
        }
        out.into_iter().collect()
    }

    /// Entries currently held by `node`.
    pub fn entries_of(&self, node: NodeId) -> Vec<(String, String)> {
        self.by_node
            .get(&node)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns true when no node is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct `(key, value)` entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
