//! Per-run cache of type nodes and their slot maps.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use super::error::{Result, SyncError};
use super::schema;
use super::slot::{SlotDescriptor, SlotMap};
use crate::graph::GraphBackend;
use crate::model::ClassKey;
use crate::types::NodeId;

/// Memoizes metaclass type nodes and their slot descriptors.
///
/// A cache is scoped to one synchronisation run and must be cleared whenever
/// the registered metamodels change.
#[derive(Debug, Default)]
pub struct TypeCache {
    types: FxHashMap<ClassKey, NodeId>,
    slots: FxHashMap<NodeId, Arc<SlotMap>>,
    hits: u64,
    misses: u64,
}

impl TypeCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Type node registered for `class`.
    pub fn type_node(&mut self, g: &dyn GraphBackend, class: &ClassKey) -> Result<NodeId> {
        if let Some(node) = self.types.get(class) {
            self.hits += 1;
            return Ok(*node);
        }
        self.misses += 1;
        let package = schema::find_package(g, &class.package_uri)?
            .ok_or_else(|| SyncError::UnregisteredMetaclass(class.clone()))?;
        let node = schema::find_type_in(g, package, &class.name)?
            .ok_or_else(|| SyncError::UnregisteredMetaclass(class.clone()))?;
        trace!(class = %class, node = node.0, "sync.type_cache.miss");
        self.types.insert(class.clone(), node);
        Ok(node)
    }

    /// Slot descriptors of `class`.
    pub fn slots(&mut self, g: &dyn GraphBackend, class: &ClassKey) -> Result<Arc<SlotMap>> {
        let node = self.type_node(g, class)?;
        self.slots_of(g, node)
    }

    /// Slot descriptors stored on a type node.
    pub fn slots_of(&mut self, g: &dyn GraphBackend, type_node: NodeId) -> Result<Arc<SlotMap>> {
        if let Some(slots) = self.slots.get(&type_node) {
            return Ok(Arc::clone(slots));
        }
        let slots = Arc::new(SlotDescriptor::read_all(g, type_node)?);
        self.slots.insert(type_node, Arc::clone(&slots));
        Ok(slots)
    }

    /// Forgets the slots of one type node after its descriptors changed.
    pub fn invalidate_slots(&mut self, type_node: NodeId) {
        self.slots.remove(&type_node);
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.types.clear();
        self.slots.clear();
    }

    /// `(hits, misses)` of type lookups since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.slots.is_empty()
    }
}
