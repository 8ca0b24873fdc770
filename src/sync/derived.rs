//! Derived attributes: dirty tracking, evaluation and the access index.
//!
//! Every derived attribute node records, in the access index, which
//! `(element, property)` pairs its last evaluation read. The
//! [`DirtyTracker`] observes changes and, on [`DirtyTracker::flush`], marks
//! every derived node that read a changed pair as dirty and queues it in the
//! pending index. The [`DerivationScheduler`] drains that queue in chunks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::{Result, SyncError};
use super::listener::ChangeListener;
use super::metrics::SyncMetrics;
use super::options::SyncOptions;
use super::schema::{
    self, DERIVED_ACCESS_INDEX, DERIVED_PENDING_INDEX, PENDING_KEY, PENDING_VALUE, WILDCARD_PROPERTY,
};
use crate::graph::{Dir, GraphBackend, PropValue, Tx};
use crate::types::NodeId;

/// One read performed while evaluating a derived attribute.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessRecord {
    /// Derived attribute node being evaluated.
    pub source: NodeId,
    /// Node that was read.
    pub accessed: NodeId,
    /// Property that was read, or `*` for the node as a whole.
    pub property: String,
}

impl AccessRecord {
    /// Read of `property` on `accessed` while computing `source`.
    pub fn new(source: NodeId, accessed: NodeId, property: impl Into<String>) -> Self {
        Self {
            source,
            accessed,
            property: property.into(),
        }
    }
}

/// Evaluates derivation logic written in one language.
pub trait DerivationEvaluator {
    /// Language this evaluator understands.
    fn language(&self) -> &str;

    /// Computes and stores the values of `nodes` (derived attribute nodes),
    /// returning every read it performed.
    fn calculate_derived_attributes(
        &mut self,
        g: &mut dyn GraphBackend,
        nodes: &[NodeId],
    ) -> Result<Vec<AccessRecord>>;
}

/// Evaluators keyed by language.
#[derive(Default)]
pub struct DerivationRegistry {
    evaluators: BTreeMap<String, Box<dyn DerivationEvaluator>>,
}

impl DerivationRegistry {
    /// Registry with no evaluators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an evaluator, replacing any previous one for its language.
    pub fn register(&mut self, evaluator: Box<dyn DerivationEvaluator>) {
        self.evaluators
            .insert(evaluator.language().to_owned(), evaluator);
    }

    /// Evaluator for `language`, if one is registered.
    pub fn get_mut(&mut self, language: &str) -> Option<&mut (dyn DerivationEvaluator + 'static)> {
        self.evaluators.get_mut(language).map(|e| e.as_mut())
    }

    /// Registered languages, in ascending order.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.evaluators.keys().map(String::as_str)
    }

    /// True if no evaluator is registered.
    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

/// View of a derived attribute node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedAttribute {
    /// Derived attribute node.
    pub node: NodeId,
    /// Element the attribute belongs to.
    pub element: NodeId,
    /// Feature name.
    pub feature: String,
    /// Derivation language.
    pub language: String,
    /// Derivation logic, passed to the evaluator verbatim.
    pub logic: String,
}

impl DerivedAttribute {
    /// Reads the attribute metadata stored on `node`.
    pub fn load(g: &dyn GraphBackend, node: NodeId) -> Result<Self> {
        let element = g
            .edges(node, Dir::In, None)?
            .into_iter()
            .find(|edge| edge.flag(schema::IS_DERIVED))
            .map(|edge| edge.src)
            .ok_or_else(|| SyncError::Corrupted(format!("derived node {node} has no owner")))?;
        let read = |key: &str| -> Result<String> {
            g.string_property(node, key)?.ok_or_else(|| {
                SyncError::Corrupted(format!("derived node {node} is missing {key}"))
            })
        };
        Ok(Self {
            node,
            element,
            feature: read(schema::DERIVED_FEATURE)?,
            language: read(schema::DERIVATION_LANGUAGE)?,
            logic: read(schema::DERIVATION_LOGIC)?,
        })
    }

    /// Current value, which may be the dirty sentinel.
    pub fn value(&self, g: &dyn GraphBackend) -> Result<Option<PropValue>> {
        Ok(g.property(self.node, schema::DERIVED_VALUE)?)
    }

    /// Stores a computed value.
    pub fn set_value(&self, g: &mut dyn GraphBackend, value: PropValue) -> Result<()> {
        g.set_property(self.node, schema::DERIVED_VALUE, value)?;
        Ok(())
    }

    /// Overwrites the value with the dirty sentinel and queues the node.
    pub fn mark_dirty(&self, g: &mut dyn GraphBackend) -> Result<()> {
        g.set_property(self.node, schema::DERIVED_VALUE, schema::dirty_sentinel(&self.logic))?;
        g.index_add(DERIVED_PENDING_INDEX, self.node, PENDING_KEY, PENDING_VALUE)?;
        Ok(())
    }
}

/// Collects `(element, property)` pairs touched by a change.
///
/// Pairs observed between [`ChangeListener::change_start`] and
/// [`ChangeListener::change_failure`] are discarded with the rolled-back
/// change.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    in_change: bool,
    staged: BTreeSet<(NodeId, String)>,
    pending: BTreeSet<(NodeId, String)>,
    removed: BTreeSet<NodeId>,
}

impl DirtyTracker {
    /// Tracker with nothing staged or pending.
    pub fn new() -> Self {
        Self::default()
    }

    fn note(&mut self, node: NodeId, property: &str) {
        let entry = (node, property.to_owned());
        if self.in_change {
            self.staged.insert(entry);
        } else {
            self.pending.insert(entry);
        }
    }

    /// Pairs waiting for [`DirtyTracker::flush`].
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Marks every derived node depending on a recorded pair as dirty.
    ///
    /// Runs in its own transaction. Returns the number of nodes marked.
    pub fn flush(&mut self, g: &mut dyn GraphBackend) -> Result<usize> {
        if self.pending.is_empty() {
            self.removed.clear();
            return Ok(0);
        }
        let pending = std::mem::take(&mut self.pending);
        let removed = std::mem::take(&mut self.removed);
        let mut tx = Tx::begin(&mut *g)?;
        let marked = mark_dependents(tx.graph(), &pending, &removed)
            .map_err(|err| SyncError::aborted("dirty flush", err))?;
        tx.commit()?;
        debug!(entries = pending.len(), marked, "sync.derived.dirty");
        Ok(marked)
    }
}

fn mark_dependents(
    g: &mut dyn GraphBackend,
    pending: &BTreeSet<(NodeId, String)>,
    removed: &BTreeSet<NodeId>,
) -> Result<usize> {
    let mut dependents = BTreeSet::new();
    for (node, property) in pending {
        let key = node.to_string();
        if property == WILDCARD_PROPERTY {
            dependents.extend(g.index_query(DERIVED_ACCESS_INDEX, &key, WILDCARD_PROPERTY)?);
        } else {
            dependents.extend(g.index_get(DERIVED_ACCESS_INDEX, &key, property)?);
            dependents.extend(g.index_get(DERIVED_ACCESS_INDEX, &key, WILDCARD_PROPERTY)?);
        }
    }
    let mut marked = 0;
    for derived in dependents {
        if removed.contains(&derived) || !g.contains_node(derived) {
            continue;
        }
        DerivedAttribute::load(g, derived)?.mark_dirty(g)?;
        marked += 1;
    }
    Ok(marked)
}

impl ChangeListener for DirtyTracker {
    fn change_start(&mut self) {
        self.in_change = true;
        self.staged.clear();
    }

    fn change_success(&mut self) {
        self.in_change = false;
        let staged = std::mem::take(&mut self.staged);
        self.pending.extend(staged);
    }

    fn change_failure(&mut self) {
        self.in_change = false;
        self.staged.clear();
    }

    fn element_added(&mut self, element: NodeId) {
        self.note(element, WILDCARD_PROPERTY);
    }

    fn element_removed(&mut self, element: NodeId, transient: bool) {
        if transient {
            self.removed.insert(element);
        } else {
            self.note(element, WILDCARD_PROPERTY);
        }
    }

    fn attribute_updated(&mut self, element: NodeId, attribute: &str) {
        self.note(element, attribute);
    }

    fn attribute_removed(&mut self, element: NodeId, attribute: &str) {
        self.note(element, attribute);
    }

    fn reference_added(&mut self, source: NodeId, _target: NodeId, label: &str) {
        self.note(source, label);
    }

    fn reference_removed(&mut self, source: NodeId, _target: NodeId, label: &str) {
        self.note(source, label);
    }
}

/// Outcome of a derivation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DerivationReport {
    /// Derived nodes holding a computed value after the pass.
    pub computed: usize,
    /// Chunks rolled back or skipped.
    pub failed_chunks: usize,
    /// Nodes still queued after the pass.
    pub still_pending: usize,
}

/// Recomputes queued derived attributes in bounded transactions.
#[derive(Clone)]
pub struct DerivationScheduler {
    chunk_size: usize,
    metrics: Arc<dyn SyncMetrics>,
}

impl DerivationScheduler {
    /// Scheduler using the configured chunk size and metrics.
    pub fn new(options: &SyncOptions) -> Self {
        Self {
            chunk_size: options.derived_chunk_size.max(1),
            metrics: Arc::clone(&options.metrics),
        }
    }

    /// Derived nodes waiting for evaluation.
    pub fn pending(g: &dyn GraphBackend) -> Result<Vec<NodeId>> {
        Ok(g.index_get(DERIVED_PENDING_INDEX, PENDING_KEY, PENDING_VALUE)?)
    }

    /// Evaluates every queued node. A chunk whose evaluation fails is rolled
    /// back and stays queued; other chunks are unaffected.
    pub fn run(
        &self,
        g: &mut dyn GraphBackend,
        registry: &mut DerivationRegistry,
    ) -> Result<DerivationReport> {
        let mut by_language: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in Self::pending(g)? {
            if !g.contains_node(node) {
                continue;
            }
            let language = g
                .string_property(node, schema::DERIVATION_LANGUAGE)?
                .unwrap_or_default();
            by_language.entry(language).or_default().push(node);
        }

        let mut report = DerivationReport::default();
        for (language, nodes) in by_language {
            let Some(evaluator) = registry.get_mut(&language) else {
                let err = SyncError::MissingEvaluator(language.clone());
                warn!(error = %err, nodes = nodes.len(), "sync.derived.skipped");
                report.failed_chunks += nodes.len().div_ceil(self.chunk_size);
                continue;
            };
            for chunk in nodes.chunks(self.chunk_size) {
                let mut tx = Tx::begin(&mut *g)?;
                match evaluate_chunk(tx.graph(), evaluator, chunk) {
                    Ok(computed) => {
                        tx.commit()?;
                        report.computed += computed;
                        debug!(language = %language, nodes = chunk.len(), computed, "sync.derived.chunk");
                    }
                    Err(err) => {
                        drop(tx);
                        if err.is_fatal() {
                            return Err(err);
                        }
                        let err = err.into_evaluation(&language);
                        warn!(language = %language, nodes = chunk.len(), error = %err, "sync.derived.chunk_failed");
                        report.failed_chunks += 1;
                    }
                }
            }
        }
        report.still_pending = Self::pending(g)?.len();
        self.metrics.derived_computed(report.computed as u64);
        info!(
            computed = report.computed,
            failed_chunks = report.failed_chunks,
            pending = report.still_pending,
            "sync.derived.done"
        );
        Ok(report)
    }
}

fn evaluate_chunk(
    g: &mut dyn GraphBackend,
    evaluator: &mut dyn DerivationEvaluator,
    chunk: &[NodeId],
) -> Result<usize> {
    let records = evaluator.calculate_derived_attributes(g, chunk)?;
    let mut sources: BTreeSet<NodeId> = chunk.iter().copied().collect();
    sources.extend(records.iter().map(|r| r.source));
    for source in &sources {
        g.index_remove(DERIVED_ACCESS_INDEX, *source, None)?;
    }
    for record in &records {
        if g.contains_node(record.source) {
            g.index_add(
                DERIVED_ACCESS_INDEX,
                record.source,
                &record.accessed.to_string(),
                &record.property,
            )?;
        }
    }
    let mut computed = 0;
    for &node in chunk {
        if !g.contains_node(node) {
            continue;
        }
        let value = g.property(node, schema::DERIVED_VALUE)?;
        if value.as_ref().is_some_and(|v| !schema::is_dirty(v)) {
            g.index_remove(DERIVED_PENDING_INDEX, node, None)?;
            computed += 1;
        }
    }
    Ok(computed)
}
