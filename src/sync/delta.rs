//! Re-synchronisation of files that are already in the graph.
//!
//! Stored elements are matched to parsed objects by identifier and classified
//! as added, unchanged, updated, retyped or deleted. When the fraction of
//! changed elements exceeds the configured ratio the file is deleted and
//! re-inserted in bulk; otherwise the differences are patched in a single
//! transaction.

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use super::batch::{self, BatchInjector, InjectionReport, LocalElements};
use super::deletion::{DeletionEngine, DeletionSummary};
use super::error::{Result, SyncError};
use super::listener::ChangeListener;
use super::options::SyncOptions;
use super::proxy::ProxyLedger;
use super::schema::{self, OF_KIND};
use super::type_cache::TypeCache;
use super::vcs::VcsChangeItem;
use crate::graph::{Dir, EdgeData, GraphBackend, PropMap, PropValue, Tx};
use crate::model::{ModelObject, ModelResource};
use crate::types::NodeId;

/// How a parsed resource differs from the stored file.
pub struct Classification<'r> {
    /// Objects with no stored element.
    pub added: Vec<&'r dyn ModelObject>,
    /// Objects whose stored signature matches.
    pub unchanged: Vec<(&'r dyn ModelObject, NodeId)>,
    /// Objects whose signature changed, with their element.
    pub updated: Vec<(&'r dyn ModelObject, NodeId)>,
    /// Objects whose metaclass changed, with the element to replace.
    pub retyped: Vec<(&'r dyn ModelObject, NodeId)>,
    /// Stored elements absent from the resource.
    pub deleted: Vec<NodeId>,
    /// Elements stored for the file before this pass.
    pub stored: usize,
}

impl Classification<'_> {
    /// Number of added, updated, retyped and deleted elements.
    pub fn changes(&self) -> usize {
        self.added.len() + self.updated.len() + self.retyped.len() + self.deleted.len()
    }

    /// Changes relative to the stored element count; `None` when nothing was
    /// stored.
    pub fn ratio(&self) -> Option<f64> {
        if self.stored == 0 {
            None
        } else {
            Some(self.changes() as f64 / self.stored as f64)
        }
    }
}

/// Counts of a transactional patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchSummary {
    /// Elements created.
    pub added: usize,
    /// Elements left untouched.
    pub unchanged: usize,
    /// Elements whose attributes or references were rewritten.
    pub updated: usize,
    /// Elements deleted and recreated under a new type.
    pub retyped: usize,
    /// Elements deleted.
    pub deleted: usize,
    /// Reference edges created.
    pub references_added: usize,
    /// Reference edges removed.
    pub references_removed: usize,
    /// References left pending on an unresolved target.
    pub proxies: usize,
}

/// How a file was synchronised.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// The file was new, or had no elements, and was batch inserted.
    Inserted(InjectionReport),
    /// The change ratio was above the threshold; the file was deleted and
    /// batch inserted again.
    Replaced {
        /// Change ratio that triggered the replacement.
        ratio: f64,
        /// Removal of the previous subgraph.
        deletion: DeletionSummary,
        /// Re-insertion of the file.
        injection: InjectionReport,
    },
    /// The differences were applied in one transaction.
    Patched {
        /// Change ratio of the file.
        ratio: f64,
        /// What the patch changed.
        summary: PatchSummary,
    },
    /// The file's subgraph was removed.
    Deleted(DeletionSummary),
}

/// Classifies `resource` against the elements stored for `file`.
pub fn classify<'r>(
    g: &dyn GraphBackend,
    cache: &mut TypeCache,
    file: NodeId,
    resource: &'r dyn ModelResource,
) -> Result<Classification<'r>> {
    let mut stored: FxHashMap<String, NodeId> = FxHashMap::default();
    for element in schema::elements_of_file(g, file)? {
        let id = g
            .string_property(element, schema::IDENTIFIER)?
            .ok_or_else(|| SyncError::Corrupted(format!("element {element} has no identifier")))?;
        stored.insert(id, element);
    }
    let mut classification = Classification {
        added: Vec::new(),
        unchanged: Vec::new(),
        updated: Vec::new(),
        retyped: Vec::new(),
        deleted: Vec::new(),
        stored: stored.len(),
    };
    for obj in resource.objects() {
        let Some(node) = stored.remove(obj.uri_fragment()) else {
            classification.added.push(obj);
            continue;
        };
        let signature = g.property(node, schema::SIGNATURE)?;
        if signature.as_ref().and_then(PropValue::as_bytes) == Some(obj.signature().as_slice()) {
            classification.unchanged.push((obj, node));
            continue;
        }
        let wanted = cache.type_node(g, &obj.class().key)?;
        if schema::type_of(g, node)? == Some(wanted) {
            classification.updated.push((obj, node));
        } else {
            classification.retyped.push((obj, node));
        }
    }
    let mut deleted: Vec<NodeId> = stored.into_values().collect();
    deleted.sort();
    classification.deleted = deleted;
    Ok(classification)
}

/// Applies a parsed resource to a file, choosing between batch re-insertion
/// and a transactional patch.
pub struct DeltaSynchronizer<'a> {
    cache: &'a mut TypeCache,
    listener: &'a mut dyn ChangeListener,
    options: &'a SyncOptions,
    ledger: ProxyLedger,
}

impl<'a> DeltaSynchronizer<'a> {
    /// Synchronizer sharing the run's type cache and listener.
    pub fn new(
        cache: &'a mut TypeCache,
        listener: &'a mut dyn ChangeListener,
        options: &'a SyncOptions,
    ) -> Self {
        Self {
            cache,
            listener,
            options,
            ledger: ProxyLedger::new(options),
        }
    }

    /// Synchronises one file.
    pub fn synchronize(
        &mut self,
        g: &mut dyn GraphBackend,
        item: &VcsChangeItem,
        resource: &dyn ModelResource,
    ) -> Result<SyncOutcome> {
        let key = item.file_key();
        let Some(file) = schema::find_file(g, &key)? else {
            let report = self.injector().inject(g, item, resource)?;
            self.options.metrics.file_inserted();
            return Ok(SyncOutcome::Inserted(report));
        };
        let classification = classify(g, self.cache, file, resource)?;
        debug!(
            file = %key,
            stored = classification.stored,
            added = classification.added.len(),
            unchanged = classification.unchanged.len(),
            updated = classification.updated.len(),
            retyped = classification.retyped.len(),
            deleted = classification.deleted.len(),
            "sync.delta.classified"
        );
        match classification.ratio() {
            None => {
                let report = self.injector().inject(g, item, resource)?;
                self.options.metrics.file_inserted();
                Ok(SyncOutcome::Inserted(report))
            }
            Some(ratio) if ratio > self.options.max_change_ratio => {
                info!(file = %key, ratio, "sync.delta.replace");
                let deletion = {
                    let mut tx = Tx::begin(&mut *g)?;
                    let mut engine = DeletionEngine::new(self.ledger.clone(), &mut *self.listener);
                    let deletion = engine
                        .delete_file(tx.graph(), file)
                        .map_err(|err| SyncError::aborted(format!("replace {key}"), err))?;
                    tx.commit()?;
                    deletion
                };
                let injection = self.injector().inject(g, item, resource)?;
                self.options.metrics.file_replaced();
                Ok(SyncOutcome::Replaced {
                    ratio,
                    deletion,
                    injection,
                })
            }
            Some(ratio) => {
                let summary = {
                    let mut tx = Tx::begin(&mut *g)?;
                    let summary = self
                        .apply_patch(tx.graph(), file, item, resource, classification)
                        .map_err(|err| SyncError::aborted(format!("patch {key}"), err))?;
                    tx.commit()?;
                    summary
                };
                info!(
                    file = %key,
                    ratio,
                    added = summary.added,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    "sync.delta.patched"
                );
                self.options.metrics.file_patched();
                Ok(SyncOutcome::Patched { ratio, summary })
            }
        }
    }

    fn injector(&mut self) -> BatchInjector<'_> {
        BatchInjector::new(&mut *self.cache, &mut *self.listener, self.options)
    }

    fn apply_patch(
        &mut self,
        g: &mut dyn GraphBackend,
        file: NodeId,
        item: &VcsChangeItem,
        resource: &dyn ModelResource,
        classification: Classification<'_>,
    ) -> Result<PatchSummary> {
        let file_key = item.file_key();
        let mut summary = PatchSummary {
            unchanged: classification.unchanged.len(),
            updated: classification.updated.len(),
            retyped: classification.retyped.len(),
            deleted: classification.deleted.len(),
            ..PatchSummary::default()
        };
        let mut local = LocalElements::default();
        for (obj, node) in classification.unchanged.iter().chain(&classification.updated) {
            local.insert(obj.uri_fragment().to_owned(), *node);
        }

        {
            let mut engine = DeletionEngine::new(self.ledger.clone(), &mut *self.listener);
            for (_, node) in &classification.retyped {
                engine.remove_element(g, *node, file)?;
            }
        }

        let to_add: Vec<&dyn ModelObject> = classification
            .added
            .iter()
            .copied()
            .chain(classification.retyped.iter().map(|(obj, _)| *obj))
            .collect();
        let singletons = resource.provides_singletons();
        let mut created = Vec::with_capacity(to_add.len());
        {
            let mut injector = self.injector();
            for obj in &to_add {
                let (node, fresh) = injector.add_element(g, file, *obj, singletons)?;
                local.insert(obj.uri_fragment().to_owned(), node);
                if fresh {
                    created.push((*obj, node));
                }
            }
            for (obj, node) in &created {
                let (edges, proxies) =
                    injector.add_references(g, &item.repository, &file_key, *obj, *node, &local)?;
                summary.references_added += edges;
                summary.proxies += proxies;
            }
        }
        summary.added = classification.added.len();

        // Deleted elements go first: their removal turns incoming edges of
        // updated elements into proxies, which update_element then discards.
        {
            let mut engine = DeletionEngine::new(self.ledger.clone(), &mut *self.listener);
            for node in &classification.deleted {
                engine.remove_element(g, *node, file)?;
            }
        }

        for (obj, node) in &classification.updated {
            self.update_element(g, file, *node, *obj)?;
        }

        for (obj, node) in &classification.updated {
            let (added, removed, proxies) =
                self.update_references(g, &item.repository, &file_key, *node, *obj, &local)?;
            summary.references_added += added;
            summary.references_removed += removed;
            summary.proxies += proxies;
        }

        g.set_property(file, schema::REVISION, PropValue::from(item.revision.as_str()))?;
        Ok(summary)
    }

    /// Rewrites the signature, attributes and index entries of an updated
    /// element. Pending proxies are dropped; references are rebuilt later.
    fn update_element(
        &mut self,
        g: &mut dyn GraphBackend,
        file: NodeId,
        node: NodeId,
        obj: &dyn ModelObject,
    ) -> Result<()> {
        ProxyLedger::clear(g, node)?;
        g.set_property(node, schema::SIGNATURE, PropValue::Bytes(obj.signature()))?;

        let kinds: Vec<NodeId> = g
            .edges(node, Dir::Out, Some(OF_KIND))?
            .into_iter()
            .map(|edge| edge.dst)
            .collect();
        let slots = self.cache.slots(g, &obj.class().key)?;
        for slot in slots.values() {
            if !slot.kind.holds_attribute() {
                continue;
            }
            let wanted = if obj.is_set(&slot.name) {
                obj.attribute(&slot.name)
            } else {
                None
            };
            let current = g.property(node, &slot.name)?;
            if wanted == current {
                continue;
            }
            match &wanted {
                Some(value) => {
                    g.set_property(node, &slot.name, value.clone())?;
                    self.listener.attribute_updated(node, &slot.name);
                }
                None => {
                    g.remove_property(node, &slot.name)?;
                    self.listener.attribute_removed(node, &slot.name);
                }
            }
            for &kind in &kinds {
                let kind_slots = self.cache.slots_of(g, kind)?;
                let indexed = kind_slots
                    .get(&slot.name)
                    .is_some_and(|s| s.indexed && s.kind.holds_attribute());
                if !indexed {
                    continue;
                }
                let index = batch::indexed_attribute_index(g, kind, &slot.name)?;
                g.index_remove(&index, node, None)?;
                if let Some(value) = &wanted {
                    for term in value.index_terms() {
                        g.index_add(&index, node, &slot.name, &term)?;
                    }
                }
            }
        }

        let file_value = file.to_string();
        if obj.is_root() {
            g.index_add(schema::ROOT_INDEX, node, schema::ROOT_KEY, &file_value)?;
        } else {
            g.index_remove(schema::ROOT_INDEX, node, Some((schema::ROOT_KEY, file_value.as_str())))?;
        }
        Ok(())
    }

    /// Diffs the stored reference edges of `node` against the desired ones.
    ///
    /// Returns `(edges added, edges removed, proxies recorded)`.
    fn update_references(
        &mut self,
        g: &mut dyn GraphBackend,
        repository: &str,
        file_key: &str,
        node: NodeId,
        obj: &dyn ModelObject,
        local: &LocalElements,
    ) -> Result<(usize, usize, usize)> {
        let (mut added, mut removed, mut proxies) = (0, 0, 0);
        for decl in &obj.class().references {
            let existing: Vec<EdgeData> = g
                .edges(node, Dir::Out, Some(&decl.name))?
                .into_iter()
                .filter(|edge| !edge.flag(schema::IS_DERIVED))
                .collect();
            let mut kept = vec![false; existing.len()];
            let targets = if obj.is_set(&decl.name) {
                obj.reference(&decl.name)
            } else {
                Vec::new()
            };
            for target in targets {
                let local_target = if obj.is_in_different_resource_than(&target) {
                    None
                } else {
                    local.get(&target.fragment).copied()
                };
                if let Some(dst) = local_target {
                    match position_unkept(&existing, &kept, |edge| edge.dst == dst) {
                        Some(i) => kept[i] = true,
                        None => {
                            let mut props = PropMap::new();
                            if decl.containment {
                                props.insert(schema::IS_CONTAINMENT.into(), PropValue::Bool(true));
                            }
                            if decl.container {
                                props.insert(schema::IS_CONTAINER.into(), PropValue::Bool(true));
                            }
                            g.create_edge(node, dst, &decl.name, props)?;
                            self.listener.reference_added(node, dst, &decl.name);
                            added += 1;
                        }
                    }
                    continue;
                }
                let uri = batch::target_uri(repository, file_key, &target);
                let mut found = None;
                if let Some((target_key, fragment)) = schema::split_element_uri(&uri) {
                    for (i, edge) in existing.iter().enumerate() {
                        if kept[i] {
                            continue;
                        }
                        if points_at(g, edge.dst, target_key, fragment)? {
                            found = Some(i);
                            break;
                        }
                    }
                }
                match found {
                    Some(i) => kept[i] = true,
                    None => {
                        self.ledger.record_proxy(
                            g,
                            node,
                            &uri,
                            &decl.name,
                            decl.containment,
                            decl.container,
                        )?;
                        proxies += 1;
                    }
                }
            }
            for (edge, keep) in existing.iter().zip(&kept) {
                if !keep {
                    g.delete_edge(edge.id)?;
                    self.listener.reference_removed(node, edge.dst, &edge.label);
                    removed += 1;
                }
            }
        }
        Ok((added, removed, proxies))
    }
}

fn position_unkept(
    edges: &[EdgeData],
    kept: &[bool],
    pred: impl Fn(&EdgeData) -> bool,
) -> Option<usize> {
    edges
        .iter()
        .enumerate()
        .position(|(i, edge)| !kept[i] && pred(edge))
}

/// Returns true if `node` is the element `fragment` of file `target_key`.
fn points_at(g: &dyn GraphBackend, node: NodeId, target_key: &str, fragment: &str) -> Result<bool> {
    if g.string_property(node, schema::IDENTIFIER)?.as_deref() != Some(fragment) {
        return Ok(false);
    }
    if schema::is_fragment_key(target_key) {
        return Ok(true);
    }
    for file in schema::files_of(g, node)? {
        if schema::key_of_file(g, file)?.as_deref() == Some(target_key) {
            return Ok(true);
        }
    }
    Ok(false)
}
