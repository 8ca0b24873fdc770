//! First-time insertion of a file in two bulk passes.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use super::deletion::DeletionEngine;
use super::error::{Result, SyncError};
use super::listener::ChangeListener;
use super::options::SyncOptions;
use super::proxy::ProxyLedger;
use super::schema::{self, DERIVED, ELEMENT, FILE_EDGE, OF_KIND, OF_TYPE};
use super::slot::{SlotDescriptor, SlotKind};
use super::type_cache::TypeCache;
use super::vcs::VcsChangeItem;
use crate::graph::{BulkSession, Dir, GraphBackend, PropMap, PropValue, Tx};
use crate::model::{ModelObject, ModelResource, ReferenceTarget};
use crate::types::NodeId;

/// Elements of one file keyed by fragment.
pub(crate) type LocalElements = FxHashMap<String, NodeId>;

/// What a batch insertion produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InjectionReport {
    /// Element nodes created.
    pub elements: usize,
    /// Existing shared elements attached to the file instead of created.
    pub shared: usize,
    /// Reference edges created within the file.
    pub references: usize,
    /// References recorded as pending proxies.
    pub proxies: usize,
}

/// Inserts new files and single elements.
pub struct BatchInjector<'a> {
    cache: &'a mut TypeCache,
    listener: &'a mut dyn ChangeListener,
    ledger: ProxyLedger,
    progress_interval: usize,
}

impl<'a> BatchInjector<'a> {
    /// Injector writing through `cache` and notifying `listener`.
    pub fn new(
        cache: &'a mut TypeCache,
        listener: &'a mut dyn ChangeListener,
        options: &SyncOptions,
    ) -> Self {
        Self {
            cache,
            listener,
            ledger: ProxyLedger::new(options),
            progress_interval: options.progress_interval.max(1),
        }
    }

    /// Inserts every object of `resource` as a new file.
    ///
    /// Runs in bulk mode. If either pass fails, the partial file is removed
    /// in a compensating transaction and
    /// [`SyncError::PartialInsertionFailure`] is returned.
    pub fn inject(
        &mut self,
        g: &mut dyn GraphBackend,
        item: &VcsChangeItem,
        resource: &dyn ModelResource,
    ) -> Result<InjectionReport> {
        let outcome = {
            let mut bulk = BulkSession::enter(&mut *g)?;
            let passes = self.run_passes(bulk.graph(), item, resource);
            let exit = bulk.finish();
            match (passes, exit) {
                (Ok(report), Ok(())) => Ok(report),
                (Err(err), _) => Err(err),
                (Ok(_), Err(err)) => Err(SyncError::from(err)),
            }
        };
        match outcome {
            Ok(report) => {
                info!(
                    file = %item.file_key(),
                    elements = report.elements,
                    references = report.references,
                    proxies = report.proxies,
                    "sync.batch.inserted"
                );
                Ok(report)
            }
            Err(cause) => {
                warn!(file = %item.file_key(), error = %cause, "sync.batch.failed");
                if let Err(err) = self.compensate(g, item) {
                    warn!(file = %item.file_key(), error = %err, "sync.batch.compensation_failed");
                }
                Err(SyncError::PartialInsertionFailure {
                    path: item.path.clone(),
                    cause: Box::new(cause),
                })
            }
        }
    }

    fn run_passes(
        &mut self,
        g: &mut dyn GraphBackend,
        item: &VcsChangeItem,
        resource: &dyn ModelResource,
    ) -> Result<InjectionReport> {
        let mut report = InjectionReport::default();
        let file = self.ensure_file(g, item)?;
        let singletons = resource.provides_singletons();
        let mut local = LocalElements::default();
        let mut created_nodes = FxHashSet::default();

        for (n, obj) in resource.objects().enumerate() {
            let (node, created) = self.add_element(g, file, obj, singletons)?;
            if created {
                report.elements += 1;
                created_nodes.insert(node);
            } else {
                report.shared += 1;
            }
            local.insert(obj.uri_fragment().to_owned(), node);
            if (n + 1) % self.progress_interval == 0 {
                info!(file = %item.file_key(), elements = n + 1, "sync.batch.progress");
            }
        }

        let file_key = item.file_key();
        for obj in resource.objects() {
            // Shared elements already carry the references of their first file.
            let Some(&node) = local.get(obj.uri_fragment()) else {
                continue;
            };
            if !created_nodes.contains(&node) {
                continue;
            }
            let (edges, proxies) = self.add_references(g, &item.repository, &file_key, obj, node, &local)?;
            report.references += edges;
            report.proxies += proxies;
        }

        g.set_property(file, schema::REVISION, PropValue::from(item.revision.as_str()))?;
        Ok(report)
    }

    fn compensate(&mut self, g: &mut dyn GraphBackend, item: &VcsChangeItem) -> Result<()> {
        let Some(file) = schema::find_file(g, &item.file_key())? else {
            return Ok(());
        };
        let mut tx = Tx::begin(&mut *g)?;
        let mut engine = DeletionEngine::new(self.ledger.clone(), &mut *self.listener);
        engine.delete_file(tx.graph(), file)?;
        tx.commit()?;
        debug!(file = %item.file_key(), "sync.batch.compensated");
        Ok(())
    }

    /// File node for `item`, created if absent.
    pub(crate) fn ensure_file(&mut self, g: &mut dyn GraphBackend, item: &VcsChangeItem) -> Result<NodeId> {
        let key = item.file_key();
        if let Some(file) = schema::find_file(g, &key)? {
            return Ok(file);
        }
        let mut props = PropMap::new();
        props.insert(schema::IDENTIFIER.into(), PropValue::from(key.as_str()));
        props.insert(schema::REPOSITORY.into(), PropValue::from(item.repository.as_str()));
        props.insert(schema::PATH.into(), PropValue::from(item.path.as_str()));
        props.insert(schema::REVISION.into(), PropValue::from(item.revision.as_str()));
        let file = g.create_node(schema::FILE, props)?;
        g.index_add(schema::FILE_INDEX, file, schema::ID_KEY, &key)?;
        self.listener.file_added(&key, file);
        Ok(file)
    }

    /// Creates the element node for `obj` in `file`.
    ///
    /// A fragment-unique object already in the graph gains a `file` edge
    /// instead; the returned flag is false in that case.
    pub(crate) fn add_element(
        &mut self,
        g: &mut dyn GraphBackend,
        file: NodeId,
        obj: &dyn ModelObject,
        singletons: bool,
    ) -> Result<(NodeId, bool)> {
        let fragment = obj.uri_fragment();
        if obj.is_fragment_unique() {
            if let Some(existing) = g
                .index_get(schema::FRAGMENT_INDEX, schema::ID_KEY, fragment)?
                .into_iter()
                .next()
            {
                if !schema::files_of(g, existing)?.contains(&file) {
                    g.create_edge(existing, file, FILE_EDGE, PropMap::new())?;
                }
                return Ok((existing, false));
            }
        }

        let class = obj.class();
        let type_node = self.cache.type_node(g, &class.key)?;
        let slots = self.cache.slots_of(g, type_node)?;

        let mut props = PropMap::new();
        props.insert(schema::IDENTIFIER.into(), PropValue::from(fragment));
        props.insert(schema::SIGNATURE.into(), PropValue::Bytes(obj.signature()));
        for slot in slots.values() {
            if slot.kind.holds_attribute() && obj.is_set(&slot.name) {
                if let Some(value) = obj.attribute(&slot.name) {
                    props.insert(slot.name.clone(), value);
                }
            }
        }
        let node = g.create_node(ELEMENT, props)?;

        g.create_edge(node, type_node, OF_TYPE, PropMap::new())?;
        let mut kinds = vec![type_node];
        for super_type in &class.super_types {
            let kind = self.cache.type_node(g, super_type)?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        for &kind in &kinds {
            g.create_edge(node, kind, OF_KIND, PropMap::new())?;
        }
        g.create_edge(node, file, FILE_EDGE, PropMap::new())?;

        if singletons || obj.is_fragment_unique() {
            g.index_add(schema::FRAGMENT_INDEX, node, schema::ID_KEY, fragment)?;
        }
        if obj.is_root() {
            g.index_add(schema::ROOT_INDEX, node, schema::ROOT_KEY, &file.to_string())?;
        }

        let mut derived_names: Vec<String> = Vec::new();
        for &kind in &kinds {
            let kind_slots = self.cache.slots_of(g, kind)?;
            for slot in kind_slots.values() {
                match slot.kind {
                    SlotKind::Derived if !derived_names.contains(&slot.name) => {
                        derived_names.push(slot.name.clone());
                        create_derived_node(g, node, slot)?;
                    }
                    SlotKind::Attribute | SlotKind::Mixed if slot.indexed => {
                        if let Some(value) = obj.attribute(&slot.name) {
                            let index = indexed_attribute_index(g, kind, &slot.name)?;
                            for term in value.index_terms() {
                                g.index_add(&index, node, &slot.name, &term)?;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        self.listener.element_added(node);
        Ok((node, true))
    }

    /// Creates the reference edges of `obj`. Targets outside `local`, or in
    /// another resource, become pending proxies.
    ///
    /// Returns `(edges created, proxies recorded)`.
    pub(crate) fn add_references(
        &mut self,
        g: &mut dyn GraphBackend,
        repository: &str,
        file_key: &str,
        obj: &dyn ModelObject,
        node: NodeId,
        local: &LocalElements,
    ) -> Result<(usize, usize)> {
        let mut edges = 0;
        let mut proxies = 0;
        for decl in &obj.class().references {
            if !obj.is_set(&decl.name) {
                continue;
            }
            for target in obj.reference(&decl.name) {
                let local_target = if obj.is_in_different_resource_than(&target) {
                    None
                } else {
                    local.get(&target.fragment).copied()
                };
                match local_target {
                    Some(dst) => {
                        let mut props = PropMap::new();
                        if decl.containment {
                            props.insert(schema::IS_CONTAINMENT.into(), PropValue::Bool(true));
                        }
                        if decl.container {
                            props.insert(schema::IS_CONTAINER.into(), PropValue::Bool(true));
                        }
                        g.create_edge(node, dst, &decl.name, props)?;
                        self.listener.reference_added(node, dst, &decl.name);
                        edges += 1;
                    }
                    None => {
                        let uri = target_uri(repository, file_key, &target);
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
        }
        Ok((edges, proxies))
    }
}

/// Element URI a reference target resolves to.
pub(crate) fn target_uri(repository: &str, file_key: &str, target: &ReferenceTarget) -> String {
    let repo = target.repository.as_deref().unwrap_or(repository);
    let key = if target.fragment_based {
        schema::file_key(repo, schema::ANY_FILE)
    } else if target.repository.is_none() && target.path.is_empty() {
        file_key.to_owned()
    } else {
        schema::file_key(repo, &target.path)
    };
    schema::element_uri(&key, &target.fragment)
}

/// Creates the derived attribute node for `slot` under `element`, marked
/// dirty and queued for evaluation.
pub(crate) fn create_derived_node(
    g: &mut dyn GraphBackend,
    element: NodeId,
    slot: &SlotDescriptor,
) -> Result<NodeId> {
    let derivation = slot.derivation.as_ref().ok_or_else(|| {
        SyncError::InvalidSlot(format!("derived slot {} has no derivation", slot.name))
    })?;
    let mut props = PropMap::new();
    props.insert(schema::DERIVED_FEATURE.into(), PropValue::from(slot.name.as_str()));
    props.insert(schema::DERIVATION_LANGUAGE.into(), PropValue::from(derivation.language.as_str()));
    props.insert(schema::DERIVATION_LOGIC.into(), PropValue::from(derivation.logic.as_str()));
    props.insert(schema::DERIVED_MANY.into(), PropValue::Bool(slot.many));
    props.insert(schema::DERIVED_ORDERED.into(), PropValue::Bool(slot.ordered));
    props.insert(schema::DERIVED_UNIQUE.into(), PropValue::Bool(slot.unique));
    props.insert(schema::DERIVED_VALUE_TYPE.into(), PropValue::from(slot.value_type.as_str()));
    props.insert(schema::DERIVED_VALUE.into(), schema::dirty_sentinel(&derivation.logic));
    let derived = g.create_node(DERIVED, props)?;
    let mut edge_props = PropMap::new();
    edge_props.insert(schema::IS_DERIVED.into(), PropValue::Bool(true));
    g.create_edge(element, derived, &slot.name, edge_props)?;
    g.index_add(
        schema::DERIVED_PENDING_INDEX,
        derived,
        schema::PENDING_KEY,
        schema::PENDING_VALUE,
    )?;
    Ok(derived)
}

/// Derived attribute node of `element` for `feature`, if any.
pub(crate) fn derived_node_of(
    g: &dyn GraphBackend,
    element: NodeId,
    feature: &str,
) -> Result<Option<NodeId>> {
    Ok(g
        .edges(element, Dir::Out, Some(feature))?
        .into_iter()
        .find(|edge| edge.flag(schema::IS_DERIVED))
        .map(|edge| edge.dst))
}

/// Index holding the values of `attribute` for instances of `type_node`.
pub(crate) fn indexed_attribute_index(
    g: &dyn GraphBackend,
    type_node: NodeId,
    attribute: &str,
) -> Result<String> {
    let name = g
        .string_property(type_node, schema::NAME)?
        .ok_or_else(|| SyncError::Corrupted(format!("type node {type_node} has no name")))?;
    let package = g
        .edges(type_node, Dir::Out, Some(schema::PACKAGE_EDGE))?
        .into_iter()
        .next()
        .ok_or_else(|| SyncError::Corrupted(format!("type node {type_node} has no package")))?;
    let uri = g
        .string_property(package.dst, schema::IDENTIFIER)?
        .ok_or_else(|| SyncError::Corrupted(format!("package node {} has no uri", package.dst)))?;
    Ok(schema::attribute_index_name(&uri, &name, attribute))
}
