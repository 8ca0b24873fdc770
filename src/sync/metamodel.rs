//! Registration and removal of metamodel packages, and the per-type
//! derived and indexed attribute declarations that hang off them.

use std::collections::BTreeSet;

use tracing::{info, warn};

use super::batch::{self, create_derived_node, derived_node_of};
use super::deletion::DeletionEngine;
use super::error::{Result, SyncError};
use super::listener::ChangeListener;
use super::options::SyncOptions;
use super::proxy::ProxyLedger;
use super::schema::{self, DEPENDS_ON, OF_KIND, OF_TYPE, PACKAGE_EDGE};
use super::slot::{Derivation, SlotDescriptor, SlotKind};
use super::type_cache::TypeCache;
use crate::graph::{Dir, GraphBackend, PropMap, PropValue, Tx};
use crate::model::{ClassDescriptor, ClassKey, MetamodelPackage};
use crate::types::NodeId;

/// Outcome of [`MetamodelRegistrar::register`].
#[derive(Debug, Default)]
pub struct RegistrationReport {
    /// Package URIs registered by this call.
    pub packages_added: Vec<String>,
    /// Packages that were already registered and left untouched.
    pub packages_skipped: Vec<String>,
    /// Type nodes created.
    pub classes_added: usize,
    /// Classes rolled back, with the reason.
    pub rejected: Vec<(ClassKey, SyncError)>,
}

/// Outcome of [`MetamodelRegistrar::remove`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    /// Removed package URIs, including dependents.
    pub packages_removed: Vec<String>,
    /// Type nodes deleted.
    pub types_removed: usize,
    /// Elements deleted because their type went away.
    pub elements_deleted: usize,
    /// File nodes left without elements and deleted.
    pub files_deleted: usize,
    /// Repositories whose files lost elements.
    pub repositories: BTreeSet<String>,
    /// Attribute indexes dropped with their types.
    pub indexes_dropped: Vec<String>,
}

/// Declaration of a derived attribute on an existing type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedAttributeSpec {
    /// URI of the package declaring the type.
    pub package_uri: String,
    /// Type receiving the attribute.
    pub type_name: String,
    /// Attribute name.
    pub name: String,
    /// Holds a collection of values.
    pub many: bool,
    /// Collection order is significant.
    pub ordered: bool,
    /// Collection values are distinct.
    pub unique: bool,
    /// Value type name.
    pub value_type: String,
    /// Derivation language.
    pub language: String,
    /// Derivation logic.
    pub logic: String,
}

impl DerivedAttributeSpec {
    /// Single-valued derived attribute of type `String`.
    pub fn new(
        package_uri: impl Into<String>,
        type_name: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
        logic: impl Into<String>,
    ) -> Self {
        Self {
            package_uri: package_uri.into(),
            type_name: type_name.into(),
            name: name.into(),
            many: false,
            ordered: false,
            unique: false,
            value_type: "String".to_string(),
            language: language.into(),
            logic: logic.into(),
        }
    }

    /// Replaces the value type.
    pub fn value_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = value_type.into();
        self
    }

    /// Makes the attribute many-valued.
    pub fn many(mut self, ordered: bool, unique: bool) -> Self {
        self.many = true;
        self.ordered = ordered;
        self.unique = unique;
        self
    }

    fn slot(&self) -> SlotDescriptor {
        SlotDescriptor::derived(
            self.name.clone(),
            self.many,
            self.ordered,
            self.unique,
            self.value_type.clone(),
            Derivation {
                language: self.language.clone(),
                logic: self.logic.clone(),
            },
        )
    }
}

/// Maintains type nodes, package nodes and their dependency edges.
pub struct MetamodelRegistrar<'a> {
    cache: &'a mut TypeCache,
    listener: &'a mut dyn ChangeListener,
    ledger: ProxyLedger,
}

impl<'a> MetamodelRegistrar<'a> {
    /// Registrar sharing the run's type cache and listener.
    pub fn new(
        cache: &'a mut TypeCache,
        listener: &'a mut dyn ChangeListener,
        options: &SyncOptions,
    ) -> Self {
        Self {
            cache,
            listener,
            ledger: ProxyLedger::new(options),
        }
    }

    /// Registers packages and their classes.
    ///
    /// Package nodes are created first so that classes may depend on any
    /// package of the same call. Each class is registered in its own
    /// transaction; a class depending on an unknown package is rolled back
    /// and reported without affecting the others.
    pub fn register(
        &mut self,
        g: &mut dyn GraphBackend,
        packages: &[MetamodelPackage],
    ) -> Result<RegistrationReport> {
        let mut report = RegistrationReport::default();
        let mut fresh = Vec::new();
        for package in packages {
            if schema::find_package(g, &package.uri)?.is_some() {
                report.packages_skipped.push(package.uri.clone());
                continue;
            }
            self.listener.change_start();
            let mut tx = Tx::begin(&mut *g)?;
            match create_package(tx.graph(), package) {
                Ok(node) => {
                    tx.commit()?;
                    self.listener.metamodel_added(&package.uri, node);
                    self.listener.change_success();
                    report.packages_added.push(package.uri.clone());
                    fresh.push((package, node));
                }
                Err(err) => {
                    drop(tx);
                    self.listener.change_failure();
                    return Err(SyncError::aborted(format!("package {}", package.uri), err));
                }
            }
        }

        for (package, package_node) in fresh {
            for class in &package.classes {
                self.listener.change_start();
                let mut tx = Tx::begin(&mut *g)?;
                match register_class(tx.graph(), package_node, class) {
                    Ok(Some(node)) => {
                        tx.commit()?;
                        self.listener.class_added(&class.key, node);
                        self.listener.change_success();
                        report.classes_added += 1;
                    }
                    Ok(None) => {
                        tx.commit()?;
                        self.listener.change_success();
                    }
                    Err(err) => {
                        drop(tx);
                        self.listener.change_failure();
                        if err.is_fatal() {
                            return Err(err);
                        }
                        warn!(class = %class.key, error = %err, "sync.metamodel.class_rejected");
                        report.rejected.push((class.key.clone(), err));
                    }
                }
            }
        }
        info!(
            packages = report.packages_added.len(),
            classes = report.classes_added,
            rejected = report.rejected.len(),
            "sync.metamodel.registered"
        );
        Ok(report)
    }

    /// Removes packages, every package depending on them, and every element
    /// typed by their classes. Runs in one transaction.
    pub fn remove(&mut self, g: &mut dyn GraphBackend, uris: &[&str]) -> Result<RemovalReport> {
        self.listener.change_start();
        let mut tx = Tx::begin(&mut *g)?;
        match self.remove_in(tx.graph(), uris) {
            Ok(report) => {
                tx.commit()?;
                self.listener.change_success();
                self.cache.clear();
                info!(
                    packages = report.packages_removed.len(),
                    elements = report.elements_deleted,
                    files = report.files_deleted,
                    "sync.metamodel.removed"
                );
                Ok(report)
            }
            Err(err) => {
                drop(tx);
                self.listener.change_failure();
                Err(SyncError::aborted("metamodel removal", err))
            }
        }
    }

    fn remove_in(&mut self, g: &mut dyn GraphBackend, uris: &[&str]) -> Result<RemovalReport> {
        let mut report = RemovalReport::default();
        let mut packages = BTreeSet::new();
        let mut queue = Vec::new();
        for uri in uris {
            let node = schema::find_package(g, uri)?
                .ok_or_else(|| SyncError::MetamodelNotFound((*uri).to_owned()))?;
            if packages.insert(node) {
                queue.push(node);
            }
        }
        while let Some(package) = queue.pop() {
            for edge in g.edges(package, Dir::In, Some(DEPENDS_ON))? {
                if packages.insert(edge.src) {
                    queue.push(edge.src);
                }
            }
        }

        let mut types = BTreeSet::new();
        for &package in &packages {
            for edge in g.edges(package, Dir::In, Some(PACKAGE_EDGE))? {
                types.insert(edge.src);
            }
        }
        let mut instances = BTreeSet::new();
        for &ty in &types {
            for label in [OF_TYPE, OF_KIND] {
                for edge in g.edges(ty, Dir::In, Some(label))? {
                    instances.insert(edge.src);
                }
            }
        }
        let instances: Vec<NodeId> = instances.into_iter().collect();

        let files = {
            let mut engine = DeletionEngine::new(self.ledger.clone(), &mut *self.listener);
            let (summary, files) = engine.purge_elements(g, &instances)?;
            report.elements_deleted = summary.elements_deleted;
            files
        };
        for file in files {
            if let Some(repository) = g.string_property(file, schema::REPOSITORY)? {
                report.repositories.insert(repository);
            }
            if schema::elements_of_file(g, file)?.is_empty() {
                let key = schema::key_of_file(g, file)?.unwrap_or_default();
                g.remove_from_all_indexes(file)?;
                g.delete_node(file)?;
                self.listener.file_removed(&key, file);
                report.files_deleted += 1;
            }
        }

        for &ty in &types {
            delete_with_edges(g, ty)?;
            report.types_removed += 1;
        }
        for &package in &packages {
            let uri = g.string_property(package, schema::IDENTIFIER)?.unwrap_or_default();
            delete_with_edges(g, package)?;
            let prefix = format!("{uri}{}", schema::INDEX_NAME_SEPARATOR);
            for index in g.index_names() {
                if index.starts_with(&prefix) && g.drop_index(&index)? {
                    report.indexes_dropped.push(index);
                }
            }
            report.packages_removed.push(uri);
        }
        report.packages_removed.sort();
        Ok(report)
    }

    /// Declares a derived attribute on a type and attaches a dirty derived
    /// node to every instance of it (or of a subtype). Existing derived nodes
    /// for the same name are reused.
    ///
    /// Returns the number of instances affected.
    pub fn add_derived_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        spec: &DerivedAttributeSpec,
    ) -> Result<usize> {
        let mut tx = Tx::begin(&mut *g)?;
        let (type_node, count) = add_derived_in(tx.graph(), spec)
            .map_err(|err| SyncError::aborted(format!("derived attribute {}", spec.name), err))?;
        tx.commit()?;
        self.cache.invalidate_slots(type_node);
        info!(
            package = %spec.package_uri,
            type_name = %spec.type_name,
            name = %spec.name,
            instances = count,
            "sync.metamodel.derived_added"
        );
        Ok(count)
    }

    /// Removes a derived attribute and its per-instance nodes.
    pub fn remove_derived_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        package_uri: &str,
        type_name: &str,
        name: &str,
    ) -> Result<bool> {
        let mut tx = Tx::begin(&mut *g)?;
        let mut engine = DeletionEngine::new(self.ledger.clone(), &mut *self.listener);
        let removed = remove_derived_in(tx.graph(), &mut engine, package_uri, type_name, name)
            .map_err(|err| SyncError::aborted(format!("derived attribute {name}"), err))?;
        tx.commit()?;
        if let Some(type_node) = removed {
            self.cache.invalidate_slots(type_node);
        }
        Ok(removed.is_some())
    }

    /// Flags an attribute as indexed and indexes the values of every
    /// existing instance. Returns the number of instances indexed.
    pub fn add_indexed_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        package_uri: &str,
        type_name: &str,
        attribute: &str,
    ) -> Result<usize> {
        let mut tx = Tx::begin(&mut *g)?;
        let (type_node, count) = add_indexed_in(tx.graph(), package_uri, type_name, attribute)
            .map_err(|err| SyncError::aborted(format!("indexed attribute {attribute}"), err))?;
        tx.commit()?;
        self.cache.invalidate_slots(type_node);
        Ok(count)
    }

    /// Unflags an indexed attribute and drops its index.
    pub fn remove_indexed_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        package_uri: &str,
        type_name: &str,
        attribute: &str,
    ) -> Result<bool> {
        let mut tx = Tx::begin(&mut *g)?;
        let graph = tx.graph();
        let type_node = find_type(graph, package_uri, type_name)?;
        let Some(mut slot) = SlotDescriptor::read(graph, type_node, attribute)? else {
            return Ok(false);
        };
        if !slot.indexed {
            return Ok(false);
        }
        slot.indexed = false;
        slot.write(graph, type_node)?;
        graph.drop_index(&schema::attribute_index_name(package_uri, type_name, attribute))?;
        tx.commit()?;
        self.cache.invalidate_slots(type_node);
        Ok(true)
    }
}

fn create_package(g: &mut dyn GraphBackend, package: &MetamodelPackage) -> Result<NodeId> {
    let mut props = PropMap::new();
    props.insert(schema::IDENTIFIER.into(), PropValue::from(package.uri.as_str()));
    props.insert(schema::KIND.into(), PropValue::from(package.kind.as_str()));
    props.insert(schema::RESOURCE.into(), PropValue::from(package.resource.as_str()));
    let node = g.create_node(schema::PACKAGE, props)?;
    g.index_add(schema::METAMODEL_INDEX, node, schema::ID_KEY, &package.uri)?;
    Ok(node)
}

/// Packages other than its own that `class` refers to.
fn dependencies(class: &ClassDescriptor) -> BTreeSet<&str> {
    let own = class.key.package_uri.as_str();
    class
        .super_types
        .iter()
        .map(|key| key.package_uri.as_str())
        .chain(
            class
                .attributes
                .iter()
                .filter_map(|attr| attr.value_type.package_uri.as_deref()),
        )
        .chain(class.references.iter().map(|r| r.target.package_uri.as_str()))
        .filter(|uri| *uri != own)
        .collect()
}

fn register_class(
    g: &mut dyn GraphBackend,
    package: NodeId,
    class: &ClassDescriptor,
) -> Result<Option<NodeId>> {
    if schema::find_type_in(g, package, &class.key.name)?.is_some() {
        return Ok(None);
    }
    let mut targets = Vec::new();
    for uri in dependencies(class) {
        let dep = schema::find_package(g, uri)?.ok_or_else(|| {
            SyncError::UnresolvedMetamodelDependency {
                class: class.key.clone(),
                package: uri.to_owned(),
            }
        })?;
        targets.push(dep);
    }

    let mut props = PropMap::new();
    props.insert(schema::NAME.into(), PropValue::from(class.key.name.as_str()));
    let node = g.create_node(schema::TYPE, props)?;
    g.create_edge(node, package, PACKAGE_EDGE, PropMap::new())?;
    for slot in SlotDescriptor::for_class(class).values() {
        slot.write(g, node)?;
    }
    for dep in targets {
        let linked = g
            .edges(package, Dir::Out, Some(DEPENDS_ON))?
            .iter()
            .any(|edge| edge.dst == dep);
        if !linked {
            g.create_edge(package, dep, DEPENDS_ON, PropMap::new())?;
        }
    }
    Ok(Some(node))
}

fn find_type(g: &dyn GraphBackend, package_uri: &str, type_name: &str) -> Result<NodeId> {
    let package = schema::find_package(g, package_uri)?
        .ok_or_else(|| SyncError::MetamodelNotFound(package_uri.to_owned()))?;
    schema::find_type_in(g, package, type_name)?.ok_or_else(|| SyncError::TypeNotFound {
        package: package_uri.to_owned(),
        name: type_name.to_owned(),
    })
}

fn instances_of(g: &dyn GraphBackend, type_node: NodeId) -> Result<Vec<NodeId>> {
    Ok(g
        .edges(type_node, Dir::In, Some(OF_KIND))?
        .into_iter()
        .map(|edge| edge.src)
        .collect())
}

fn add_derived_in(g: &mut dyn GraphBackend, spec: &DerivedAttributeSpec) -> Result<(NodeId, usize)> {
    let type_node = find_type(g, &spec.package_uri, &spec.type_name)?;
    let slot = spec.slot();
    match SlotDescriptor::read(g, type_node, &spec.name)? {
        Some(existing) if existing == slot => return Ok((type_node, 0)),
        Some(existing) if existing.kind != SlotKind::Derived => {
            return Err(SyncError::InvalidSlot(format!(
                "{} is already declared as a {:?} slot",
                spec.name, existing.kind
            )));
        }
        _ => {}
    }
    slot.write(g, type_node)?;
    let instances = instances_of(g, type_node)?;
    for &element in &instances {
        match derived_node_of(g, element, &spec.name)? {
            Some(derived) => {
                g.set_property(derived, schema::DERIVATION_LANGUAGE, PropValue::from(spec.language.as_str()))?;
                g.set_property(derived, schema::DERIVATION_LOGIC, PropValue::from(spec.logic.as_str()))?;
                g.set_property(derived, schema::DERIVED_VALUE, schema::dirty_sentinel(&spec.logic))?;
                g.index_add(
                    schema::DERIVED_PENDING_INDEX,
                    derived,
                    schema::PENDING_KEY,
                    schema::PENDING_VALUE,
                )?;
            }
            None => {
                create_derived_node(g, element, &slot)?;
            }
        }
    }
    Ok((type_node, instances.len()))
}

fn remove_derived_in(
    g: &mut dyn GraphBackend,
    engine: &mut DeletionEngine<'_>,
    package_uri: &str,
    type_name: &str,
    name: &str,
) -> Result<Option<NodeId>> {
    let type_node = find_type(g, package_uri, type_name)?;
    match SlotDescriptor::read(g, type_node, name)? {
        None => return Ok(None),
        Some(slot) if slot.kind != SlotKind::Derived => {
            return Err(SyncError::InvalidSlot(format!("{name} is not a derived attribute")));
        }
        Some(_) => {}
    }
    SlotDescriptor::remove(g, type_node, name)?;
    for element in instances_of(g, type_node)? {
        if let Some(derived) = derived_node_of(g, element, name)? {
            engine.delete_derived_node(g, derived)?;
        }
    }
    Ok(Some(type_node))
}

fn add_indexed_in(
    g: &mut dyn GraphBackend,
    package_uri: &str,
    type_name: &str,
    attribute: &str,
) -> Result<(NodeId, usize)> {
    let type_node = find_type(g, package_uri, type_name)?;
    let mut slot = SlotDescriptor::read(g, type_node, attribute)?.ok_or_else(|| {
        SyncError::FeatureNotFound {
            class: ClassKey::new(package_uri, type_name),
            feature: attribute.to_owned(),
        }
    })?;
    if !slot.kind.holds_attribute() {
        return Err(SyncError::InvalidSlot(format!(
            "{attribute} is a {:?} slot and cannot be indexed",
            slot.kind
        )));
    }
    slot.indexed = true;
    slot.write(g, type_node)?;
    let index = batch::indexed_attribute_index(g, type_node, attribute)?;
    let mut count = 0;
    for element in instances_of(g, type_node)? {
        if let Some(value) = g.property(element, attribute)? {
            g.index_remove(&index, element, None)?;
            for term in value.index_terms() {
                g.index_add(&index, element, attribute, &term)?;
            }
            count += 1;
        }
    }
    Ok((type_node, count))
}

fn delete_with_edges(g: &mut dyn GraphBackend, node: NodeId) -> Result<()> {
    for edge in g.edges(node, Dir::Both, None)? {
        g.delete_edge(edge.id)?;
    }
    g.remove_from_all_indexes(node)?;
    g.delete_node(node)?;
    Ok(())
}
