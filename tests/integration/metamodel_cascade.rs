#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{element, find_element, init_tracing, item, REPO};
use modelsync::graph::{Dir, GraphBackend, MemGraph};
use modelsync::model::simple::{SimpleObject, SimpleResource};
use modelsync::model::{AttributeDecl, ClassDescriptor, ClassKey, MetamodelPackage, ReferenceDecl, ReferenceTarget};
use modelsync::sync::schema;
use modelsync::sync::{ChangeKind, FileChange, ModelUpdater, SyncError};

const BASE: &str = "http://example.org/base";
const CATALOG: &str = "http://example.org/catalog";
const OTHER: &str = "http://example.org/other";

struct Classes {
    named: Arc<ClassDescriptor>,
    entry: Arc<ClassDescriptor>,
    thing: Arc<ClassDescriptor>,
}

fn classes() -> Classes {
    let named = ClassDescriptor::new(BASE, "Named").with_attribute(AttributeDecl::single("name", "String"));
    let entry = ClassDescriptor::new(CATALOG, "Entry")
        .with_super(ClassKey::new(BASE, "Named"))
        .with_attribute(AttributeDecl::single("name", "String"))
        .with_reference(ReferenceDecl::new("see", ClassKey::new(CATALOG, "Entry")).many());
    let thing = ClassDescriptor::new(OTHER, "Thing").with_attribute(AttributeDecl::single("name", "String"));
    Classes {
        named: Arc::new(named),
        entry: Arc::new(entry),
        thing: Arc::new(thing),
    }
}

fn package(uri: &str, class: &Arc<ClassDescriptor>) -> MetamodelPackage {
    MetamodelPackage::new(uri, "ecore").with_class((**class).clone())
}

fn all_packages(c: &Classes) -> Vec<MetamodelPackage> {
    vec![
        package(CATALOG, &c.entry),
        package(BASE, &c.named),
        package(OTHER, &c.thing),
    ]
}

fn setup() -> (MemGraph, ModelUpdater, Classes) {
    init_tracing();
    let c = classes();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    let report = updater.register_metamodels(&mut g, &all_packages(&c)).unwrap();
    assert_eq!(report.packages_added.len(), 3);
    assert_eq!(report.classes_added, 3);
    (g, updater, c)
}

fn index(updater: &mut ModelUpdater, g: &mut MemGraph, path: &str, objects: Vec<SimpleObject>) {
    let res = SimpleResource::new(objects);
    let it = item(path, "1", ChangeKind::Added);
    let report = updater.apply_change_set(g, &[FileChange::parsed(&it, &res)]).unwrap();
    assert!(report.success());
}

#[test]
fn class_with_unregistered_dependency_is_rejected() {
    init_tracing();
    let c = classes();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    let report = updater.register_metamodels(&mut g, &[package(CATALOG, &c.entry)]).unwrap();
    assert_eq!(report.packages_added, vec![CATALOG.to_string()]);
    assert_eq!(report.classes_added, 0);
    assert_eq!(report.rejected.len(), 1);
    match &report.rejected[0].1 {
        SyncError::UnresolvedMetamodelDependency { class, package } => {
            assert_eq!(class, &c.entry.key);
            assert_eq!(package, BASE);
        }
        other => panic!("unexpected error {other}"),
    }
    let catalog = schema::find_package(&g, CATALOG).unwrap().unwrap();
    assert!(schema::find_type_in(&g, catalog, "Entry").unwrap().is_none());
    assert!(g.nodes_with_label(schema::TYPE).is_empty());
}

#[test]
fn packages_of_one_call_may_depend_on_each_other() {
    let (mut g, mut updater, c) = setup();
    let catalog = schema::find_package(&g, CATALOG).unwrap().unwrap();
    let base = schema::find_package(&g, BASE).unwrap().unwrap();
    let deps: Vec<_> = g
        .edges(catalog, Dir::Out, Some(schema::DEPENDS_ON))
        .unwrap()
        .into_iter()
        .map(|e| e.dst)
        .collect();
    assert_eq!(deps, vec![base]);

    let again = updater.register_metamodels(&mut g, &all_packages(&c)).unwrap();
    assert_eq!(again.packages_skipped.len(), 3);
    assert_eq!(again.classes_added, 0);
}

#[test]
fn removing_a_package_cascades_to_dependents_and_instances() {
    let (mut g, mut updater, c) = setup();
    index(
        &mut updater,
        &mut g,
        "/mixed.model",
        vec![
            SimpleObject::new(Arc::clone(&c.named), "/mixed.model", "n1").with_attribute("name", "n"),
            SimpleObject::new(Arc::clone(&c.entry), "/mixed.model", "e1")
                .with_reference("see", vec![ReferenceTarget::new("", "e2")]),
            SimpleObject::new(Arc::clone(&c.entry), "/mixed.model", "e2"),
            SimpleObject::new(Arc::clone(&c.thing), "/mixed.model", "t1").with_attribute("name", "t"),
        ],
    );
    index(
        &mut updater,
        &mut g,
        "/entries.model",
        vec![SimpleObject::new(Arc::clone(&c.entry), "/entries.model", "e3")],
    );
    updater.add_indexed_attribute(&mut g, BASE, "Named", "name").unwrap();
    let named_index = schema::attribute_index_name(BASE, "Named", "name");

    let report = updater.remove_metamodels(&mut g, &[BASE]).unwrap();
    assert_eq!(report.packages_removed, vec![BASE.to_string(), CATALOG.to_string()]);
    assert_eq!(report.types_removed, 2);
    assert_eq!(report.elements_deleted, 4);
    assert_eq!(report.files_deleted, 1);
    assert!(report.repositories.contains(REPO));
    assert_eq!(report.indexes_dropped, vec![named_index.clone()]);

    assert!(schema::find_package(&g, BASE).unwrap().is_none());
    assert!(schema::find_package(&g, CATALOG).unwrap().is_none());
    assert!(schema::find_package(&g, OTHER).unwrap().is_some());
    assert!(find_element(&g, "/mixed.model", "e1").is_none());
    assert!(find_element(&g, "/mixed.model", "n1").is_none());
    element(&g, "/mixed.model", "t1");
    assert!(schema::find_file(&g, &schema::file_key(REPO, "/entries.model")).unwrap().is_none());
    assert!(!g.index_names().contains(&named_index));
}

#[test]
fn removing_an_unknown_package_fails_without_changes() {
    let (mut g, mut updater, _) = setup();
    let nodes = g.node_count();
    let err = updater.remove_metamodels(&mut g, &["http://example.org/none"]).unwrap_err();
    assert!(matches!(err, SyncError::MetamodelNotFound(_)), "{err}");
    assert_eq!(g.node_count(), nodes);
}

#[test]
fn indexed_attribute_follows_inserts_and_updates() {
    let (mut g, mut updater, c) = setup();
    let thing = |id: &str, name: &str| {
        SimpleObject::new(Arc::clone(&c.thing), "/things.model", id).with_attribute("name", name)
    };
    index(&mut updater, &mut g, "/things.model", vec![thing("t1", "alpha"), thing("t2", "beta")]);

    assert_eq!(updater.add_indexed_attribute(&mut g, OTHER, "Thing", "name").unwrap(), 2);
    let idx = schema::attribute_index_name(OTHER, "Thing", "name");
    assert_eq!(updater.indexed_attributes(&g), vec![idx.clone()]);
    let t1 = element(&g, "/things.model", "t1");
    assert_eq!(g.index_get(&idx, "name", "alpha").unwrap(), vec![t1]);

    let res = SimpleResource::new(vec![thing("t1", "gamma"), thing("t2", "beta")]);
    let it = item("/things.model", "2", ChangeKind::Modified);
    updater.apply_change_set(&mut g, &[FileChange::parsed(&it, &res)]).unwrap();
    assert!(g.index_get(&idx, "name", "alpha").unwrap().is_empty());
    assert_eq!(g.index_get(&idx, "name", "gamma").unwrap(), vec![t1]);

    index(
        &mut updater,
        &mut g,
        "/more.model",
        vec![SimpleObject::new(Arc::clone(&c.thing), "/more.model", "t3").with_attribute("name", "alpha")],
    );
    let t3 = element(&g, "/more.model", "t3");
    assert_eq!(g.index_get(&idx, "name", "alpha").unwrap(), vec![t3]);

    assert!(updater.remove_indexed_attribute(&mut g, OTHER, "Thing", "name").unwrap());
    assert!(updater.indexed_attributes(&g).is_empty());
    assert!(!updater.remove_indexed_attribute(&mut g, OTHER, "Thing", "name").unwrap());
}

#[test]
fn only_attributes_can_be_indexed() {
    let (mut g, mut updater, _) = setup();
    let err = updater.add_indexed_attribute(&mut g, CATALOG, "Entry", "see").unwrap_err();
    assert!(matches!(err, SyncError::InvalidSlot(_)), "{err}");
    let err = updater.add_indexed_attribute(&mut g, OTHER, "Thing", "colour").unwrap_err();
    assert!(matches!(err, SyncError::FeatureNotFound { .. }), "{err}");
    let err = updater.add_indexed_attribute(&mut g, OTHER, "Widget", "name").unwrap_err();
    assert!(matches!(err, SyncError::TypeNotFound { .. }), "{err}");
}
