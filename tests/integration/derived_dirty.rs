#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{element, init_tracing, item, Library, PathEvaluator, LIBRARY, PATH_LANGUAGE};
use modelsync::graph::{GraphBackend, MemGraph, PropValue};
use modelsync::model::simple::{SimpleObject, SimpleResource};
use modelsync::model::ReferenceTarget;
use modelsync::sync::schema;
use modelsync::sync::{
    AccessRecord, ChangeKind, DerivationEvaluator, DerivationScheduler, DerivedAttributeSpec,
    FileChange, ModelUpdater, Result, SyncError, SyncOptions,
};
use modelsync::types::NodeId;

const PEOPLE: &str = "/people.model";
const BOOKS: &str = "/books.model";

fn author_name() -> DerivedAttributeSpec {
    DerivedAttributeSpec::new(LIBRARY, "Book", "authorName", PATH_LANGUAGE, "author.name")
}

fn people(lib: &Library) -> SimpleResource {
    SimpleResource::new(
        (0..3)
            .map(|i| {
                SimpleObject::new(Arc::clone(&lib.writer), PEOPLE, format!("w{i}"))
                    .with_attribute("name", format!("writer {i}"))
            })
            .collect(),
    )
}

fn books(lib: &Library) -> SimpleResource {
    SimpleResource::new(vec![
        SimpleObject::new(Arc::clone(&lib.book), BOOKS, "b0")
            .with_reference("author", vec![ReferenceTarget::new(PEOPLE, "w0")]),
        SimpleObject::new(Arc::clone(&lib.novel), BOOKS, "n0")
            .with_reference("author", vec![ReferenceTarget::new(PEOPLE, "w1")]),
    ])
}

fn value(g: &MemGraph, updater: &ModelUpdater, path: &str, fragment: &str) -> Option<PropValue> {
    updater
        .derived_value(g, element(g, path, fragment), "authorName")
        .unwrap()
}

fn index_library(updater: &mut ModelUpdater, g: &mut MemGraph, lib: &Library) {
    let p = people(lib);
    let b = books(lib);
    let item_p = item(PEOPLE, "1", ChangeKind::Added);
    let item_b = item(BOOKS, "1", ChangeKind::Added);
    let report = updater
        .apply_change_set(g, &[FileChange::parsed(&item_p, &p), FileChange::parsed(&item_b, &b)])
        .unwrap();
    assert!(report.success());
}

#[test]
fn new_instances_are_derived_in_the_fixup_phase() {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    updater.add_evaluator(Box::new(PathEvaluator::default()));
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    assert_eq!(updater.add_derived_attribute(&mut g, &author_name()).unwrap(), 0);

    index_library(&mut updater, &mut g, &lib);
    assert_eq!(value(&g, &updater, BOOKS, "b0"), Some(PropValue::from("writer 0")));
    assert_eq!(value(&g, &updater, BOOKS, "n0"), Some(PropValue::from("writer 1")));
    assert!(DerivationScheduler::pending(&g).unwrap().is_empty());
}

#[test]
fn updating_an_accessed_attribute_dirties_the_dependent() {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    updater.add_evaluator(Box::new(PathEvaluator::default()));
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    updater.add_derived_attribute(&mut g, &author_name()).unwrap();
    index_library(&mut updater, &mut g, &lib);

    let mut p = people(&lib);
    p.get_mut("w0").unwrap().set_attribute("name", "Ursula");
    let item_p = item(PEOPLE, "2", ChangeKind::Modified);
    let report = updater.update_store(&mut g, &[FileChange::parsed(&item_p, &p)]).unwrap();
    assert_eq!(report.dirtied, 1);
    let stale = value(&g, &updater, BOOKS, "b0").unwrap();
    assert!(schema::is_dirty(&stale));
    assert_eq!(value(&g, &updater, BOOKS, "n0"), Some(PropValue::from("writer 1")));

    let fixup = updater.update_proxies(&mut g).unwrap();
    assert_eq!(fixup.derived.computed, 1);
    assert_eq!(value(&g, &updater, BOOKS, "b0"), Some(PropValue::from("Ursula")));

    let mut p = people(&lib);
    p.get_mut("w0").unwrap().set_attribute("name", "Ursula");
    p.get_mut("w2").unwrap().set_attribute("name", "Nobody reads me");
    let item_p = item(PEOPLE, "3", ChangeKind::Modified);
    let report = updater.update_store(&mut g, &[FileChange::parsed(&item_p, &p)]).unwrap();
    assert_eq!(report.dirtied, 0);
}

#[test]
fn declaring_on_existing_instances_reaches_subtypes() {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    updater.add_evaluator(Box::new(PathEvaluator::default()));
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    index_library(&mut updater, &mut g, &lib);

    assert_eq!(updater.add_derived_attribute(&mut g, &author_name()).unwrap(), 2);
    assert_eq!(value(&g, &updater, BOOKS, "n0"), Some(PropValue::from("writer 1")));

    // Redeclaring the same attribute is a no-op.
    assert_eq!(updater.add_derived_attribute(&mut g, &author_name()).unwrap(), 0);

    assert!(updater
        .remove_derived_attribute(&mut g, LIBRARY, "Book", "authorName")
        .unwrap());
    assert_eq!(value(&g, &updater, BOOKS, "b0"), None);
    assert!(g.nodes_with_label(schema::DERIVED).is_empty());
    assert!(!updater
        .remove_derived_attribute(&mut g, LIBRARY, "Book", "authorName")
        .unwrap());
}

#[test]
fn derived_name_may_not_shadow_a_feature() {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    let clash = DerivedAttributeSpec::new(LIBRARY, "Book", "name", PATH_LANGUAGE, "author.name");
    let err = updater.add_derived_attribute(&mut g, &clash).unwrap_err();
    assert!(matches!(err, SyncError::InvalidSlot(_)), "{err}");
}

#[test]
fn missing_evaluator_leaves_nodes_queued() {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    updater.add_derived_attribute(&mut g, &author_name()).unwrap();

    let p = people(&lib);
    let b = books(&lib);
    let item_p = item(PEOPLE, "1", ChangeKind::Added);
    let item_b = item(BOOKS, "1", ChangeKind::Added);
    let report = updater
        .apply_change_set(&mut g, &[FileChange::parsed(&item_p, &p), FileChange::parsed(&item_b, &b)])
        .unwrap();
    assert_eq!(report.fixup.derived.computed, 0);
    assert_eq!(report.fixup.derived.failed_chunks, 1);
    assert_eq!(report.fixup.derived.still_pending, 2);
    assert!(schema::is_dirty(&value(&g, &updater, BOOKS, "b0").unwrap()));

    updater.add_evaluator(Box::new(PathEvaluator::default()));
    let fixup = updater.update_proxies(&mut g).unwrap();
    assert_eq!(fixup.derived.computed, 2);
    assert_eq!(fixup.derived.still_pending, 0);
}

/// Fails its second evaluation and succeeds otherwise.
#[derive(Default)]
struct FlakyEvaluator {
    inner: PathEvaluator,
}

impl DerivationEvaluator for FlakyEvaluator {
    fn language(&self) -> &str {
        PATH_LANGUAGE
    }

    fn calculate_derived_attributes(
        &mut self,
        g: &mut dyn GraphBackend,
        nodes: &[NodeId],
    ) -> Result<Vec<AccessRecord>> {
        let records = self.inner.calculate_derived_attributes(g, nodes)?;
        if self.inner.calls == 2 {
            return Err(SyncError::Evaluation {
                language: PATH_LANGUAGE.into(),
                message: "author unreadable".into(),
            });
        }
        Ok(records)
    }
}

#[test]
fn failed_chunk_keeps_committed_chunks() {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::new(SyncOptions::default().derived_chunk_size(1));
    updater.add_evaluator(Box::new(FlakyEvaluator::default()));
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    updater.add_derived_attribute(&mut g, &author_name()).unwrap();

    let p = people(&lib);
    let b = books(&lib);
    let item_p = item(PEOPLE, "1", ChangeKind::Added);
    let item_b = item(BOOKS, "1", ChangeKind::Added);
    let report = updater
        .apply_change_set(&mut g, &[FileChange::parsed(&item_p, &p), FileChange::parsed(&item_b, &b)])
        .unwrap();
    assert_eq!(report.fixup.derived.computed, 1);
    assert_eq!(report.fixup.derived.failed_chunks, 1);
    assert_eq!(report.fixup.derived.still_pending, 1);

    let values = [value(&g, &updater, BOOKS, "b0"), value(&g, &updater, BOOKS, "n0")];
    let computed: Vec<_> = values
        .iter()
        .flatten()
        .filter(|v| !schema::is_dirty(v))
        .collect();
    assert_eq!(computed.len(), 1);
    assert_eq!(values.iter().flatten().filter(|v| schema::is_dirty(v)).count(), 1);
    let pending = DerivationScheduler::pending(&g).unwrap();
    assert_eq!(pending.len(), 1);

    let fixup = updater.update_proxies(&mut g).unwrap();
    assert_eq!(fixup.derived.computed, 1);
    assert_eq!(fixup.derived.still_pending, 0);
    assert_eq!(value(&g, &updater, BOOKS, "b0"), Some(PropValue::from("writer 0")));
    assert_eq!(value(&g, &updater, BOOKS, "n0"), Some(PropValue::from("writer 1")));
}
