#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{element, find_element, init_tracing, item, targets, Library};
use modelsync::graph::{GraphBackend, MemGraph, PropValue};
use modelsync::model::simple::{SimpleObject, SimpleResource};
use modelsync::model::ReferenceTarget;
use modelsync::sync::schema;
use modelsync::sync::{classify, ChangeKind, FileChange, ModelUpdater, SyncOutcome, TypeCache};

const PATH: &str = "/shelf.model";

fn shelf(lib: &Library, count: usize) -> SimpleResource {
    let mut res = SimpleResource::new(Vec::new());
    for i in 0..count {
        res.push(
            SimpleObject::new(Arc::clone(&lib.writer), PATH, format!("w{i}"))
                .with_attribute("name", format!("writer {i}")),
        );
    }
    res
}

fn setup(count: usize) -> (MemGraph, ModelUpdater, Library) {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::default();
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    let res = shelf(&lib, count);
    let it = item(PATH, "1", ChangeKind::Added);
    let report = updater.apply_change_set(&mut g, &[FileChange::parsed(&it, &res)]).unwrap();
    assert!(matches!(report.changes.files[0].result, Ok(SyncOutcome::Inserted(_))));
    (g, updater, lib)
}

fn rename(res: &mut SimpleResource, indexes: impl IntoIterator<Item = usize>) {
    for i in indexes {
        res.get_mut(&format!("w{i}")).unwrap().set_attribute("name", format!("renamed {i}"));
    }
}

fn sync(g: &mut MemGraph, updater: &mut ModelUpdater, res: &SimpleResource, revision: &str) -> SyncOutcome {
    let it = item(PATH, revision, ChangeKind::Modified);
    let mut report = updater.apply_change_set(g, &[FileChange::parsed(&it, res)]).unwrap();
    report.changes.files.remove(0).result.unwrap()
}

#[test]
fn unchanged_file_classifies_as_unchanged() {
    let (mut g, mut updater, lib) = setup(4);
    let res = shelf(&lib, 4);
    let file = schema::find_file(&g, &schema::file_key(common::REPO, PATH)).unwrap().unwrap();
    let classification = classify(&g, &mut TypeCache::new(), file, &res).unwrap();
    assert_eq!(classification.unchanged.len(), 4);
    assert_eq!(classification.changes(), 0);
    assert_eq!(classification.ratio(), Some(0.0));

    let before = g.property(element(&g, PATH, "w0"), schema::SIGNATURE).unwrap();
    let (nodes, edges) = (g.node_count(), g.edge_count());
    match sync(&mut g, &mut updater, &res, "2") {
        SyncOutcome::Patched { ratio, summary } => {
            assert_eq!(ratio, 0.0);
            assert_eq!(summary.unchanged, 4);
            assert_eq!(summary.added + summary.updated + summary.deleted, 0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!((g.node_count(), g.edge_count()), (nodes, edges));
    assert_eq!(g.property(element(&g, PATH, "w0"), schema::SIGNATURE).unwrap(), before);
    let file = schema::find_file(&g, &schema::file_key(common::REPO, PATH)).unwrap().unwrap();
    assert_eq!(g.string_property(file, schema::REVISION).unwrap().as_deref(), Some("2"));
}

#[test]
fn ratio_at_threshold_is_patched() {
    let (mut g, mut updater, lib) = setup(10);
    let w9 = element(&g, PATH, "w9");
    let mut res = shelf(&lib, 10);
    rename(&mut res, 0..5);
    match sync(&mut g, &mut updater, &res, "2") {
        SyncOutcome::Patched { ratio, summary } => {
            assert_eq!(ratio, 0.5);
            assert_eq!(summary.updated, 5);
            assert_eq!(summary.unchanged, 5);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(element(&g, PATH, "w9"), w9);
    let w0 = element(&g, PATH, "w0");
    assert_eq!(g.property(w0, "name").unwrap(), Some(PropValue::from("renamed 0")));
}

#[test]
fn ratio_above_threshold_is_replaced() {
    let (mut g, mut updater, lib) = setup(10);
    let w9 = element(&g, PATH, "w9");
    let mut res = shelf(&lib, 10);
    rename(&mut res, 0..6);
    match sync(&mut g, &mut updater, &res, "2") {
        SyncOutcome::Replaced { ratio, deletion, injection } => {
            assert!((ratio - 0.6).abs() < 1e-9);
            assert_eq!(deletion.elements_deleted, 10);
            assert_eq!(injection.elements, 10);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_ne!(element(&g, PATH, "w9"), w9);
    assert!(!g.contains_node(w9));
}

#[test]
fn mixed_patch_adds_deletes_and_updates() {
    let (mut g, mut updater, lib) = setup(10);
    let mut res = shelf(&lib, 10);
    res.remove("w8");
    res.remove("w9");
    rename(&mut res, [0]);
    res.push(SimpleObject::new(Arc::clone(&lib.writer), PATH, "w10").with_attribute("name", "new"));
    res.push(
        SimpleObject::new(Arc::clone(&lib.book), PATH, "b0")
            .with_reference("author", vec![ReferenceTarget::new("", "w10")]),
    );
    let w8 = element(&g, PATH, "w8");
    match sync(&mut g, &mut updater, &res, "2") {
        SyncOutcome::Patched { ratio, summary } => {
            assert_eq!(ratio, 0.5);
            assert_eq!((summary.added, summary.updated, summary.deleted), (2, 1, 2));
            assert_eq!(summary.references_added, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!g.contains_node(w8));
    assert!(find_element(&g, PATH, "w9").is_none());
    let b0 = element(&g, PATH, "b0");
    assert_eq!(targets(&g, b0, "author"), vec![element(&g, PATH, "w10")]);
}

#[test]
fn retyped_element_is_recreated_with_its_new_type() {
    let (mut g, mut updater, lib) = setup(4);
    let mut res = shelf(&lib, 4);
    let old = element(&g, PATH, "w3");
    res.get_mut("w3").unwrap().retype(Arc::clone(&lib.book));
    match sync(&mut g, &mut updater, &res, "2") {
        SyncOutcome::Patched { summary, .. } => assert_eq!(summary.retyped, 1),
        other => panic!("unexpected outcome {other:?}"),
    }
    let new = element(&g, PATH, "w3");
    assert_ne!(new, old);
    let ty = schema::type_of(&g, new).unwrap().unwrap();
    assert_eq!(g.string_property(ty, schema::NAME).unwrap().as_deref(), Some("Book"));
}

#[test]
fn reference_diff_moves_the_edge() {
    let (mut g, mut updater, lib) = setup(4);
    let mut res = shelf(&lib, 4);
    res.push(
        SimpleObject::new(Arc::clone(&lib.book), PATH, "b0")
            .with_reference("author", vec![ReferenceTarget::new("", "w0")]),
    );
    sync(&mut g, &mut updater, &res, "2");
    let b0 = element(&g, PATH, "b0");
    assert_eq!(targets(&g, b0, "author"), vec![element(&g, PATH, "w0")]);

    res.get_mut("b0")
        .unwrap()
        .set_reference("author", vec![ReferenceTarget::new("", "w1")]);
    match sync(&mut g, &mut updater, &res, "3") {
        SyncOutcome::Patched { summary, .. } => {
            assert_eq!(summary.references_added, 1);
            assert_eq!(summary.references_removed, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(targets(&g, b0, "author"), vec![element(&g, PATH, "w1")]);

    res.get_mut("b0").unwrap().set_reference("author", Vec::new());
    sync(&mut g, &mut updater, &res, "4");
    assert!(targets(&g, b0, "author").is_empty());
}

#[test]
fn dropped_local_reference_leaves_no_pending_proxy() {
    let (mut g, mut updater, lib) = setup(4);
    let mut res = shelf(&lib, 4);
    res.push(
        SimpleObject::new(Arc::clone(&lib.book), PATH, "b0")
            .with_reference("sequel", vec![ReferenceTarget::new("", "b1")]),
    );
    res.push(SimpleObject::new(Arc::clone(&lib.book), PATH, "b1"));
    sync(&mut g, &mut updater, &res, "2");
    let b0 = element(&g, PATH, "b0");
    assert_eq!(targets(&g, b0, "sequel"), vec![element(&g, PATH, "b1")]);

    res.remove("b1");
    res.get_mut("b0").unwrap().set_reference("sequel", Vec::new());
    match sync(&mut g, &mut updater, &res, "3") {
        SyncOutcome::Patched { summary, .. } => {
            assert_eq!((summary.updated, summary.deleted), (1, 1));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(updater.pending_proxies(&g).unwrap(), 0);

    res.push(SimpleObject::new(Arc::clone(&lib.book), PATH, "b1"));
    sync(&mut g, &mut updater, &res, "4");
    assert!(find_element(&g, PATH, "b1").is_some());
    assert!(targets(&g, b0, "sequel").is_empty());
}
