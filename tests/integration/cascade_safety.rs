#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{element, find_element, init_tracing, item, targets, Library, REPO};
use modelsync::graph::{GraphBackend, MemGraph};
use modelsync::model::simple::{SimpleObject, SimpleResource};
use modelsync::model::ReferenceTarget;
use modelsync::sync::schema;
use modelsync::sync::{ChangeKind, FileChange, ModelUpdater, SyncOptions, SyncOutcome};

fn resource(lib: &Library, path: &str, local: &str) -> SimpleResource {
    SimpleResource::new(vec![
        SimpleObject::new(Arc::clone(&lib.writer), path, "shared")
            .with_attribute("name", "Anonymous")
            .fragment_unique(),
        SimpleObject::new(Arc::clone(&lib.book), path, local)
            .with_reference("author", vec![ReferenceTarget::new("", "shared")]),
    ])
    .with_singletons()
}

fn setup() -> (MemGraph, ModelUpdater, Library) {
    setup_with(SyncOptions::default())
}

fn setup_with(options: SyncOptions) -> (MemGraph, ModelUpdater, Library) {
    init_tracing();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::new(options);
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
    let a = resource(&lib, "/a.model", "a1");
    let b = resource(&lib, "/b.model", "b1");
    let item_a = item("/a.model", "1", ChangeKind::Added);
    let item_b = item("/b.model", "1", ChangeKind::Added);
    let report = updater
        .apply_change_set(&mut g, &[FileChange::parsed(&item_a, &a), FileChange::parsed(&item_b, &b)])
        .unwrap();
    assert!(report.success());
    (g, updater, lib)
}

#[test]
fn shared_element_has_one_node_and_two_files() {
    let (g, _, _) = setup();
    let shared = element(&g, "/a.model", "shared");
    assert_eq!(element(&g, "/b.model", "shared"), shared);
    assert_eq!(schema::files_of(&g, shared).unwrap().len(), 2);
    assert_eq!(targets(&g, element(&g, "/a.model", "a1"), "author"), vec![shared]);
    assert_eq!(targets(&g, element(&g, "/b.model", "b1"), "author"), vec![shared]);
}

#[test]
fn deleting_one_owner_keeps_the_shared_element() {
    let (mut g, mut updater, _) = setup();
    let shared = element(&g, "/a.model", "shared");
    let b1 = element(&g, "/b.model", "b1");

    let summary = updater.delete_file(&mut g, REPO, "/a.model").unwrap().unwrap();
    assert_eq!(summary.elements_deleted, 1);
    assert_eq!(summary.elements_kept, 1);
    assert!(g.contains_node(shared));
    let file_b = schema::find_file(&g, &schema::file_key(REPO, "/b.model")).unwrap().unwrap();
    assert_eq!(schema::files_of(&g, shared).unwrap(), vec![file_b]);
    assert_eq!(targets(&g, b1, "author"), vec![shared]);

    let summary = updater.delete_file(&mut g, REPO, "/b.model").unwrap().unwrap();
    assert_eq!(summary.elements_deleted, 2);
    assert!(!g.contains_node(shared));
    assert!(!g.contains_node(b1));
    assert!(g.index_get(schema::FRAGMENT_INDEX, schema::ID_KEY, "shared").unwrap().is_empty());
}

#[test]
fn dropping_the_shared_element_from_one_file_detaches_it() {
    for ratio in [0.5, 1.0] {
        let (mut g, mut updater, lib) = setup_with(SyncOptions::default().max_change_ratio(ratio));
        let shared = element(&g, "/a.model", "shared");

        let mut a = resource(&lib, "/a.model", "a1");
        a.remove("shared");
        a.get_mut("a1").unwrap().unset("author");
        let item_a = item("/a.model", "2", ChangeKind::Modified);
        let report = updater.apply_change_set(&mut g, &[FileChange::parsed(&item_a, &a)]).unwrap();
        match (&report.changes.files[0].result, ratio) {
            (Ok(SyncOutcome::Replaced { ratio, deletion, .. }), _) => {
                assert_eq!(*ratio, 1.0);
                assert_eq!(deletion.elements_kept, 1);
            }
            (Ok(SyncOutcome::Patched { summary, .. }), r) if r == 1.0 => {
                assert_eq!(summary.deleted, 1);
                assert_eq!(summary.updated, 1);
            }
            (other, _) => panic!("unexpected outcome {other:?}"),
        }

        assert!(g.contains_node(shared));
        assert_eq!(schema::files_of(&g, shared).unwrap().len(), 1);
        assert!(find_element(&g, "/a.model", "shared").is_none());
        assert_eq!(element(&g, "/b.model", "shared"), shared);
        assert!(targets(&g, element(&g, "/a.model", "a1"), "author").is_empty());
        assert_eq!(targets(&g, element(&g, "/b.model", "b1"), "author"), vec![shared]);
    }
}
