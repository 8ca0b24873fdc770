#![allow(missing_docs)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{init_tracing, item, Library};
use modelsync::graph::{Dir, GraphBackend, MemGraph, PropMap, PropValue};
use modelsync::model::simple::{SimpleObject, SimpleResource};
use modelsync::model::ReferenceTarget;
use modelsync::sync::listener::NoopListener;
use modelsync::sync::schema;
use modelsync::sync::{ChangeKind, FileChange, ModelUpdater, ProxyLedger, SyncOptions, SyncOutcome};
use proptest::prelude::*;

const PATH: &str = "/prop.model";

#[derive(Debug, Clone)]
struct BookSpec {
    name: String,
    tags: Vec<String>,
    sequel: Option<usize>,
}

fn arb_books() -> impl Strategy<Value = Vec<BookSpec>> {
    prop::collection::vec(
        (
            "[a-z]{1,8}",
            prop::collection::vec("[a-z]{1,5}", 0..3),
            prop::option::of(0usize..16),
        )
            .prop_map(|(name, tags, sequel)| BookSpec { name, tags, sequel }),
        1..16,
    )
}

fn resource(lib: &Library, books: &[BookSpec]) -> SimpleResource {
    let objects = books
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let mut obj = SimpleObject::new(Arc::clone(&lib.book), PATH, format!("b{i}"))
                .with_attribute("name", spec.name.as_str());
            if !spec.tags.is_empty() {
                obj.set_attribute("tags", PropValue::from(spec.tags.clone()));
            }
            if let Some(target) = spec.sequel.filter(|t| *t < books.len()) {
                obj.set_reference("sequel", vec![ReferenceTarget::new("", format!("b{target}"))]);
            }
            obj
        })
        .collect();
    SimpleResource::new(objects)
}

type Snapshot = BTreeSet<(String, Option<Vec<u8>>, Vec<(String, String)>)>;

fn snapshot(g: &MemGraph) -> Snapshot {
    let file = schema::find_file(g, &schema::file_key(common::REPO, PATH)).unwrap().unwrap();
    schema::elements_of_file(g, file)
        .unwrap()
        .into_iter()
        .map(|e| {
            let id = g.string_property(e, schema::IDENTIFIER).unwrap().unwrap();
            let mut edges: Vec<(String, String)> = g
                .edges(e, Dir::Out, None)
                .unwrap()
                .into_iter()
                .map(|edge| (edge.label, edge.dst.to_string()))
                .collect();
            edges.sort();
            let signature = g.property(e, schema::SIGNATURE).unwrap().and_then(|v| v.as_bytes().map(<[u8]>::to_vec));
            (id, signature, edges)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn resyncing_an_unchanged_file_changes_nothing(books in arb_books()) {
        init_tracing();
        let lib = Library::new();
        let mut g = MemGraph::new();
        let mut updater = ModelUpdater::default();
        updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
        let res = resource(&lib, &books);
        let first = item(PATH, "1", ChangeKind::Added);
        updater.apply_change_set(&mut g, &[FileChange::parsed(&first, &res)]).unwrap();
        let before = snapshot(&g);
        let counts = (g.node_count(), g.edge_count());

        let second = item(PATH, "2", ChangeKind::Modified);
        let mut report = updater.apply_change_set(&mut g, &[FileChange::parsed(&second, &res)]).unwrap();
        match report.changes.files.remove(0).result.unwrap() {
            SyncOutcome::Patched { ratio, summary } => {
                prop_assert_eq!(ratio, 0.0);
                prop_assert_eq!(summary.unchanged, books.len());
                prop_assert_eq!(summary.references_added + summary.references_removed, 0);
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
        prop_assert_eq!(snapshot(&g), before);
        prop_assert_eq!((g.node_count(), g.edge_count()), counts);
    }

    #[test]
    fn resolving_twice_creates_one_edge(calls in 1usize..5, containment in any::<bool>()) {
        let mut g = MemGraph::new();
        g.begin_tx().unwrap();
        let mut props = PropMap::new();
        props.insert(schema::IDENTIFIER.into(), PropValue::from("src"));
        let source = g.create_node(schema::ELEMENT, props).unwrap();
        let mut props = PropMap::new();
        props.insert(schema::IDENTIFIER.into(), PropValue::from("dst"));
        let target = g.create_node(schema::ELEMENT, props).unwrap();

        let ledger = ProxyLedger::new(&SyncOptions::default());
        let uri = schema::element_uri(&schema::file_key("r", schema::ANY_FILE), "dst");
        ledger.record_proxy(&mut g, source, &uri, "ref", containment, false).unwrap();

        let mut listener = NoopListener;
        let outcomes: Vec<bool> = (0..calls)
            .map(|_| ledger.resolve(&mut g, &mut listener, source, target, "ref", containment, false).unwrap())
            .collect();
        g.commit_tx().unwrap();

        prop_assert!(outcomes[0]);
        prop_assert!(outcomes[1..].iter().all(|created| !created));
        let edges = g.edges(source, Dir::Out, Some("ref")).unwrap();
        prop_assert_eq!(edges.len(), 1);
        prop_assert_eq!(edges[0].flag(schema::IS_CONTAINMENT), containment);
        prop_assert!(ProxyLedger::pending_lists(&g).unwrap().is_empty());
    }

    #[test]
    fn strategy_follows_the_ratio_threshold(stored in 2usize..12, changed_seed in 0usize..12) {
        init_tracing();
        let changed = changed_seed % (stored + 1);
        let lib = Library::new();
        let mut g = MemGraph::new();
        let mut updater = ModelUpdater::default();
        updater.register_metamodels(&mut g, &[lib.package()]).unwrap();
        let writers = |renamed: usize| {
            SimpleResource::new(
                (0..stored)
                    .map(|i| {
                        let name = if i < renamed { format!("renamed {i}") } else { format!("w {i}") };
                        SimpleObject::new(Arc::clone(&lib.writer), PATH, format!("w{i}")).with_attribute("name", name)
                    })
                    .collect(),
            )
        };
        let initial = writers(0);
        let first = item(PATH, "1", ChangeKind::Added);
        updater.apply_change_set(&mut g, &[FileChange::parsed(&first, &initial)]).unwrap();

        let next = writers(changed);
        let second = item(PATH, "2", ChangeKind::Modified);
        let mut report = updater.apply_change_set(&mut g, &[FileChange::parsed(&second, &next)]).unwrap();
        let outcome = report.changes.files.remove(0).result.unwrap();
        let ratio = changed as f64 / stored as f64;
        if ratio > 0.5 {
            prop_assert!(matches!(outcome, SyncOutcome::Replaced { .. }), "{:?}", outcome);
        } else {
            prop_assert!(matches!(outcome, SyncOutcome::Patched { .. }), "{:?}", outcome);
        }
    }
}
