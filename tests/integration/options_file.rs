#![allow(missing_docs)]

mod common;

use std::fs;
use std::sync::Arc;

use common::{init_tracing, item, Library};
use modelsync::graph::MemGraph;
use modelsync::model::simple::{SimpleObject, SimpleResource};
use modelsync::sync::{ChangeKind, ConfigError, FileChange, ModelUpdater, SyncOptions, SyncOutcome};
use tempfile::tempdir;

#[test]
fn options_load_from_a_toml_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("modelsync.toml");
    fs::write(
        &path,
        "max_change_ratio = 0.25\nproxy_chunk_size = 2\nderived_chunk_size = 8\n",
    )
    .unwrap();

    let options = SyncOptions::load(&path).unwrap();
    assert_eq!(options.max_change_ratio, 0.25);
    assert_eq!(options.proxy_chunk_size, 2);
    assert_eq!(options.derived_chunk_size, 8);
    assert_eq!(options.progress_interval, SyncOptions::default().progress_interval);
}

#[test]
fn missing_and_invalid_files_are_reported() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(SyncOptions::load(&missing), Err(ConfigError::Read { .. })));

    let broken = dir.path().join("broken.toml");
    fs::write(&broken, "max_change_ratio = \"half\"\n").unwrap();
    assert!(matches!(SyncOptions::load(&broken), Err(ConfigError::Parse { .. })));

    let invalid = dir.path().join("invalid.toml");
    fs::write(&invalid, "proxy_chunk_size = 0\n").unwrap();
    assert!(matches!(
        SyncOptions::load(&invalid),
        Err(ConfigError::Invalid { field: "proxy_chunk_size", .. })
    ));
}

#[test]
fn loaded_ratio_drives_the_update_strategy() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("modelsync.toml");
    fs::write(&path, "max_change_ratio = 0.0\n").unwrap();
    let lib = Library::new();
    let mut g = MemGraph::new();
    let mut updater = ModelUpdater::new(SyncOptions::load(&path).unwrap());
    updater.register_metamodels(&mut g, &[lib.package()]).unwrap();

    let writers = |suffix: &str| {
        SimpleResource::new(
            (0..4)
                .map(|i| {
                    SimpleObject::new(Arc::clone(&lib.writer), "/w.model", format!("w{i}"))
                        .with_attribute("name", format!("{i}{suffix}"))
                })
                .collect(),
        )
    };
    let first = writers("");
    let it = item("/w.model", "1", ChangeKind::Added);
    updater.apply_change_set(&mut g, &[FileChange::parsed(&it, &first)]).unwrap();

    let mut second = writers("");
    second.get_mut("w0").unwrap().set_attribute("name", "changed");
    let it = item("/w.model", "2", ChangeKind::Modified);
    let report = updater.apply_change_set(&mut g, &[FileChange::parsed(&it, &second)]).unwrap();
    assert!(matches!(report.changes.files[0].result, Ok(SyncOutcome::Replaced { .. })));
}
