//! Pending cross-resource references.
//!
//! A reference whose target is not in the graph yet is kept on its source
//! node as a JSON list under `proxyRef:<target file key>`, and the source is
//! registered in the proxy index under that file key. Fragment-addressed
//! targets use the `<repository>||||*` key and are looked up in the global
//! fragment index instead of by scanning a file.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{Result, SyncError};
use super::listener::ChangeListener;
use super::metrics::SyncMetrics;
use super::options::SyncOptions;
use super::schema::{self, PROXY_INDEX, PROXY_KEY, PROXY_PREFIX};
use crate::graph::{Dir, GraphBackend, PropMap, PropValue, Tx};
use crate::types::NodeId;

/// One pending reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyReference {
    /// Element URI of the target (`<file key>#<fragment>`).
    pub target: String,
    /// Label of the edge to create.
    pub label: String,
    /// Edge is a containment.
    pub containment: bool,
    /// Edge is a container back-pointer.
    pub container: bool,
}

/// Outcome of a resolution pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProxyResolutionReport {
    /// Edges materialised.
    pub resolved: usize,
    /// Pending references dropped because their edge already existed.
    pub duplicates: usize,
    /// Lists still pending after the pass.
    pub remaining_lists: usize,
    /// Chunks rolled back.
    pub failed_chunks: usize,
}

/// Records and resolves pending references.
#[derive(Clone)]
pub struct ProxyLedger {
    chunk_size: usize,
    progress_interval: usize,
    metrics: Arc<dyn SyncMetrics>,
}

impl ProxyLedger {
    /// Ledger using the configured chunk size, progress interval and metrics.
    pub fn new(options: &SyncOptions) -> Self {
        Self {
            chunk_size: options.proxy_chunk_size.max(1),
            progress_interval: options.progress_interval.max(1),
            metrics: Arc::clone(&options.metrics),
        }
    }

    fn property_key(file_key: &str) -> String {
        format!("{PROXY_PREFIX}{file_key}")
    }

    /// Appends a pending reference from `source` to the element at `target_uri`.
    pub fn record_proxy(
        &self,
        g: &mut dyn GraphBackend,
        source: NodeId,
        target_uri: &str,
        label: &str,
        containment: bool,
        container: bool,
    ) -> Result<()> {
        let (file_key, _) = schema::split_element_uri(target_uri).ok_or_else(|| {
            SyncError::Corrupted(format!("malformed element uri {target_uri}"))
        })?;
        let mut list = Self::pending(g, source, file_key)?;
        let entry = ProxyReference {
            target: target_uri.to_owned(),
            label: label.to_owned(),
            containment,
            container,
        };
        if list.contains(&entry) {
            return Ok(());
        }
        list.push(entry);
        Self::write_list(g, source, file_key, &list)?;
        self.metrics.proxy_recorded();
        debug!(source = source.0, target = target_uri, label, "sync.proxy.recorded");
        Ok(())
    }

    /// Pending references from `source` into the file `file_key`.
    pub fn pending(
        g: &dyn GraphBackend,
        source: NodeId,
        file_key: &str,
    ) -> Result<Vec<ProxyReference>> {
        match g.property(source, &Self::property_key(file_key))? {
            Some(PropValue::Str(raw)) => Ok(serde_json::from_str(&raw)?),
            Some(_) => Err(SyncError::Corrupted(format!(
                "proxy list {file_key} on {source} is not a string"
            ))),
            None => Ok(Vec::new()),
        }
    }

    /// File keys for which `source` has pending references.
    pub fn pending_file_keys(g: &dyn GraphBackend, source: NodeId) -> Result<Vec<String>> {
        Ok(g
            .index_entries(PROXY_INDEX, source)?
            .into_iter()
            .map(|(_, file_key)| file_key)
            .collect())
    }

    /// Nodes with pending references into `file_key`.
    pub fn pending_for_file(g: &dyn GraphBackend, file_key: &str) -> Result<Vec<NodeId>> {
        Ok(g.index_get(PROXY_INDEX, PROXY_KEY, file_key)?)
    }

    /// Every `(source, target file key)` list in the graph.
    pub fn pending_lists(g: &dyn GraphBackend) -> Result<Vec<(NodeId, String)>> {
        let mut lists = Vec::new();
        for source in g.index_query(PROXY_INDEX, PROXY_KEY, "*")? {
            for file_key in Self::pending_file_keys(g, source)? {
                lists.push((source, file_key));
            }
        }
        Ok(lists)
    }

    /// Drops every pending list held by `source`. Returns how many were dropped.
    pub fn clear(g: &mut dyn GraphBackend, source: NodeId) -> Result<usize> {
        let keys = Self::pending_file_keys(g, source)?;
        for file_key in &keys {
            g.remove_property(source, &Self::property_key(file_key))?;
        }
        g.index_remove(PROXY_INDEX, source, None)?;
        Ok(keys.len())
    }

    fn write_list(
        g: &mut dyn GraphBackend,
        source: NodeId,
        file_key: &str,
        list: &[ProxyReference],
    ) -> Result<()> {
        let key = Self::property_key(file_key);
        if list.is_empty() {
            g.remove_property(source, &key)?;
            g.index_remove(PROXY_INDEX, source, Some((PROXY_KEY, file_key)))?;
        } else {
            g.set_property(source, &key, PropValue::Str(serde_json::to_string(list)?))?;
            g.index_add(PROXY_INDEX, source, PROXY_KEY, file_key)?;
        }
        Ok(())
    }

    /// Materialises `source -label-> target` unless such an edge already
    /// exists, and drops the matching pending reference either way.
    ///
    /// Returns false for a duplicate.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        &self,
        g: &mut dyn GraphBackend,
        listener: &mut dyn ChangeListener,
        source: NodeId,
        target: NodeId,
        label: &str,
        containment: bool,
        container: bool,
    ) -> Result<bool> {
        let identifier = g.string_property(target, schema::IDENTIFIER)?;
        let mut target_keys = Vec::new();
        for file in schema::files_of(g, target)? {
            if let Some(key) = schema::key_of_file(g, file)? {
                target_keys.push(key);
            }
        }
        for file_key in Self::pending_file_keys(g, source)? {
            let list = Self::pending(g, source, &file_key)?;
            let before = list.len();
            let kept: Vec<ProxyReference> = list
                .into_iter()
                .filter(|entry| {
                    entry.label != label
                        || !refers_to(&entry.target, identifier.as_deref(), &target_keys)
                })
                .collect();
            if kept.len() != before {
                Self::write_list(g, source, &file_key, &kept)?;
            }
        }
        let entry = ProxyReference {
            target: String::new(),
            label: label.to_owned(),
            containment,
            container,
        };
        self.link(g, listener, source, target, &entry)
    }

    fn link(
        &self,
        g: &mut dyn GraphBackend,
        listener: &mut dyn ChangeListener,
        source: NodeId,
        target: NodeId,
        entry: &ProxyReference,
    ) -> Result<bool> {
        let exists = g
            .edges(source, Dir::Out, Some(&entry.label))?
            .iter()
            .any(|edge| edge.dst == target);
        if exists {
            let conflict = SyncError::ProxyResolutionConflict {
                from: source,
                to: target,
                label: entry.label.clone(),
            };
            debug!(error = %conflict, "sync.proxy.duplicate");
            return Ok(false);
        }
        let mut props = PropMap::new();
        if entry.containment {
            props.insert(schema::IS_CONTAINMENT.into(), PropValue::Bool(true));
        }
        if entry.container {
            props.insert(schema::IS_CONTAINER.into(), PropValue::Bool(true));
        }
        g.create_edge(source, target, &entry.label, props)?;
        listener.reference_added(source, target, &entry.label);
        self.metrics.proxy_resolved();
        Ok(true)
    }

    /// Resolves every pending list whose targets are now in the graph.
    ///
    /// Lists are processed in chunks, one transaction per chunk. A failed
    /// chunk is rolled back and skipped; earlier chunks stay committed.
    pub fn resolve_all(
        &self,
        g: &mut dyn GraphBackend,
        listener: &mut dyn ChangeListener,
    ) -> Result<ProxyResolutionReport> {
        let lists = Self::pending_lists(g)?;
        let total = lists.len();
        let mut report = ProxyResolutionReport::default();
        let mut processed = 0usize;
        for chunk in lists.chunks(self.chunk_size) {
            listener.change_start();
            let mut tx = Tx::begin(&mut *g)?;
            let mut local = ProxyResolutionReport::default();
            match self.resolve_chunk(tx.graph(), listener, chunk, &mut local) {
                Ok(()) => {
                    tx.commit()?;
                    listener.change_success();
                    report.resolved += local.resolved;
                    report.duplicates += local.duplicates;
                }
                Err(err) => {
                    drop(tx);
                    listener.change_failure();
                    if err.is_fatal() {
                        return Err(err);
                    }
                    warn!(error = %err, lists = chunk.len(), "sync.proxy.chunk_failed");
                    report.failed_chunks += 1;
                }
            }
            let before = processed;
            processed += chunk.len();
            if before / self.progress_interval != processed / self.progress_interval {
                info!(processed, total, "sync.proxy.progress");
            }
        }
        report.remaining_lists = Self::pending_lists(g)?.len();
        info!(
            resolved = report.resolved,
            duplicates = report.duplicates,
            remaining = report.remaining_lists,
            failed_chunks = report.failed_chunks,
            "sync.proxy.resolved"
        );
        Ok(report)
    }

    fn resolve_chunk(
        &self,
        g: &mut dyn GraphBackend,
        listener: &mut dyn ChangeListener,
        chunk: &[(NodeId, String)],
        report: &mut ProxyResolutionReport,
    ) -> Result<()> {
        let mut files: FxHashMap<String, Option<FxHashMap<String, NodeId>>> =
            FxHashMap::default();
        for (source, file_key) in chunk {
            if !g.contains_node(*source) {
                continue;
            }
            let list = Self::pending(g, *source, file_key)?;
            let mut kept = Vec::with_capacity(list.len());
            for entry in list {
                let target = match schema::split_element_uri(&entry.target) {
                    Some((_, fragment)) if schema::is_fragment_key(file_key) => g
                        .index_get(schema::FRAGMENT_INDEX, schema::ID_KEY, fragment)?
                        .into_iter()
                        .next(),
                    Some((_, fragment)) => {
                        if !files.contains_key(file_key) {
                            let lookup = file_lookup(g, file_key)?;
                            files.insert(file_key.clone(), lookup);
                        }
                        files
                            .get(file_key)
                            .and_then(Option::as_ref)
                            .and_then(|lookup| lookup.get(fragment).copied())
                    }
                    None => None,
                };
                match target {
                    Some(target) => {
                        if self.link(g, listener, *source, target, &entry)? {
                            report.resolved += 1;
                        } else {
                            report.duplicates += 1;
                        }
                    }
                    None => kept.push(entry),
                }
            }
            Self::write_list(g, *source, file_key, &kept)?;
        }
        Ok(())
    }
}

/// Fragment-to-node map of a file's elements, or `None` if the file is not
/// indexed.
fn file_lookup(
    g: &dyn GraphBackend,
    file_key: &str,
) -> Result<Option<FxHashMap<String, NodeId>>> {
    let Some(file) = schema::find_file(g, file_key)? else {
        return Ok(None);
    };
    let mut lookup = FxHashMap::default();
    for element in schema::elements_of_file(g, file)? {
        if let Some(id) = g.string_property(element, schema::IDENTIFIER)? {
            lookup.insert(id, element);
        }
    }
    Ok(Some(lookup))
}

fn refers_to(uri: &str, identifier: Option<&str>, target_keys: &[String]) -> bool {
    let Some((file_key, fragment)) = schema::split_element_uri(uri) else {
        return false;
    };
    identifier == Some(fragment)
        && (schema::is_fragment_key(file_key) || target_keys.iter().any(|k| k == file_key))
}
