//! Orchestration of change sets: per-file synchronisation followed by the
//! proxy resolution and derivation fix-up phases.

use tracing::{debug, error, info, warn};

use super::deletion::{DeletionEngine, DeletionSummary};
use super::delta::{DeltaSynchronizer, SyncOutcome};
use super::derived::{DerivationEvaluator, DerivationRegistry, DerivationReport, DerivationScheduler, DirtyTracker};
use super::error::{Result, SyncError};
use super::listener::{ChangeListener, CompositeListener};
use super::metamodel::{DerivedAttributeSpec, MetamodelRegistrar, RegistrationReport, RemovalReport};
use super::options::SyncOptions;
use super::proxy::{ProxyLedger, ProxyResolutionReport};
use super::schema;
use super::type_cache::TypeCache;
use super::vcs::{ChangeKind, FileChange, VcsChangeItem};
use crate::graph::{GraphBackend, PropValue, Tx};
use crate::model::MetamodelPackage;
use crate::types::NodeId;

/// Result of synchronising one file.
#[derive(Debug)]
pub struct FileReport {
    /// Change item that was applied.
    pub item: VcsChangeItem,
    /// How the file was synchronised, or why it failed.
    pub result: Result<SyncOutcome>,
}

/// Result of [`ModelUpdater::update_store`].
#[derive(Debug, Default)]
pub struct ChangeSetReport {
    /// One entry per change item, in input order.
    pub files: Vec<FileReport>,
    /// Derived nodes marked dirty by the change set.
    pub dirtied: usize,
}

impl ChangeSetReport {
    /// True if every file was synchronised.
    pub fn success(&self) -> bool {
        self.files.iter().all(|file| file.result.is_ok())
    }

    /// Files whose synchronisation failed.
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|file| file.result.is_err())
    }
}

/// Result of [`ModelUpdater::update_proxies`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixupReport {
    /// Proxy resolution pass.
    pub proxies: ProxyResolutionReport,
    /// Derived nodes marked dirty by resolved references.
    pub dirtied: usize,
    /// Derivation pass.
    pub derived: DerivationReport,
}

/// Result of [`ModelUpdater::apply_change_set`].
#[derive(Debug)]
pub struct ApplyReport {
    /// Per-file results.
    pub changes: ChangeSetReport,
    /// Fix-up phase.
    pub fixup: FixupReport,
}

impl ApplyReport {
    /// True if every file was synchronised.
    pub fn success(&self) -> bool {
        self.changes.success()
    }
}

/// Applies metamodels and model changes to a graph.
///
/// Holds no graph state across calls apart from the type cache, which is
/// discarded after every fix-up phase.
pub struct ModelUpdater {
    options: SyncOptions,
    cache: TypeCache,
    tracker: DirtyTracker,
    registry: DerivationRegistry,
    listeners: Vec<Box<dyn ChangeListener>>,
}

impl Default for ModelUpdater {
    fn default() -> Self {
        Self::new(SyncOptions::default())
    }
}

impl ModelUpdater {
    /// Updater with no evaluators or listeners.
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            cache: TypeCache::new(),
            tracker: DirtyTracker::new(),
            registry: DerivationRegistry::new(),
            listeners: Vec::new(),
        }
    }

    /// Options this updater was built with.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Registers the evaluator for one derivation language, replacing any
    /// previous one.
    pub fn add_evaluator(&mut self, evaluator: Box<dyn DerivationEvaluator>) {
        self.registry.register(evaluator);
    }

    /// Adds a listener notified of every graph change made by this updater.
    pub fn add_listener(&mut self, listener: Box<dyn ChangeListener>) {
        self.listeners.push(listener);
    }

    /// Registers metamodel packages and their classes. See
    /// [`MetamodelRegistrar::register`].
    pub fn register_metamodels(
        &mut self,
        g: &mut dyn GraphBackend,
        packages: &[MetamodelPackage],
    ) -> Result<RegistrationReport> {
        let Self {
            options,
            cache,
            tracker,
            listeners,
            ..
        } = self;
        let mut listener = fan_out(tracker, listeners);
        MetamodelRegistrar::new(cache, &mut listener, options).register(g, packages)
    }

    /// Removes packages, their dependents and every element they type, then
    /// recomputes derived attributes that read the removed elements.
    pub fn remove_metamodels(
        &mut self,
        g: &mut dyn GraphBackend,
        uris: &[&str],
    ) -> Result<RemovalReport> {
        let report = {
            let Self {
                options,
                cache,
                tracker,
                listeners,
                ..
            } = self;
            let mut listener = fan_out(tracker, listeners);
            MetamodelRegistrar::new(cache, &mut listener, options).remove(g, uris)?
        };
        self.recompute(g)?;
        Ok(report)
    }

    /// Synchronises each file of a change set.
    ///
    /// A failing file is rolled back and reported; the remaining files are
    /// still applied. Fatal errors stop the change set.
    pub fn update_store(
        &mut self,
        g: &mut dyn GraphBackend,
        changes: &[FileChange<'_>],
    ) -> Result<ChangeSetReport> {
        let Self {
            options,
            cache,
            tracker,
            listeners,
            ..
        } = self;
        let mut report = ChangeSetReport::default();
        {
            let mut listener = fan_out(tracker, listeners);
            for change in changes {
                let item = change.item;
                listener.change_start();
                let result = match change.resource {
                    Some(resource) if item.kind != ChangeKind::Deleted => {
                        DeltaSynchronizer::new(cache, &mut listener, options)
                            .synchronize(g, item, resource)
                    }
                    _ => remove_file(g, &mut listener, options, &item.file_key())
                        .map(|summary| SyncOutcome::Deleted(summary.unwrap_or_default())),
                };
                match result {
                    Ok(outcome) => {
                        listener.change_success();
                        debug!(file = %item, "sync.update.file_done");
                        report.files.push(FileReport {
                            item: item.clone(),
                            result: Ok(outcome),
                        });
                    }
                    Err(err) if err.is_fatal() => {
                        listener.change_failure();
                        options.metrics.file_failed();
                        error!(file = %item, error = %err, "sync.update.fatal");
                        return Err(err);
                    }
                    Err(err) => {
                        listener.change_failure();
                        options.metrics.file_failed();
                        warn!(file = %item, error = %err, "sync.update.file_failed");
                        report.files.push(FileReport {
                            item: item.clone(),
                            result: Err(err),
                        });
                    }
                }
            }
        }
        report.dirtied = tracker.flush(g)?;
        info!(
            files = report.files.len(),
            failed = report.failures().count(),
            dirtied = report.dirtied,
            "sync.update.store"
        );
        Ok(report)
    }

    /// Resolves pending proxies, then evaluates every derived attribute that
    /// was never computed or was dirtied. Discards the type cache.
    pub fn update_proxies(&mut self, g: &mut dyn GraphBackend) -> Result<FixupReport> {
        let proxies = {
            let Self {
                options,
                tracker,
                listeners,
                ..
            } = self;
            let mut listener = fan_out(tracker, listeners);
            ProxyLedger::new(options).resolve_all(g, &mut listener)?
        };
        let (dirtied, derived) = self.recompute(g)?;
        self.cache.clear();
        Ok(FixupReport {
            proxies,
            dirtied,
            derived,
        })
    }

    /// [`update_store`](Self::update_store) followed by
    /// [`update_proxies`](Self::update_proxies).
    pub fn apply_change_set(
        &mut self,
        g: &mut dyn GraphBackend,
        changes: &[FileChange<'_>],
    ) -> Result<ApplyReport> {
        let changes = self.update_store(g, changes)?;
        let fixup = self.update_proxies(g)?;
        Ok(ApplyReport { changes, fixup })
    }

    /// Removes one file's subgraph. Returns `None` if the file is not stored.
    pub fn delete_file(
        &mut self,
        g: &mut dyn GraphBackend,
        repository: &str,
        path: &str,
    ) -> Result<Option<DeletionSummary>> {
        let key = schema::file_key(repository, path);
        let summary = {
            let Self {
                options,
                tracker,
                listeners,
                ..
            } = self;
            let mut listener = fan_out(tracker, listeners);
            listener.change_start();
            match remove_file(g, &mut listener, options, &key) {
                Ok(summary) => {
                    listener.change_success();
                    summary
                }
                Err(err) => {
                    listener.change_failure();
                    return Err(err);
                }
            }
        };
        self.recompute(g)?;
        Ok(summary)
    }

    /// Removes every file of a repository.
    pub fn delete_repository(
        &mut self,
        g: &mut dyn GraphBackend,
        repository: &str,
    ) -> Result<DeletionSummary> {
        let pattern = format!("{repository}{}*", schema::REPO_SEPARATOR);
        let mut keys = Vec::new();
        for file in g.index_query(schema::FILE_INDEX, schema::ID_KEY, &pattern)? {
            if let Some(key) = schema::key_of_file(g, file)? {
                keys.push(key);
            }
        }
        let mut total = DeletionSummary::default();
        {
            let Self {
                options,
                tracker,
                listeners,
                ..
            } = self;
            let mut listener = fan_out(tracker, listeners);
            for key in &keys {
                listener.change_start();
                match remove_file(g, &mut listener, options, key) {
                    Ok(summary) => {
                        listener.change_success();
                        total.absorb(summary.unwrap_or_default());
                    }
                    Err(err) => {
                        listener.change_failure();
                        return Err(err);
                    }
                }
            }
        }
        info!(repository = repository, files = keys.len(), elements = total.elements_deleted, "sync.update.repository_deleted");
        self.recompute(g)?;
        Ok(total)
    }

    /// Drops change items that the graph already reflects: added or modified
    /// files stored at the same revision, and deletions of files that are not
    /// stored.
    pub fn compare_with_local_files<'i>(
        &self,
        g: &dyn GraphBackend,
        items: &'i [VcsChangeItem],
    ) -> Result<Vec<&'i VcsChangeItem>> {
        let mut outdated = Vec::with_capacity(items.len());
        for item in items {
            let stored = match schema::find_file(g, &item.file_key())? {
                Some(file) => Some(g.string_property(file, schema::REVISION)?),
                None => None,
            };
            let keep = match (item.kind, stored) {
                (ChangeKind::Deleted, stored) => stored.is_some(),
                (_, Some(Some(revision))) => revision != item.revision,
                (_, _) => true,
            };
            if keep {
                outdated.push(item);
            }
        }
        Ok(outdated)
    }

    /// Declares a derived attribute and evaluates it on every instance.
    /// Returns the number of instances that received it.
    pub fn add_derived_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        spec: &DerivedAttributeSpec,
    ) -> Result<usize> {
        let count = {
            let Self {
                options,
                cache,
                tracker,
                listeners,
                ..
            } = self;
            let mut listener = fan_out(tracker, listeners);
            MetamodelRegistrar::new(cache, &mut listener, options).add_derived_attribute(g, spec)?
        };
        self.recompute(g)?;
        Ok(count)
    }

    /// Removes a derived attribute and its per-instance nodes. Returns
    /// `false` if the type declares no such derived attribute.
    pub fn remove_derived_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        package_uri: &str,
        type_name: &str,
        name: &str,
    ) -> Result<bool> {
        let Self {
            options,
            cache,
            tracker,
            listeners,
            ..
        } = self;
        let mut listener = fan_out(tracker, listeners);
        MetamodelRegistrar::new(cache, &mut listener, options)
            .remove_derived_attribute(g, package_uri, type_name, name)
    }

    /// Flags an attribute as indexed and indexes every existing instance.
    /// Returns the number of instances indexed.
    pub fn add_indexed_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        package_uri: &str,
        type_name: &str,
        attribute: &str,
    ) -> Result<usize> {
        let Self {
            options,
            cache,
            tracker,
            listeners,
            ..
        } = self;
        let mut listener = fan_out(tracker, listeners);
        MetamodelRegistrar::new(cache, &mut listener, options)
            .add_indexed_attribute(g, package_uri, type_name, attribute)
    }

    /// Unflags an indexed attribute and drops its index. Returns `false` if
    /// the attribute was not indexed.
    pub fn remove_indexed_attribute(
        &mut self,
        g: &mut dyn GraphBackend,
        package_uri: &str,
        type_name: &str,
        attribute: &str,
    ) -> Result<bool> {
        let Self {
            options,
            cache,
            tracker,
            listeners,
            ..
        } = self;
        let mut listener = fan_out(tracker, listeners);
        MetamodelRegistrar::new(cache, &mut listener, options)
            .remove_indexed_attribute(g, package_uri, type_name, attribute)
    }

    /// Names of the attribute indexes present in the graph.
    pub fn indexed_attributes(&self, g: &dyn GraphBackend) -> Vec<String> {
        g.index_names()
            .into_iter()
            .filter(|name| name.contains(schema::INDEX_NAME_SEPARATOR))
            .collect()
    }

    /// Stored value of a derived attribute, which may be the dirty sentinel.
    pub fn derived_value(
        &self,
        g: &dyn GraphBackend,
        element: NodeId,
        name: &str,
    ) -> Result<Option<PropValue>> {
        match super::batch::derived_node_of(g, element, name)? {
            Some(node) => Ok(g.property(node, schema::DERIVED_VALUE)?),
            None => Ok(None),
        }
    }

    /// Number of pending proxy lists.
    pub fn pending_proxies(&self, g: &dyn GraphBackend) -> Result<usize> {
        Ok(ProxyLedger::pending_lists(g)?.len())
    }

    fn recompute(&mut self, g: &mut dyn GraphBackend) -> Result<(usize, DerivationReport)> {
        let dirtied = self.tracker.flush(g)?;
        let derived = DerivationScheduler::new(&self.options).run(g, &mut self.registry)?;
        Ok((dirtied, derived))
    }
}

fn fan_out<'a>(
    tracker: &'a mut DirtyTracker,
    listeners: &'a mut [Box<dyn ChangeListener>],
) -> CompositeListener<'a> {
    let mut composite = CompositeListener::new();
    composite.push(tracker);
    for listener in listeners {
        composite.push(listener.as_mut());
    }
    composite
}

fn remove_file(
    g: &mut dyn GraphBackend,
    listener: &mut dyn ChangeListener,
    options: &SyncOptions,
    key: &str,
) -> Result<Option<DeletionSummary>> {
    let Some(file) = schema::find_file(g, key)? else {
        debug!(file = key, "sync.update.delete_missing");
        return Ok(None);
    };
    let mut tx = Tx::begin(&mut *g)?;
    let summary = DeletionEngine::new(ProxyLedger::new(options), listener)
        .delete_file(tx.graph(), file)
        .map_err(|err| SyncError::aborted(format!("delete {key}"), err))?;
    tx.commit()?;
    options.metrics.file_deleted();
    Ok(Some(summary))
}
