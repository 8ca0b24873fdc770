//! Cascading removal of elements and files.
//!
//! Removal order is fixed: detach from the file, dereference outgoing edges,
//! turn surviving incoming references into proxies, then delete the node.

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use super::error::{Result, SyncError};
use super::listener::ChangeListener;
use super::proxy::ProxyLedger;
use super::schema::{self, FILE_EDGE, OF_KIND, OF_TYPE};
use crate::graph::{Dir, GraphBackend};
use crate::types::NodeId;

/// Counts of what a deletion removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeletionSummary {
    /// Element nodes deleted.
    pub elements_deleted: usize,
    /// Shared elements kept because another file still owns them.
    pub elements_kept: usize,
    /// Derived attribute nodes deleted.
    pub derived_deleted: usize,
    /// Incoming references turned into pending proxies.
    pub proxies_created: usize,
}

impl DeletionSummary {
    pub(crate) fn absorb(&mut self, other: DeletionSummary) {
        self.elements_deleted += other.elements_deleted;
        self.elements_kept += other.elements_kept;
        self.derived_deleted += other.derived_deleted;
        self.proxies_created += other.proxies_created;
    }
}

/// Removes elements, their derived attributes and their files.
///
/// Every method must run inside a transaction or bulk session opened by the
/// caller; a failure leaves the rollback to that caller.
pub struct DeletionEngine<'l> {
    ledger: ProxyLedger,
    listener: &'l mut dyn ChangeListener,
}

impl<'l> DeletionEngine<'l> {
    /// Engine recording proxies through `ledger`.
    pub fn new(ledger: ProxyLedger, listener: &'l mut dyn ChangeListener) -> Self {
        Self { ledger, listener }
    }

    /// Deletes a file node and every element only it owns.
    pub fn delete_file(&mut self, g: &mut dyn GraphBackend, file: NodeId) -> Result<DeletionSummary> {
        let file_key = schema::key_of_file(g, file)?
            .ok_or_else(|| SyncError::Corrupted(format!("file node {file} has no key")))?;
        let elements = schema::elements_of_file(g, file)?;
        let mut summary = DeletionSummary::default();

        for &element in &elements {
            self.detach(g, element, file)?;
        }
        let mut orphans = Vec::with_capacity(elements.len());
        for &element in &elements {
            if schema::files_of(g, element)?.is_empty() {
                orphans.push(element);
            } else {
                summary.elements_kept += 1;
            }
        }
        let doomed: FxHashSet<NodeId> = orphans.iter().copied().collect();
        for &element in &orphans {
            summary.derived_deleted += self.dereference(g, element)?;
        }
        for &element in &orphans {
            summary.proxies_created += self.make_proxy_refs(g, element, &file_key, &doomed)?;
        }
        for &element in &orphans {
            self.delete_detached(g, element)?;
            summary.elements_deleted += 1;
        }

        g.remove_from_all_indexes(file)?;
        g.delete_node(file)?;
        self.listener.file_removed(&file_key, file);
        debug!(
            file = %file_key,
            deleted = summary.elements_deleted,
            kept = summary.elements_kept,
            proxies = summary.proxies_created,
            "sync.delete.file"
        );
        Ok(summary)
    }

    /// Deletes several files, summing their summaries.
    pub fn delete_files(
        &mut self,
        g: &mut dyn GraphBackend,
        files: &[NodeId],
    ) -> Result<DeletionSummary> {
        let mut total = DeletionSummary::default();
        for &file in files {
            total.absorb(self.delete_file(g, file)?);
        }
        Ok(total)
    }

    /// Detaches `element` from `file` and deletes it if no other file owns it.
    ///
    /// Returns true if the element was deleted.
    pub fn remove_element(
        &mut self,
        g: &mut dyn GraphBackend,
        element: NodeId,
        file: NodeId,
    ) -> Result<bool> {
        let file_key = schema::key_of_file(g, file)?
            .ok_or_else(|| SyncError::Corrupted(format!("file node {file} has no key")))?;
        self.detach(g, element, file)?;
        if !schema::files_of(g, element)?.is_empty() {
            trace!(element = element.0, "sync.delete.element_kept");
            return Ok(false);
        }
        let doomed: FxHashSet<NodeId> = std::iter::once(element).collect();
        self.dereference(g, element)?;
        self.make_proxy_refs(g, element, &file_key, &doomed)?;
        self.delete_detached(g, element)?;
        Ok(true)
    }

    /// Deletes a batch of elements regardless of which files own them.
    ///
    /// Returns the files the elements were attached to.
    pub fn purge_elements(
        &mut self,
        g: &mut dyn GraphBackend,
        elements: &[NodeId],
    ) -> Result<(DeletionSummary, Vec<NodeId>)> {
        let mut summary = DeletionSummary::default();
        let mut files = Vec::new();
        let mut origins = Vec::with_capacity(elements.len());
        for &element in elements {
            let owners = schema::files_of(g, element)?;
            let origin = match owners.first() {
                Some(&file) => schema::key_of_file(g, file)?.unwrap_or_default(),
                None => String::new(),
            };
            for &file in &owners {
                self.detach(g, element, file)?;
                if !files.contains(&file) {
                    files.push(file);
                }
            }
            origins.push(origin);
        }
        let doomed: FxHashSet<NodeId> = elements.iter().copied().collect();
        for &element in elements {
            summary.derived_deleted += self.dereference(g, element)?;
        }
        for (&element, origin) in elements.iter().zip(&origins) {
            if !origin.is_empty() {
                summary.proxies_created += self.make_proxy_refs(g, element, origin, &doomed)?;
            }
        }
        for &element in elements {
            self.delete_detached(g, element)?;
        }
        summary.elements_deleted += elements.len();
        Ok((summary, files))
    }

    fn detach(&mut self, g: &mut dyn GraphBackend, element: NodeId, file: NodeId) -> Result<()> {
        for edge in g.edges(element, Dir::Out, Some(FILE_EDGE))? {
            if edge.dst == file {
                g.delete_edge(edge.id)?;
            }
        }
        Ok(())
    }

    /// Deletes every outgoing edge of `element` and the derived attribute
    /// nodes hanging off it. Returns the number of derived nodes deleted.
    pub fn dereference(&mut self, g: &mut dyn GraphBackend, element: NodeId) -> Result<usize> {
        let mut derived = 0;
        for edge in g.edges(element, Dir::Out, None)? {
            g.delete_edge(edge.id)?;
            if edge.flag(schema::IS_DERIVED) {
                self.delete_derived_node(g, edge.dst)?;
                derived += 1;
            } else if !is_structural(&edge.label) {
                self.listener.reference_removed(element, edge.dst, &edge.label);
            }
        }
        Ok(derived)
    }

    /// Replaces incoming references from surviving sources with pending
    /// proxies to `element`, and drops the ones coming from `doomed` nodes.
    pub fn make_proxy_refs(
        &mut self,
        g: &mut dyn GraphBackend,
        element: NodeId,
        origin_file_key: &str,
        doomed: &FxHashSet<NodeId>,
    ) -> Result<usize> {
        let identifier = g
            .string_property(element, schema::IDENTIFIER)?
            .unwrap_or_default();
        let by_fragment = !g.index_entries(schema::FRAGMENT_INDEX, element)?.is_empty();
        let target_key = if by_fragment {
            schema::file_key(schema::repository_of(origin_file_key), schema::ANY_FILE)
        } else {
            origin_file_key.to_owned()
        };
        let target_uri = schema::element_uri(&target_key, &identifier);
        let mut created = 0;
        for edge in g.edges(element, Dir::In, None)? {
            g.delete_edge(edge.id)?;
            if edge.src == element || doomed.contains(&edge.src) {
                continue;
            }
            self.listener.reference_removed(edge.src, element, &edge.label);
            if schema::files_of(g, edge.src)?.is_empty() {
                continue;
            }
            self.ledger.record_proxy(
                g,
                edge.src,
                &target_uri,
                &edge.label,
                edge.flag(schema::IS_CONTAINMENT),
                edge.flag(schema::IS_CONTAINER),
            )?;
            created += 1;
        }
        Ok(created)
    }

    /// Deletes a derived attribute node with its edges and index entries.
    pub fn delete_derived_node(&mut self, g: &mut dyn GraphBackend, derived: NodeId) -> Result<()> {
        for edge in g.edges(derived, Dir::Both, None)? {
            g.delete_edge(edge.id)?;
        }
        self.listener.element_removed(derived, true);
        g.remove_from_all_indexes(derived)?;
        g.delete_node(derived)?;
        Ok(())
    }

    fn delete_detached(&mut self, g: &mut dyn GraphBackend, element: NodeId) -> Result<()> {
        self.listener.element_removed(element, false);
        ProxyLedger::clear(g, element)?;
        g.remove_from_all_indexes(element)?;
        g.delete_node(element)?;
        Ok(())
    }
}

fn is_structural(label: &str) -> bool {
    matches!(label, OF_TYPE | OF_KIND | FILE_EDGE)
}
