//! Observers notified of every graph mutation made while applying changes.

use crate::model::ClassKey;
use crate::types::NodeId;

/// Receives change notifications. Every method defaults to a no-op.
///
/// `transient` removals are part of a larger removal whose dependents are
/// going away too; observers should not react to them as edits.
#[allow(unused_variables)]
pub trait ChangeListener {
    /// A unit of change (one file, one metamodel operation) begins.
    fn change_start(&mut self) {}
    /// The unit of change committed.
    fn change_success(&mut self) {}
    /// The unit of change was rolled back.
    fn change_failure(&mut self) {}

    /// A package node was created.
    fn metamodel_added(&mut self, uri: &str, package: NodeId) {}
    /// A type node was created.
    fn class_added(&mut self, class: &ClassKey, type_node: NodeId) {}
    /// A file node was created.
    fn file_added(&mut self, file_key: &str, file: NodeId) {}
    /// A file node was deleted.
    fn file_removed(&mut self, file_key: &str, file: NodeId) {}

    /// An element node was created.
    fn element_added(&mut self, element: NodeId) {}
    /// An element node was deleted.
    fn element_removed(&mut self, element: NodeId, transient: bool) {}
    /// An attribute was set or changed.
    fn attribute_updated(&mut self, element: NodeId, attribute: &str) {}
    /// An attribute was unset.
    fn attribute_removed(&mut self, element: NodeId, attribute: &str) {}
    /// A reference edge was created.
    fn reference_added(&mut self, source: NodeId, target: NodeId, label: &str) {}
    /// A reference edge was removed.
    fn reference_removed(&mut self, source: NodeId, target: NodeId, label: &str) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ChangeListener for NoopListener {}

/// Fans notifications out to several listeners, in order.
#[derive(Default)]
pub struct CompositeListener<'a> {
    listeners: Vec<&'a mut dyn ChangeListener>,
}

impl<'a> CompositeListener<'a> {
    /// Composite with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Appends a listener; it is notified after those already present.
    pub fn push(&mut self, listener: &'a mut dyn ChangeListener) {
        self.listeners.push(listener);
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// True if there are no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl ChangeListener for CompositeListener<'_> {
    fn change_start(&mut self) {
        self.listeners.iter_mut().for_each(|l| l.change_start());
    }

    fn change_success(&mut self) {
        self.listeners.iter_mut().for_each(|l| l.change_success());
    }

    fn change_failure(&mut self) {
        self.listeners.iter_mut().for_each(|l| l.change_failure());
    }

    fn metamodel_added(&mut self, uri: &str, package: NodeId) {
        for l in &mut self.listeners {
            l.metamodel_added(uri, package);
        }
    }

    fn class_added(&mut self, class: &ClassKey, type_node: NodeId) {
        for l in &mut self.listeners {
            l.class_added(class, type_node);
        }
    }

    fn file_added(&mut self, file_key: &str, file: NodeId) {
        for l in &mut self.listeners {
            l.file_added(file_key, file);
        }
    }

    fn file_removed(&mut self, file_key: &str, file: NodeId) {
        for l in &mut self.listeners {
            l.file_removed(file_key, file);
        }
    }

    fn element_added(&mut self, element: NodeId) {
        for l in &mut self.listeners {
            l.element_added(element);
        }
    }

    fn element_removed(&mut self, element: NodeId, transient: bool) {
        for l in &mut self.listeners {
            l.element_removed(element, transient);
        }
    }

    fn attribute_updated(&mut self, element: NodeId, attribute: &str) {
        for l in &mut self.listeners {
            l.attribute_updated(element, attribute);
        }
    }

    fn attribute_removed(&mut self, element: NodeId, attribute: &str) {
        for l in &mut self.listeners {
            l.attribute_removed(element, attribute);
        }
    }

    fn reference_added(&mut self, source: NodeId, target: NodeId, label: &str) {
        for l in &mut self.listeners {
            l.reference_added(source, target, label);
        }
    }

    fn reference_removed(&mut self, source: NodeId, target: NodeId, label: &str) {
        for l in &mut self.listeners {
            l.reference_removed(source, target, label);
        }
    }
}
