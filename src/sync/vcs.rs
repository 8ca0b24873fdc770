//! Version-control change items fed into a synchronisation run.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::schema;
use crate::model::ModelResource;

/// What happened to a file in the version-control change being applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The file appeared in this revision.
    Added,
    /// The file's content changed.
    Modified,
    /// The file was removed.
    Deleted,
}

/// A file revision reported by change detection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VcsChangeItem {
    /// Repository URL.
    pub repository: String,
    /// Path of the file within the repository.
    pub path: String,
    /// Revision the change belongs to.
    pub revision: String,
    /// What happened to the file.
    pub kind: ChangeKind,
}

impl VcsChangeItem {
    /// Change item with `path` normalized.
    pub fn new(
        repository: impl Into<String>,
        path: impl Into<String>,
        revision: impl Into<String>,
        kind: ChangeKind,
    ) -> Self {
        Self {
            repository: repository.into(),
            path: schema::normalize_path(&path.into()),
            revision: revision.into(),
            kind,
        }
    }

    /// Key of the file in the file index.
    pub fn file_key(&self) -> String {
        schema::file_key(&self.repository, &self.path)
    }
}

impl fmt::Display for VcsChangeItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.file_key(), self.revision)
    }
}

/// A change item paired with its parsed resource.
///
/// `resource` is `None` when the file was deleted or could not be parsed;
/// either way its subgraph is removed.
#[derive(Clone, Copy)]
pub struct FileChange<'r> {
    /// Change being applied.
    pub item: &'r VcsChangeItem,
    /// Parsed content, if any.
    pub resource: Option<&'r dyn ModelResource>,
}

impl<'r> FileChange<'r> {
    /// A file whose parsed objects should be synchronised.
    pub fn parsed(item: &'r VcsChangeItem, resource: &'r dyn ModelResource) -> Self {
        Self {
            item,
            resource: Some(resource),
        }
    }

    /// A file to remove from the graph.
    pub fn removed(item: &'r VcsChangeItem) -> Self {
        Self {
            item,
            resource: None,
        }
    }
}
