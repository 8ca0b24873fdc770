//! Graph vocabulary shared by the synchronisation components, plus the
//! handful of lookups every component needs.

use crate::graph::{Dir, GraphBackend, PropValue};
use crate::types::NodeId;

use super::error::Result;

// Node labels.
/// Model element.
pub const ELEMENT: &str = "element";
/// Model file.
pub const FILE: &str = "file";
/// Metaclass.
pub const TYPE: &str = "type";
/// Metamodel package.
pub const PACKAGE: &str = "package";
/// Per-instance derived value.
pub const DERIVED: &str = "derivedattribute";

// Structural edge labels. Reference edges use the feature name.
/// Element to its exact type.
pub const OF_TYPE: &str = "ofType";
/// Element to each supertype.
pub const OF_KIND: &str = "ofKind";
/// Element to every file containing it.
pub const FILE_EDGE: &str = "file";
/// Type to its package.
pub const PACKAGE_EDGE: &str = "package";
/// Package to each package it depends on.
pub const DEPENDS_ON: &str = "dependsOn";

// Node properties.
/// Fragment of an element, or URI of a package.
pub const IDENTIFIER: &str = "identifier";
/// Content hash of an element.
pub const SIGNATURE: &str = "signature";
/// Revision of a file.
pub const REVISION: &str = "revision";
/// Repository URL of a file.
pub const REPOSITORY: &str = "repository";
/// Normalized path of a file.
pub const PATH: &str = "path";
/// Name of a type.
pub const NAME: &str = "name";
/// Parser family of a package.
pub const KIND: &str = "kind";
/// Serialized form of a package.
pub const RESOURCE: &str = "resource";

// Derived attribute node properties.
/// Feature name.
pub const DERIVED_FEATURE: &str = "feature";
/// Last computed value.
pub const DERIVED_VALUE: &str = "value";
/// Derivation language copied from the slot.
pub const DERIVATION_LANGUAGE: &str = "derivationLanguage";
/// Derivation logic copied from the slot.
pub const DERIVATION_LOGIC: &str = "derivationLogic";
/// Derived value is a collection.
pub const DERIVED_MANY: &str = "many";
/// Derived collection is ordered.
pub const DERIVED_ORDERED: &str = "ordered";
/// Derived collection is unique.
pub const DERIVED_UNIQUE: &str = "unique";
/// Derived value type.
pub const DERIVED_VALUE_TYPE: &str = "valueType";

// Edge properties.
/// Reference edge is a containment.
pub const IS_CONTAINMENT: &str = "isContainment";
/// Reference edge is a container back-pointer.
pub const IS_CONTAINER: &str = "isContainer";
/// Edge from an element to one of its derived attribute nodes.
pub const IS_DERIVED: &str = "isDerived";

// Indexes and their keys.
/// File nodes by file key.
pub const FILE_INDEX: &str = "files";
/// Package nodes by URI.
pub const METAMODEL_INDEX: &str = "metamodels";
/// Fragment-unique elements.
pub const FRAGMENT_INDEX: &str = "fragments";
/// Nodes holding pending references, keyed by target file.
pub const PROXY_INDEX: &str = "proxies";
/// Resource roots.
pub const ROOT_INDEX: &str = "roots";
/// Derived nodes awaiting evaluation.
pub const DERIVED_PENDING_INDEX: &str = "derived-pending";
/// Elements read by derivations, keyed by element URI.
pub const DERIVED_ACCESS_INDEX: &str = "derived-access";
/// Key of the file, metamodel and fragment indexes.
pub const ID_KEY: &str = "id";
/// Key prefix of proxy index entries and proxy list properties.
pub const PROXY_KEY: &str = "proxyRef";
/// Key of the root index; values are file keys.
pub const ROOT_KEY: &str = "file";
/// Key of the dirty-derived index.
pub const PENDING_KEY: &str = "derived";
/// Value stored under [`PENDING_KEY`] for dirty derived nodes.
pub const PENDING_VALUE: &str = "_";
/// Access index property meaning "any property of the element".
pub const WILDCARD_PROPERTY: &str = "*";

/// Separates repository and path in file keys.
pub const REPO_SEPARATOR: &str = "||||";
/// Path used in file keys of fragment-addressed targets.
pub const ANY_FILE: &str = "*";
/// Prefix of node properties holding proxy reference lists.
pub const PROXY_PREFIX: &str = "proxyRef:";
/// Prefix of type node properties holding slot descriptors.
pub const SLOT_PREFIX: &str = "slot:";
/// Prefix of the dirty sentinel stored in stale derived values.
pub const DIRTY_PREFIX: &str = "_NYD##";
/// Separator in indexed attribute index names.
pub const INDEX_NAME_SEPARATOR: &str = "##";

/// Ensures repository-relative paths start with `/`.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// Key of a file within the file index.
pub fn file_key(repository: &str, path: &str) -> String {
    if path == ANY_FILE {
        return format!("{repository}{REPO_SEPARATOR}{ANY_FILE}");
    }
    format!("{repository}{REPO_SEPARATOR}{}", normalize_path(path))
}

/// URI of an element: its file key and fragment.
pub fn element_uri(file_key: &str, fragment: &str) -> String {
    format!("{file_key}#{fragment}")
}

/// Splits an element URI into file key and fragment.
///
/// The fragment starts at the first `#` after the repository separator.
pub fn split_element_uri(uri: &str) -> Option<(&str, &str)> {
    let sep = uri.find(REPO_SEPARATOR)? + REPO_SEPARATOR.len();
    let hash = sep + uri[sep..].find('#')?;
    Some((&uri[..hash], &uri[hash + 1..]))
}

/// Returns true when a file key addresses targets by fragment only.
pub fn is_fragment_key(file_key: &str) -> bool {
    file_key.ends_with(&format!("{REPO_SEPARATOR}{ANY_FILE}"))
}

/// Repository part of a file key.
pub fn repository_of(file_key: &str) -> &str {
    file_key
        .split_once(REPO_SEPARATOR)
        .map_or(file_key, |(repo, _)| repo)
}

/// Name of the index holding values of an indexed attribute.
pub fn attribute_index_name(package_uri: &str, type_name: &str, attribute: &str) -> String {
    format!("{package_uri}{INDEX_NAME_SEPARATOR}{type_name}{INDEX_NAME_SEPARATOR}{attribute}")
}

/// Sentinel stored in a derived value that needs recomputation.
pub fn dirty_sentinel(logic: &str) -> PropValue {
    PropValue::Str(format!("{DIRTY_PREFIX}{logic}"))
}

/// Returns true if `value` is a dirty sentinel.
pub fn is_dirty(value: &PropValue) -> bool {
    value.as_str().is_some_and(|s| s.starts_with(DIRTY_PREFIX))
}

/// File node registered under `key`.
pub fn find_file(g: &dyn GraphBackend, key: &str) -> Result<Option<NodeId>> {
    Ok(g.index_get(FILE_INDEX, ID_KEY, key)?.into_iter().next())
}

/// Key of a file node.
pub fn key_of_file(g: &dyn GraphBackend, file: NodeId) -> Result<Option<String>> {
    Ok(g.string_property(file, IDENTIFIER)?)
}

/// Elements owned by `file`.
pub fn elements_of_file(g: &dyn GraphBackend, file: NodeId) -> Result<Vec<NodeId>> {
    Ok(g
        .edges(file, Dir::In, Some(FILE_EDGE))?
        .into_iter()
        .map(|edge| edge.src)
        .collect())
}

/// Files that own `element`.
pub fn files_of(g: &dyn GraphBackend, element: NodeId) -> Result<Vec<NodeId>> {
    Ok(g
        .edges(element, Dir::Out, Some(FILE_EDGE))?
        .into_iter()
        .map(|edge| edge.dst)
        .collect())
}

/// Exact type node of `element`.
pub fn type_of(g: &dyn GraphBackend, element: NodeId) -> Result<Option<NodeId>> {
    Ok(g
        .edges(element, Dir::Out, Some(OF_TYPE))?
        .into_iter()
        .next()
        .map(|edge| edge.dst))
}

/// Package node registered under `uri`.
pub fn find_package(g: &dyn GraphBackend, uri: &str) -> Result<Option<NodeId>> {
    Ok(g.index_get(METAMODEL_INDEX, ID_KEY, uri)?.into_iter().next())
}

/// Type node named `name` inside package node `package`.
pub fn find_type_in(g: &dyn GraphBackend, package: NodeId, name: &str) -> Result<Option<NodeId>> {
    for edge in g.edges(package, Dir::In, Some(PACKAGE_EDGE))? {
        if g.string_property(edge.src, NAME)?.as_deref() == Some(name) {
            return Ok(Some(edge.src));
        }
    }
    Ok(None)
}
