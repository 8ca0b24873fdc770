//! Per-feature slot descriptors stored on type nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::error::{Result, SyncError};
use super::schema::SLOT_PREFIX;
use crate::graph::{GraphBackend, PropValue};
use crate::model::{AttributeDecl, ClassDescriptor, ReferenceDecl};
use crate::types::NodeId;

/// Slot descriptors of one type, keyed by feature name.
pub type SlotMap = BTreeMap<String, SlotDescriptor>;

/// What a feature of a metaclass holds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    /// Plain values stored as node properties.
    Attribute,
    /// Edges to other elements.
    Reference,
    /// Values held by derived attribute nodes.
    Derived,
    /// The name is declared both as an attribute and as a reference.
    Mixed,
}

impl SlotKind {
    /// True for slots stored as properties.
    pub fn holds_attribute(self) -> bool {
        matches!(self, SlotKind::Attribute | SlotKind::Mixed)
    }

    /// True for slots stored as edges.
    pub fn holds_reference(self) -> bool {
        matches!(self, SlotKind::Reference | SlotKind::Mixed)
    }
}

/// Derivation logic of a derived slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    /// Language the logic is written in.
    pub language: String,
    /// Expression handed to the evaluator.
    pub logic: String,
}

/// Per-feature metadata stored on a type node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDescriptor {
    /// Feature name.
    pub name: String,
    /// What the feature holds.
    pub kind: SlotKind,
    /// Holds a collection.
    pub many: bool,
    /// Collection order is significant.
    pub ordered: bool,
    /// Collection values are distinct.
    pub unique: bool,
    /// Value type name, or target class key for references.
    pub value_type: String,
    /// Set on derived slots only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation: Option<Derivation>,
    /// Values are mirrored into a per-attribute index.
    #[serde(default)]
    pub indexed: bool,
}

impl SlotDescriptor {
    /// Slot for a declared attribute.
    pub fn attribute(decl: &AttributeDecl) -> Self {
        let value_type = match &decl.value_type.package_uri {
            Some(pkg) => format!("{pkg}#{}", decl.value_type.name),
            None => decl.value_type.name.clone(),
        };
        Self {
            name: decl.name.clone(),
            kind: SlotKind::Attribute,
            many: decl.many,
            ordered: decl.ordered,
            unique: decl.unique,
            value_type,
            derivation: None,
            indexed: false,
        }
    }

    /// Slot for a declared reference.
    pub fn reference(decl: &ReferenceDecl) -> Self {
        Self {
            name: decl.name.clone(),
            kind: SlotKind::Reference,
            many: decl.many,
            ordered: decl.ordered,
            unique: decl.unique,
            value_type: decl.target.to_string(),
            derivation: None,
            indexed: false,
        }
    }

    /// Slot for a derived attribute.
    pub fn derived(
        name: impl Into<String>,
        many: bool,
        ordered: bool,
        unique: bool,
        value_type: impl Into<String>,
        derivation: Derivation,
    ) -> Self {
        Self {
            name: name.into(),
            kind: SlotKind::Derived,
            many,
            ordered,
            unique,
            value_type: value_type.into(),
            derivation: Some(derivation),
            indexed: false,
        }
    }

    /// Descriptors for every feature of `class`. A name declared as both an
    /// attribute and a reference becomes a single [`SlotKind::Mixed`] slot.
    pub fn for_class(class: &ClassDescriptor) -> SlotMap {
        let mut slots = SlotMap::new();
        for attr in &class.attributes {
            slots.insert(attr.name.clone(), SlotDescriptor::attribute(attr));
        }
        for reference in &class.references {
            match slots.get_mut(&reference.name) {
                Some(existing) => existing.kind = SlotKind::Mixed,
                None => {
                    slots.insert(reference.name.clone(), SlotDescriptor::reference(reference));
                }
            }
        }
        slots
    }

    fn property_key(name: &str) -> String {
        format!("{SLOT_PREFIX}{name}")
    }

    /// Stores this descriptor on `type_node`, replacing any previous one.
    pub fn write(&self, g: &mut dyn GraphBackend, type_node: NodeId) -> Result<()> {
        let encoded = serde_json::to_string(self)?;
        g.set_property(type_node, &Self::property_key(&self.name), PropValue::Str(encoded))?;
        Ok(())
    }

    /// Removes the descriptor for `name`. Returns false if there was none.
    pub fn remove(g: &mut dyn GraphBackend, type_node: NodeId, name: &str) -> Result<bool> {
        Ok(g
            .remove_property(type_node, &Self::property_key(name))?
            .is_some())
    }

    /// Reads one descriptor.
    pub fn read(g: &dyn GraphBackend, type_node: NodeId, name: &str) -> Result<Option<Self>> {
        match g.property(type_node, &Self::property_key(name))? {
            Some(value) => Ok(Some(Self::decode(type_node, name, &value)?)),
            None => Ok(None),
        }
    }

    /// Reads every descriptor stored on `type_node`.
    pub fn read_all(g: &dyn GraphBackend, type_node: NodeId) -> Result<SlotMap> {
        let mut slots = SlotMap::new();
        for key in g.property_keys(type_node)? {
            let Some(name) = key.strip_prefix(SLOT_PREFIX) else {
                continue;
            };
            if let Some(value) = g.property(type_node, &key)? {
                slots.insert(name.to_owned(), Self::decode(type_node, name, &value)?);
            }
        }
        Ok(slots)
    }

    fn decode(type_node: NodeId, name: &str, value: &PropValue) -> Result<Self> {
        let raw = value.as_str().ok_or_else(|| {
            SyncError::Corrupted(format!("slot {name} on type {type_node} is not a string"))
        })?;
        serde_json::from_str(raw).map_err(|err| {
            SyncError::Corrupted(format!("slot {name} on type {type_node}: {err}"))
        })
    }
}
