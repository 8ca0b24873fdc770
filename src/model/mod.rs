//! Model object capability consumed by the synchronisation engine.
//!
//! Parsers live outside this crate; they hand the engine resources of
//! [`ModelObject`]s typed by [`ClassDescriptor`]s. [`simple`] provides a plain
//! in-memory implementation.

pub mod simple;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::PropValue;

/// Fully qualified metaclass name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassKey {
    /// Namespace URI of the owning package.
    pub package_uri: String,
    /// Class name, unique within the package.
    pub name: String,
}

impl ClassKey {
    /// Builds a key from its parts.
    pub fn new(package_uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package_uri: package_uri.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.package_uri, self.name)
    }
}

/// Type of an attribute value. Built-in primitives carry no package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueType {
    /// Package declaring the data type, if it is not a built-in primitive.
    pub package_uri: Option<String>,
    /// Type name, e.g. `String` or `Int`.
    pub name: String,
}

impl ValueType {
    /// A built-in primitive type.
    pub fn primitive(name: impl Into<String>) -> Self {
        Self {
            package_uri: None,
            name: name.into(),
        }
    }

    /// A data type declared in a metamodel package.
    pub fn declared(package_uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package_uri: Some(package_uri.into()),
            name: name.into(),
        }
    }
}

/// Attribute declared on a metaclass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDecl {
    /// Feature name.
    pub name: String,
    /// Holds a collection of values.
    pub many: bool,
    /// Collection order is significant.
    pub ordered: bool,
    /// Collection values are distinct.
    pub unique: bool,
    /// Type of each value.
    pub value_type: ValueType,
}

impl AttributeDecl {
    /// Single-valued attribute of a primitive type.
    pub fn single(name: impl Into<String>, type_name: &str) -> Self {
        Self {
            name: name.into(),
            many: false,
            ordered: false,
            unique: false,
            value_type: ValueType::primitive(type_name),
        }
    }

    /// Many-valued, ordered attribute of a primitive type.
    pub fn many(name: impl Into<String>, type_name: &str) -> Self {
        Self {
            many: true,
            ordered: true,
            ..Self::single(name, type_name)
        }
    }

    /// Replaces the value type.
    pub fn typed(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }
}

/// Reference declared on a metaclass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceDecl {
    /// Feature name.
    pub name: String,
    /// Holds several targets.
    pub many: bool,
    /// Target order is significant.
    pub ordered: bool,
    /// Targets are distinct.
    pub unique: bool,
    /// The reference owns its targets.
    pub containment: bool,
    /// The reference is the opposite of a containment.
    pub container: bool,
    /// Declared target class.
    pub target: ClassKey,
}

impl ReferenceDecl {
    /// Single-valued associative reference.
    pub fn new(name: impl Into<String>, target: ClassKey) -> Self {
        Self {
            name: name.into(),
            many: false,
            ordered: false,
            unique: false,
            containment: false,
            container: false,
            target,
        }
    }

    /// Marks the reference many-valued, ordered and unique.
    pub fn many(mut self) -> Self {
        self.many = true;
        self.ordered = true;
        self.unique = true;
        self
    }

    /// Marks the reference as a containment.
    pub fn containment(mut self) -> Self {
        self.containment = true;
        self
    }

    /// Marks the reference as a container back-pointer.
    pub fn container(mut self) -> Self {
        self.container = true;
        self
    }
}

/// Metaclass description as produced by a metamodel parser.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    /// Package URI and class name.
    pub key: ClassKey,
    /// Every reachable supertype, excluding the class itself.
    pub super_types: Vec<ClassKey>,
    /// Attributes declared by the class itself.
    pub attributes: Vec<AttributeDecl>,
    /// References declared by the class itself.
    pub references: Vec<ReferenceDecl>,
}

impl ClassDescriptor {
    /// Class with no supertypes and no features.
    pub fn new(package_uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: ClassKey::new(package_uri, name),
            super_types: Vec::new(),
            attributes: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Adds a supertype.
    pub fn with_super(mut self, key: ClassKey) -> Self {
        self.super_types.push(key);
        self
    }

    /// Adds an attribute declaration.
    pub fn with_attribute(mut self, attr: AttributeDecl) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Adds a reference declaration.
    pub fn with_reference(mut self, reference: ReferenceDecl) -> Self {
        self.references.push(reference);
        self
    }

    /// Looks up a reference declaration by name.
    pub fn reference(&self, name: &str) -> Option<&ReferenceDecl> {
        self.references.iter().find(|r| r.name == name)
    }

    /// Looks up an attribute declaration by name.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDecl> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A metamodel package: the unit of registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetamodelPackage {
    /// Namespace URI, unique across registered packages.
    pub uri: String,
    /// Parser family, e.g. `ecore`.
    pub kind: String,
    /// Serialized form of the package, stored verbatim on its node.
    pub resource: String,
    /// Classes owned by the package.
    pub classes: Vec<ClassDescriptor>,
}

impl MetamodelPackage {
    /// Empty package with no serialized form.
    pub fn new(uri: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: kind.into(),
            resource: String::new(),
            classes: Vec::new(),
        }
    }

    /// Adds a class.
    pub fn with_class(mut self, class: ClassDescriptor) -> Self {
        self.classes.push(class);
        self
    }
}

/// Target of one reference value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceTarget {
    /// Repository holding the target; `None` means the source's repository.
    pub repository: Option<String>,
    /// Repository-relative path of the target's resource.
    pub path: String,
    /// URI fragment of the target element.
    pub fragment: String,
    /// Target is addressed by a globally unique fragment.
    pub fragment_based: bool,
}

impl ReferenceTarget {
    /// Target in the given resource of the source's repository.
    pub fn new(path: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            repository: None,
            path: path.into(),
            fragment: fragment.into(),
            fragment_based: false,
        }
    }

    /// Target in another repository.
    pub fn in_repository(
        repository: impl Into<String>,
        path: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            repository: Some(repository.into()),
            ..Self::new(path, fragment)
        }
    }

    /// Target addressed by a globally unique fragment, wherever it lives.
    pub fn by_fragment(path: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            fragment_based: true,
            ..Self::new(path, fragment)
        }
    }
}

/// Read access to one parsed model object.
pub trait ModelObject {
    /// Exact metaclass.
    fn class(&self) -> &ClassDescriptor;
    /// Repository-relative path of the containing resource.
    fn resource_path(&self) -> &str;
    /// Identifier of the object within its resource.
    fn uri_fragment(&self) -> &str;
    /// Content hash of the object's observable state.
    fn signature(&self) -> Vec<u8>;
    /// The object keeps its identity across resources.
    fn is_fragment_unique(&self) -> bool {
        false
    }
    /// The object has no container.
    fn is_root(&self) -> bool {
        false
    }
    /// Returns true if `feature` holds a value.
    fn is_set(&self, feature: &str) -> bool;
    /// Value of an attribute, if set.
    fn attribute(&self, feature: &str) -> Option<PropValue>;
    /// Targets of a reference, in order; empty if unset.
    fn reference(&self, feature: &str) -> Vec<ReferenceTarget>;

    /// Returns true if `target` lives outside this object's resource. An
    /// empty target path denotes the object's own resource.
    fn is_in_different_resource_than(&self, target: &ReferenceTarget) -> bool {
        if target.repository.is_some() {
            return true;
        }
        !target.path.is_empty()
            && target.path.trim_start_matches('/') != self.resource_path().trim_start_matches('/')
    }
}

/// A parsed resource: the objects of one source file.
pub trait ModelResource {
    /// Objects in document order.
    fn objects(&self) -> Box<dyn Iterator<Item = &dyn ModelObject> + '_>;

    /// Resource format declares fragment-unique (singleton) objects.
    fn provides_singletons(&self) -> bool {
        false
    }
}
