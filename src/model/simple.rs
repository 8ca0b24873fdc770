//! Plain in-memory model objects.

use std::collections::BTreeMap;
use std::hash::Hasher;
use std::sync::Arc;

use xxhash_rust::xxh64::Xxh64;

use super::{ClassDescriptor, ModelObject, ModelResource, ReferenceTarget};
use crate::graph::PropValue;

const SIGNATURE_SEED: u64 = 0x5eed_0f_5164;

/// A model object whose features are held in maps.
#[derive(Clone, Debug)]
pub struct SimpleObject {
    class: Arc<ClassDescriptor>,
    path: String,
    fragment: String,
    fragment_unique: bool,
    root: bool,
    attributes: BTreeMap<String, PropValue>,
    references: BTreeMap<String, Vec<ReferenceTarget>>,
}

impl SimpleObject {
    /// Object of `class` stored in the file at `path` under `fragment`.
    pub fn new(
        class: Arc<ClassDescriptor>,
        path: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            class,
            path: path.into(),
            fragment: fragment.into(),
            fragment_unique: false,
            root: false,
            attributes: BTreeMap::new(),
            references: BTreeMap::new(),
        }
    }

    /// Sets an attribute value.
    pub fn with_attribute(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Sets the targets of a reference.
    pub fn with_reference(mut self, name: &str, targets: Vec<ReferenceTarget>) -> Self {
        self.set_reference(name, targets);
        self
    }

    /// Marks the object as shared by every file that contains its fragment.
    pub fn fragment_unique(mut self) -> Self {
        self.fragment_unique = true;
        self
    }

    /// Marks the object as a resource root.
    pub fn root(mut self) -> Self {
        self.root = true;
        self
    }

    /// Replaces an attribute value in place.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<PropValue>) {
        self.attributes.insert(name.to_owned(), value.into());
    }

    /// Unsets the attribute or reference called `name`.
    pub fn unset(&mut self, name: &str) {
        self.attributes.remove(name);
        self.references.remove(name);
    }

    /// Setting an empty target list unsets the reference.
    pub fn set_reference(&mut self, name: &str, targets: Vec<ReferenceTarget>) {
        if targets.is_empty() {
            self.references.remove(name);
        } else {
            self.references.insert(name.to_owned(), targets);
        }
    }

    /// Moves the object to another resource path.
    pub fn relocate(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    /// Changes the exact metaclass.
    pub fn retype(&mut self, class: Arc<ClassDescriptor>) {
        self.class = class;
    }
}

impl ModelObject for SimpleObject {
    fn class(&self) -> &ClassDescriptor {
        &self.class
    }

    fn resource_path(&self) -> &str {
        &self.path
    }

    fn uri_fragment(&self) -> &str {
        &self.fragment
    }

    fn signature(&self) -> Vec<u8> {
        let mut hasher = Xxh64::new(SIGNATURE_SEED);
        hasher.write(self.class.key.to_string().as_bytes());
        hasher.write(&[0]);
        hasher.write(self.fragment.as_bytes());
        for (name, value) in &self.attributes {
            hasher.write(&[1]);
            hasher.write(name.as_bytes());
            hasher.write(format!("{value:?}").as_bytes());
        }
        for (name, targets) in &self.references {
            hasher.write(&[2]);
            hasher.write(name.as_bytes());
            for target in targets {
                hasher.write(&[3]);
                if let Some(repo) = &target.repository {
                    hasher.write(repo.as_bytes());
                }
                hasher.write(target.path.as_bytes());
                hasher.write(target.fragment.as_bytes());
            }
        }
        hasher.finish().to_be_bytes().to_vec()
    }

    fn is_fragment_unique(&self) -> bool {
        self.fragment_unique
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn is_set(&self, feature: &str) -> bool {
        self.attributes.contains_key(feature) || self.references.contains_key(feature)
    }

    fn attribute(&self, feature: &str) -> Option<PropValue> {
        self.attributes.get(feature).cloned()
    }

    fn reference(&self, feature: &str) -> Vec<ReferenceTarget> {
        self.references.get(feature).cloned().unwrap_or_default()
    }
}

/// A resource made of [`SimpleObject`]s.
#[derive(Clone, Debug, Default)]
pub struct SimpleResource {
    objects: Vec<SimpleObject>,
    singletons: bool,
}

impl SimpleResource {
    /// Resource holding `objects` in order.
    pub fn new(objects: Vec<SimpleObject>) -> Self {
        Self {
            objects,
            singletons: false,
        }
    }

    /// Declares that the resource contains fragment-unique objects.
    pub fn with_singletons(mut self) -> Self {
        self.singletons = true;
        self
    }

    /// Appends an object.
    pub fn push(&mut self, object: SimpleObject) {
        self.objects.push(object);
    }

    /// Removes the object with `fragment`, returning it.
    pub fn remove(&mut self, fragment: &str) -> Option<SimpleObject> {
        let pos = self.objects.iter().position(|o| o.fragment == fragment)?;
        Some(self.objects.remove(pos))
    }

    /// Object stored under `fragment`, for in-place edits.
    pub fn get_mut(&mut self, fragment: &str) -> Option<&mut SimpleObject> {
        self.objects.iter_mut().find(|o| o.fragment == fragment)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if the resource holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl ModelResource for SimpleResource {
    fn objects(&self) -> Box<dyn Iterator<Item = &dyn ModelObject> + '_> {
        Box::new(self.objects.iter().map(|o| o as &dyn ModelObject))
    }

    fn provides_singletons(&self) -> bool {
        self.singletons
    }
}
