use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Property value stored on a graph node or edge.
///
/// Arrays are homogeneous; a many-valued attribute of mixed element types is
/// stored as a [`PropValue::StrArray`] of the elements' display forms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Owned string.
    Str(String),
    /// Owned byte vector.
    Bytes(Vec<u8>),
    /// Homogeneous boolean array.
    BoolArray(Vec<bool>),
    /// Homogeneous integer array.
    IntArray(Vec<i64>),
    /// Homogeneous float array.
    FloatArray(Vec<f64>),
    /// Homogeneous string array.
    StrArray(Vec<String>),
}

/// Property map used when creating nodes and edges.
pub type PropMap = BTreeMap<String, PropValue>;

impl PropValue {
    /// Returns the string payload, if this is a [`PropValue::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a [`PropValue::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is a [`PropValue::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the byte payload, if this is a [`PropValue::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PropValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns true for the array variants.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            PropValue::BoolArray(_)
                | PropValue::IntArray(_)
                | PropValue::FloatArray(_)
                | PropValue::StrArray(_)
        )
    }

    /// Terms under which this value is registered in a secondary index.
    ///
    /// Scalars produce one term, arrays one term per element.
    pub fn index_terms(&self) -> Vec<String> {
        match self {
            PropValue::BoolArray(v) => v.iter().map(ToString::to_string).collect(),
            PropValue::IntArray(v) => v.iter().map(ToString::to_string).collect(),
            PropValue::FloatArray(v) => v.iter().map(ToString::to_string).collect(),
            PropValue::StrArray(v) => v.clone(),
            scalar => vec![scalar.to_string()],
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v}"),
            PropValue::Bytes(v) => write!(f, "{}", hex::encode(v)),
            PropValue::BoolArray(v) => write!(f, "{v:?}"),
            PropValue::IntArray(v) => write!(f, "{v:?}"),
            PropValue::FloatArray(v) => write!(f, "{v:?}"),
            PropValue::StrArray(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Int(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Float(value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<Vec<u8>> for PropValue {
    fn from(value: Vec<u8>) -> Self {
        PropValue::Bytes(value)
    }
}

impl From<Vec<String>> for PropValue {
    fn from(value: Vec<String>) -> Self {
        PropValue::StrArray(value)
    }
}
