//! Local object model
//!
//! A [`LocalObject`] is the engine's view of one row in the local typed
//! store: a type name, a string primary key and a map of declared field
//! values. Relationship fields hold [`ObjectRef`]s rather than embedded
//! objects, so a link can be written without the target being loaded.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to another local object by type and primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub type_name: String,
    pub primary_key: String,
}

impl ObjectRef {
    pub fn new(type_name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            primary_key: primary_key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name, self.primary_key)
    }
}

/// Value held by a local object field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ObjectValue {
    Null,
    Int(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Date(DateTime<Utc>),
    Array(Vec<ObjectValue>),
    Link(Option<ObjectRef>),
    LinkList(Vec<ObjectRef>),
}

impl ObjectValue {
    /// Returns true for single and multi-valued links
    pub fn is_link(&self) -> bool {
        matches!(self, ObjectValue::Link(_) | ObjectValue::LinkList(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ObjectValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ObjectValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// One object of a tracked local type
///
/// The primary key lives outside the field map; setting a field with the
/// primary key's name has no effect on identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalObject {
    type_name: String,
    primary_key: String,
    fields: BTreeMap<String, ObjectValue>,
}

impl LocalObject {
    pub fn new(type_name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            primary_key: primary_key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment
    pub fn with(mut self, field: impl Into<String>, value: ObjectValue) -> Self {
        self.set(field, value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// A reference to this object
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.type_name.clone(), self.primary_key.clone())
    }

    pub fn fields(&self) -> &BTreeMap<String, ObjectValue> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&ObjectValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: ObjectValue) {
        self.fields.insert(field.into(), value);
    }

    /// Value of the named boolean flag, `false` when unset or not boolean
    pub fn flag(&self, field: &str) -> bool {
        self.get(field).and_then(ObjectValue::as_bool).unwrap_or(false)
    }

    /// Overwrites every non-link field with the values from `incoming`
    ///
    /// Links are left untouched; they are materialized separately once all
    /// targets exist locally.
    pub fn merge_scalars(&mut self, incoming: &LocalObject) {
        for (name, value) in &incoming.fields {
            if !value.is_link() {
                self.fields.insert(name.clone(), value.clone());
            }
        }
    }
}
