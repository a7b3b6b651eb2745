//! Type descriptor registry
//!
//! Describes every tracked local type once, at startup: field names, semantic
//! kinds, optional/array flags, the primary key, excluded fields and the
//! soft-delete flag. The registry is validated on construction and then
//! shared read-only by the converter and the reconciliation engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ConfigurationFault;

// ============================================================================
// FieldKind
// ============================================================================

/// Semantic kind of a declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FieldKind {
    Int,
    Bool,
    Float,
    Double,
    String,
    Binary,
    Date,
    /// Single-valued link to an object of `target` type
    Relationship { target: String },
    /// Ordered multi-valued link to objects of `target` type
    List { target: String },
    /// A declared kind with no record mapping; skipped during conversion
    Unsupported { declared: String },
}

impl FieldKind {
    /// Returns true for single or multi-valued relationships
    pub fn is_relationship(&self) -> bool {
        matches!(self, FieldKind::Relationship { .. } | FieldKind::List { .. })
    }

    /// Target type of a relationship field
    pub fn relationship_target(&self) -> Option<&str> {
        match self {
            FieldKind::Relationship { target } | FieldKind::List { target } => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Int => write!(f, "int"),
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Double => write!(f, "double"),
            FieldKind::String => write!(f, "string"),
            FieldKind::Binary => write!(f, "binary"),
            FieldKind::Date => write!(f, "date"),
            FieldKind::Relationship { target } => write!(f, "relationship<{target}>"),
            FieldKind::List { target } => write!(f, "list<{target}>"),
            FieldKind::Unsupported { declared } => write!(f, "unsupported({declared})"),
        }
    }
}

// ============================================================================
// FieldDescriptor
// ============================================================================

/// Declaration of one field of a tracked type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// Field is never synchronized in either direction
    #[serde(default)]
    pub excluded: bool,
}

impl FieldDescriptor {
    /// A non-optional, non-array field of the given kind
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            array: false,
            primary_key: false,
            excluded: false,
        }
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Double)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn binary(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Binary)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    /// A single-valued relationship; always optional
    pub fn relationship(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            optional: true,
            ..Self::new(
                name,
                FieldKind::Relationship {
                    target: target.into(),
                },
            )
        }
    }

    /// An ordered multi-valued relationship
    pub fn list(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::List {
                target: target.into(),
            },
        )
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }
}

// ============================================================================
// TypeDescriptor
// ============================================================================

/// Declaration of a tracked type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
    soft_delete_field: String,
}

impl TypeDescriptor {
    /// Name of the soft-delete flag used when none is given explicitly
    pub const DEFAULT_SOFT_DELETE_FIELD: &'static str = "isDeleted";

    /// Starts a descriptor with no fields
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            soft_delete_field: Self::DEFAULT_SOFT_DELETE_FIELD.to_string(),
        }
    }

    /// Adds a field declaration
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Names the boolean field that marks an object as soft-deleted
    pub fn soft_delete(mut self, field: impl Into<String>) -> Self {
        self.soft_delete_field = field.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn soft_delete_field(&self) -> &str {
        &self.soft_delete_field
    }

    /// Looks up a field by name
    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the primary key field
    ///
    /// Always present on descriptors obtained from a [`SchemaRegistry`].
    pub fn primary_key(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.primary_key)
            .map(|f| f.name.as_str())
    }

    /// Fields that take part in synchronization
    pub fn synced_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| !f.excluded)
    }

    fn validate(&self) -> Result<(), ConfigurationFault> {
        let keys: Vec<&FieldDescriptor> = self.fields.iter().filter(|f| f.primary_key).collect();
        let key = match keys.as_slice() {
            [] => {
                return Err(ConfigurationFault::MissingPrimaryKey {
                    type_name: self.name.clone(),
                })
            }
            [key] => *key,
            _ => {
                return Err(ConfigurationFault::MultiplePrimaryKeys {
                    type_name: self.name.clone(),
                })
            }
        };
        if key.kind != FieldKind::String || key.optional || key.array || key.excluded {
            return Err(ConfigurationFault::PrimaryKeyNotString {
                type_name: self.name.clone(),
                field: key.name.clone(),
            });
        }

        match self.field_named(&self.soft_delete_field) {
            Some(flag) if flag.kind == FieldKind::Bool && !flag.optional && !flag.array => Ok(()),
            _ => Err(ConfigurationFault::MissingSoftDeleteFlag {
                type_name: self.name.clone(),
            }),
        }
    }
}

// ============================================================================
// SchemaRegistry
// ============================================================================

/// Validated set of tracked types
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, TypeDescriptor>,
}

impl SchemaRegistry {
    /// Builds and validates a registry
    ///
    /// # Errors
    /// Returns the first [`ConfigurationFault`] found: duplicate types, a
    /// missing or non-string primary key, a missing soft-delete flag, or a
    /// relationship pointing at an unregistered type.
    pub fn new(descriptors: Vec<TypeDescriptor>) -> Result<Self, ConfigurationFault> {
        let mut types = BTreeMap::new();
        for descriptor in descriptors {
            descriptor.validate()?;
            let name = descriptor.name.clone();
            if types.insert(name.clone(), descriptor).is_some() {
                return Err(ConfigurationFault::DuplicateType(name));
            }
        }

        for descriptor in types.values() {
            for field in descriptor.synced_fields() {
                if let Some(target) = field.kind.relationship_target() {
                    if !types.contains_key(target) {
                        return Err(ConfigurationFault::UnknownRelationshipTarget {
                            type_name: descriptor.name.clone(),
                            field: field.name.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }

        Ok(Self { types })
    }

    /// Returns the descriptor of a tracked type
    pub fn get(&self, type_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// All tracked types, ordered by name
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
