//! Object↔Record conversion
//!
//! Outbound, a [`LocalObject`] becomes a flat [`Record`]: scalars are copied
//! by declared kind, links are flattened into record references, and the
//! schema version is stamped. Inbound, a record becomes a [`LocalObject`]
//! holding scalars only plus one [`PendingRelationship`] per relationship
//! field; links are never resolved eagerly.
//!
//! Unmappable fields produce a [`ConversionSkip`] that is logged and skipped.
//! A skip never fails the conversion of the rest of the object.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use recsync_core::domain::{
    FieldDescriptor, FieldKind, LocalObject, ObjectValue, PendingRelationship, Record, RecordId,
    RecordValue, RelationshipKey, SchemaRegistry, TypeDescriptor, ZoneMap, SCHEMA_VERSION_FIELD,
};

/// Reason a value or object was left out of a conversion
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionSkip {
    #[error("Type {0} is not tracked")]
    UntrackedType(String),

    #[error("Field {type_name}.{field} has no record mapping for type {declared}")]
    UnsupportedPropertyType {
        type_name: String,
        field: String,
        declared: String,
    },

    #[error("Field {type_name}.{field} references untracked type {target}")]
    UntrackedReference {
        type_name: String,
        field: String,
        target: String,
    },
}

/// Result of converting one inbound record
#[derive(Debug, Clone, PartialEq)]
pub struct InboundObject {
    /// The object with scalar fields only
    pub object: LocalObject,
    /// One edge per relationship field, in declaration order
    pub relationships: Vec<PendingRelationship>,
}

/// Converts between tracked local objects and remote records
#[derive(Debug, Clone)]
pub struct Converter {
    registry: Arc<SchemaRegistry>,
    zones: ZoneMap,
    schema_version: i64,
}

impl Converter {
    pub fn new(registry: Arc<SchemaRegistry>, zones: ZoneMap, schema_version: i64) -> Self {
        Self {
            registry,
            zones,
            schema_version,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn zones(&self) -> &ZoneMap {
        &self.zones
    }

    /// Record identifier of the object `type_name(primary_key)`
    pub fn record_id(&self, type_name: &str, primary_key: &str) -> Result<RecordId, ConversionSkip> {
        let zone = self
            .zones
            .zone_for(type_name)
            .ok_or_else(|| ConversionSkip::UntrackedType(type_name.to_string()))?;
        Ok(RecordId::new(zone.clone(), primary_key))
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Converts a local object into the record to upload
    pub fn to_record(&self, object: &LocalObject) -> Result<Record, ConversionSkip> {
        let descriptor = self.descriptor(object.type_name())?;
        let id = self.record_id(object.type_name(), object.primary_key())?;
        let mut record = Record::new(object.type_name(), id);

        for field in outbound_fields(descriptor) {
            let value = object.get(&field.name);
            let converted = match &field.kind {
                FieldKind::Unsupported { declared } => {
                    log_skip(&unsupported(descriptor, field, declared));
                    continue;
                }
                FieldKind::Relationship { .. } => self.single_link_to_record(descriptor, field, value),
                FieldKind::List { .. } => self.link_list_to_record(descriptor, field, value),
                kind if field.array => match value {
                    Some(ObjectValue::Array(items)) => Some(RecordValue::List(
                        items
                            .iter()
                            .filter_map(|item| scalar_to_record(kind, item))
                            .collect(),
                    )),
                    _ => None,
                },
                kind => value.and_then(|v| scalar_to_record(kind, v)),
            };

            if let Some(converted) = converted {
                record.set(field.name.clone(), converted);
            }
        }

        record.set(SCHEMA_VERSION_FIELD, RecordValue::Int(self.schema_version));
        Ok(record)
    }

    fn single_link_to_record(
        &self,
        descriptor: &TypeDescriptor,
        field: &FieldDescriptor,
        value: Option<&ObjectValue>,
    ) -> Option<RecordValue> {
        let Some(ObjectValue::Link(Some(target))) = value else {
            return None;
        };
        match self.record_id(&target.type_name, &target.primary_key) {
            Ok(id) => Some(RecordValue::Reference(id)),
            Err(_) => {
                log_skip(&untracked_reference(descriptor, field, &target.type_name));
                None
            }
        }
    }

    fn link_list_to_record(
        &self,
        descriptor: &TypeDescriptor,
        field: &FieldDescriptor,
        value: Option<&ObjectValue>,
    ) -> Option<RecordValue> {
        let Some(ObjectValue::LinkList(targets)) = value else {
            return None;
        };
        let ids: Vec<RecordId> = targets
            .iter()
            .filter_map(|target| {
                match self.record_id(&target.type_name, &target.primary_key) {
                    Ok(id) => Some(id),
                    Err(_) => {
                        log_skip(&untracked_reference(descriptor, field, &target.type_name));
                        None
                    }
                }
            })
            .collect();

        if ids.is_empty() {
            None
        } else {
            Some(RecordValue::ReferenceList(ids))
        }
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Converts a fetched record into a local object and its deferred edges
    pub fn from_record(&self, record: &Record) -> Result<InboundObject, ConversionSkip> {
        let descriptor = self.descriptor(&record.record_type)?;
        let primary_key = record.id.name.as_str();
        let mut object = LocalObject::new(descriptor.name(), primary_key);
        let mut relationships = Vec::new();

        for field in outbound_fields(descriptor) {
            let value = record.get(&field.name);
            match &field.kind {
                FieldKind::Unsupported { declared } => {
                    log_skip(&unsupported(descriptor, field, declared));
                }
                FieldKind::Relationship { target } => {
                    let targets = match value {
                        Some(RecordValue::Reference(id)) => vec![id.name.clone()],
                        _ => Vec::new(),
                    };
                    push_edge(&mut relationships, descriptor, primary_key, field, target, targets);
                }
                FieldKind::List { target } => {
                    let targets = match value {
                        Some(RecordValue::ReferenceList(ids)) => {
                            ids.iter().map(|id| id.name.clone()).collect()
                        }
                        _ => Vec::new(),
                    };
                    push_edge(&mut relationships, descriptor, primary_key, field, target, targets);
                }
                kind if field.array => {
                    let items = match value {
                        Some(RecordValue::List(items)) => items
                            .iter()
                            .filter_map(|item| scalar_from_record(kind, item))
                            .collect(),
                        _ => Vec::new(),
                    };
                    object.set(field.name.clone(), ObjectValue::Array(items));
                }
                kind => {
                    let converted = match value.and_then(|v| scalar_from_record(kind, v)) {
                        Some(v) => v,
                        None if field.optional => ObjectValue::Null,
                        None => zero_value(kind),
                    };
                    object.set(field.name.clone(), converted);
                }
            }
        }

        Ok(InboundObject {
            object,
            relationships,
        })
    }

    fn descriptor(&self, type_name: &str) -> Result<&TypeDescriptor, ConversionSkip> {
        self.registry
            .get(type_name)
            .ok_or_else(|| ConversionSkip::UntrackedType(type_name.to_string()))
    }
}

/// Synced fields other than the primary key
fn outbound_fields(descriptor: &TypeDescriptor) -> impl Iterator<Item = &FieldDescriptor> {
    descriptor.synced_fields().filter(|f| !f.primary_key)
}

fn push_edge(
    edges: &mut Vec<PendingRelationship>,
    descriptor: &TypeDescriptor,
    primary_key: &str,
    field: &FieldDescriptor,
    target: &str,
    targets: Vec<String>,
) {
    match RelationshipKey::new(descriptor.name(), primary_key, field.name.clone()) {
        Ok(key) => edges.push(PendingRelationship::new(key, target, targets)),
        Err(e) => warn!(type_name = descriptor.name(), field = %field.name, error = %e, "Dropping relationship with invalid key"),
    }
}

fn scalar_to_record(kind: &FieldKind, value: &ObjectValue) -> Option<RecordValue> {
    match (kind, value) {
        (FieldKind::Int, ObjectValue::Int(v)) => Some(RecordValue::Int(*v)),
        (FieldKind::Bool, ObjectValue::Bool(v)) => Some(RecordValue::Int(i64::from(*v))),
        (FieldKind::Float, ObjectValue::Float(v)) => Some(RecordValue::Double(f64::from(*v))),
        (FieldKind::Double, ObjectValue::Double(v)) => Some(RecordValue::Double(*v)),
        (FieldKind::String, ObjectValue::String(v)) => Some(RecordValue::String(v.clone())),
        (FieldKind::Binary, ObjectValue::Binary(v)) => Some(RecordValue::Bytes(v.clone())),
        (FieldKind::Date, ObjectValue::Date(v)) => Some(RecordValue::Date(*v)),
        _ => None,
    }
}

fn scalar_from_record(kind: &FieldKind, value: &RecordValue) -> Option<ObjectValue> {
    match (kind, value) {
        (FieldKind::Int, RecordValue::Int(v)) => Some(ObjectValue::Int(*v)),
        (FieldKind::Bool, RecordValue::Int(v)) => Some(ObjectValue::Bool(*v != 0)),
        (FieldKind::Float, RecordValue::Double(v)) => Some(ObjectValue::Float(*v as f32)),
        (FieldKind::Double, RecordValue::Double(v)) => Some(ObjectValue::Double(*v)),
        (FieldKind::String, RecordValue::String(v)) => Some(ObjectValue::String(v.clone())),
        (FieldKind::Binary, RecordValue::Bytes(v)) => Some(ObjectValue::Binary(v.clone())),
        (FieldKind::Date, RecordValue::Date(v)) => Some(ObjectValue::Date(*v)),
        _ => None,
    }
}

/// Value of a missing non-optional scalar
fn zero_value(kind: &FieldKind) -> ObjectValue {
    match kind {
        FieldKind::Int => ObjectValue::Int(0),
        FieldKind::Bool => ObjectValue::Bool(false),
        FieldKind::Float => ObjectValue::Float(0.0),
        FieldKind::Double => ObjectValue::Double(0.0),
        FieldKind::String => ObjectValue::String(String::new()),
        FieldKind::Binary => ObjectValue::Binary(Vec::new()),
        FieldKind::Date => ObjectValue::Date(DateTime::<Utc>::default()),
        _ => ObjectValue::Null,
    }
}

fn unsupported(descriptor: &TypeDescriptor, field: &FieldDescriptor, declared: &str) -> ConversionSkip {
    ConversionSkip::UnsupportedPropertyType {
        type_name: descriptor.name().to_string(),
        field: field.name.clone(),
        declared: declared.to_string(),
    }
}

fn untracked_reference(descriptor: &TypeDescriptor, field: &FieldDescriptor, target: &str) -> ConversionSkip {
    ConversionSkip::UntrackedReference {
        type_name: descriptor.name().to_string(),
        field: field.name.clone(),
        target: target.to_string(),
    }
}

fn log_skip(skip: &ConversionSkip) {
    match skip {
        ConversionSkip::UnsupportedPropertyType { .. } => warn!(skip = %skip, "Skipping field"),
        _ => debug!(skip = %skip, "Skipping value"),
    }
}
