//! Remote record model
//!
//! Records are schema-less: a record type, an identifier scoped to a zone and
//! a flat map of typed values. An absent key is the remote store's null.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::ZoneId;

/// Field stamped on every outbound record with the writer's schema version
pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";

/// Identifier of a record: a name unique within its zone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub zone: ZoneId,
    pub name: String,
}

impl RecordId {
    pub fn new(zone: ZoneId, name: impl Into<String>) -> Self {
        Self {
            zone,
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.name)
    }
}

/// Typed value stored in a record field
///
/// Booleans travel as `Int` (0 or 1) and single-precision floats as
/// `Double`, matching what the remote store can represent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum RecordValue {
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(DateTime<Utc>),
    Reference(RecordId),
    ReferenceList(Vec<RecordId>),
    List(Vec<RecordValue>),
}

/// A remote record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_type: String,
    pub id: RecordId,
    pub fields: BTreeMap<String, RecordValue>,
}

impl Record {
    pub fn new(record_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&RecordValue> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: RecordValue) {
        self.fields.insert(field.into(), value);
    }

    /// The schema version the writer stamped, if any
    pub fn schema_version(&self) -> Option<i64> {
        match self.get(SCHEMA_VERSION_FIELD) {
            Some(RecordValue::Int(v)) => Some(*v),
            _ => None,
        }
    }
}

/// A record deletion reported by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub id: RecordId,
    pub record_type: String,
}
