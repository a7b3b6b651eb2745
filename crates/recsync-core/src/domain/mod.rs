//! Domain entities and business logic
//!
//! This module contains the core domain types for recsync:
//! - Newtypes for zones, change tokens and remote operation identifiers
//! - Ledger entities (`SyncedEntity`, `PendingRelationship`)
//! - The type descriptor registry describing tracked local types
//! - Local object and remote record models
//! - Zone assignment policy
//! - Domain-specific error types

pub mod entity;
pub mod errors;
pub mod newtypes;
pub mod object;
pub mod record;
pub mod relationship;
pub mod schema;
pub mod zone;

// Re-export commonly used types
pub use entity::{ChangeState, SyncedEntity};
pub use errors::{ConfigurationFault, DomainError};
pub use newtypes::*;
pub use object::{LocalObject, ObjectRef, ObjectValue};
pub use record::{DeletedRecord, Record, RecordId, RecordValue, SCHEMA_VERSION_FIELD};
pub use relationship::{PendingRelationship, RelationshipKey, DEFAULT_MAX_ATTEMPTS};
pub use schema::{FieldDescriptor, FieldKind, SchemaRegistry, TypeDescriptor};
pub use zone::{ZoneFn, ZoneMap, ZonePolicy};
