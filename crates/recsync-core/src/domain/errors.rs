//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! newtype validation failures and the fatal schema faults raised while
//! registering tracked types.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid zone name
    #[error("Invalid zone: {0}")]
    InvalidZone(String),

    /// Invalid record or object identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid change token
    #[error("Invalid change token: {0}")]
    InvalidChangeToken(String),

    /// Invalid remote operation identifier
    #[error("Invalid operation ID: {0}")]
    InvalidOperationId(String),

    /// Invalid state name read back from storage
    #[error("Invalid change state: {0}")]
    InvalidChangeState(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Fatal schema faults detected while registering tracked types
///
/// These are raised once, at construction time, and are never retried:
/// a tracked type with an unusable declaration cannot be synchronized at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationFault {
    /// The type declares no primary key field
    #[error("Type {type_name} declares no primary key")]
    MissingPrimaryKey {
        /// The offending type
        type_name: String,
    },

    /// The primary key is not a non-optional string scalar
    #[error("Primary key {field} of type {type_name} must be a non-optional string")]
    PrimaryKeyNotString {
        /// The offending type
        type_name: String,
        /// The primary key field
        field: String,
    },

    /// More than one field is flagged as primary key
    #[error("Type {type_name} declares more than one primary key")]
    MultiplePrimaryKeys {
        /// The offending type
        type_name: String,
    },

    /// The type has no boolean soft-delete flag
    #[error("Type {type_name} has no non-optional boolean soft-delete field")]
    MissingSoftDeleteFlag {
        /// The offending type
        type_name: String,
    },

    /// The same type name was registered twice
    #[error("Type {0} registered more than once")]
    DuplicateType(String),

    /// A relationship field points at a type that is not registered
    #[error("Relationship {type_name}.{field} targets unregistered type {target}")]
    UnknownRelationshipTarget {
        /// The declaring type
        type_name: String,
        /// The relationship field
        field: String,
        /// The missing target type
        target: String,
    },

    /// The local store may hard-delete objects of this type behind the engine's back
    #[error("Local store allows hard deletes of tracked type {0}")]
    HardDeleteCapable(String),

    /// The zone policy produced an unusable zone name for a type
    #[error("Zone policy yields an invalid zone for type {type_name}: {reason}")]
    InvalidZone {
        /// The offending type
        type_name: String,
        /// Why the zone name was rejected
        reason: String,
    },
}
