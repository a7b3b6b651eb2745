//! PendingRelationship domain entity
//!
//! A relationship edge discovered while converting an inbound record whose
//! targets may not exist locally yet. Edges are keyed by
//! `(from_type, from_identifier, property_name)`; a newer edge for the same
//! key replaces the live one.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::DomainError;

/// Default number of failed resolution attempts after which an edge is dead
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Unique key of a pending relationship edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub from_type: String,
    pub from_identifier: String,
    pub property_name: String,
}

impl RelationshipKey {
    /// Creates a key
    ///
    /// # Errors
    /// Returns error if any component is empty
    pub fn new(
        from_type: impl Into<String>,
        from_identifier: impl Into<String>,
        property_name: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let key = Self {
            from_type: from_type.into(),
            from_identifier: from_identifier.into(),
            property_name: property_name.into(),
        };
        if key.from_type.is_empty() || key.from_identifier.is_empty() || key.property_name.is_empty()
        {
            return Err(DomainError::ValidationFailed(format!(
                "Incomplete relationship key: {key}"
            )));
        }
        Ok(key)
    }
}

impl fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}).{}",
            self.from_type, self.from_identifier, self.property_name
        )
    }
}

/// A deferred relationship edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRelationship {
    key: RelationshipKey,
    to_type: String,
    target_identifiers: Vec<String>,
    attempts: u32,
    is_considered_dead: bool,
    is_applied: bool,
}

impl PendingRelationship {
    /// Creates a fresh live edge with zero attempts
    ///
    /// An empty `target_identifiers` means "clear the relationship".
    pub fn new(key: RelationshipKey, to_type: impl Into<String>, target_identifiers: Vec<String>) -> Self {
        Self {
            key,
            to_type: to_type.into(),
            target_identifiers,
            attempts: 0,
            is_considered_dead: false,
            is_applied: false,
        }
    }

    /// Rebuilds an edge from persisted columns
    pub fn from_parts(
        key: RelationshipKey,
        to_type: String,
        target_identifiers: Vec<String>,
        attempts: u32,
        is_considered_dead: bool,
        is_applied: bool,
    ) -> Self {
        Self {
            key,
            to_type,
            target_identifiers,
            attempts,
            is_considered_dead,
            is_applied,
        }
    }

    // --- Getters ---

    pub fn key(&self) -> &RelationshipKey {
        &self.key
    }

    pub fn to_type(&self) -> &str {
        &self.to_type
    }

    pub fn target_identifiers(&self) -> &[String] {
        &self.target_identifiers
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_considered_dead(&self) -> bool {
        self.is_considered_dead
    }

    pub fn is_applied(&self) -> bool {
        self.is_applied
    }

    /// Returns true while the edge still awaits resolution
    pub fn is_live(&self) -> bool {
        !self.is_considered_dead && !self.is_applied
    }

    // --- Transitions ---

    /// Records a successful materialization
    pub fn mark_applied(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.is_applied = true;
    }

    /// Records a failed attempt because the source or a target is missing
    ///
    /// The edge dies once its attempts exceed `max_attempts`.
    pub fn record_miss(&mut self, max_attempts: u32) {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > max_attempts {
            self.is_considered_dead = true;
        }
    }

    /// Marks the edge dead without retry
    pub fn mark_dead(&mut self) {
        self.is_considered_dead = true;
    }
}
