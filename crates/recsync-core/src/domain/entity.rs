//! SyncedEntity domain entity
//!
//! One ledger row per locally tracked object. The change state decides
//! whether the object belongs to the next upload set.
//!
//! ## State Machine
//!
//! ```text
//!     ┌──────┐   uploaded & acked   ┌────────┐
//!     │ New  │ ───────────────────► │ Synced │ ◄──── remote write
//!     └──────┘                      └────────┘
//!                                    │      ▲
//!                     local mutation │      │ uploaded & acked
//!                                    ▼      │
//!                                  ┌─────────┐
//!                                  │ Changed │
//!                                  └─────────┘
//!
//!     any ── local delete ──► Deleted ── delete acked ──► Synced + tombstone
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::DomainError;

// ============================================================================
// ChangeState
// ============================================================================

/// Sync state of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    /// Observed locally, never uploaded
    New,
    /// Uploaded before, modified locally since
    Changed,
    /// Deleted locally, deletion not yet acknowledged
    Deleted,
    /// Local and remote agree
    Synced,
}

impl ChangeState {
    /// All states, in storage order
    pub const ALL: [ChangeState; 4] = [
        ChangeState::New,
        ChangeState::Changed,
        ChangeState::Deleted,
        ChangeState::Synced,
    ];

    /// Returns true if the entry contributes a record to the upload set
    pub fn needs_upload(&self) -> bool {
        matches!(self, ChangeState::New | ChangeState::Changed)
    }

    /// Returns the storage name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeState::New => "new",
            ChangeState::Changed => "changed",
            ChangeState::Deleted => "deleted",
            ChangeState::Synced => "synced",
        }
    }

    /// State an existing entry moves to after a local insert or update
    ///
    /// A missing entry becomes `New`; anything already known becomes
    /// `Changed`, so a synced object is never demoted back to `New`.
    pub fn after_local_mutation(current: Option<ChangeState>) -> ChangeState {
        match current {
            None | Some(ChangeState::New) => ChangeState::New,
            Some(_) => ChangeState::Changed,
        }
    }
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ChangeState::New),
            "changed" => Ok(ChangeState::Changed),
            "deleted" => Ok(ChangeState::Deleted),
            "synced" => Ok(ChangeState::Synced),
            other => Err(DomainError::InvalidChangeState(other.to_string())),
        }
    }
}

// ============================================================================
// SyncedEntity
// ============================================================================

/// Durable sync state of one tracked local object
///
/// `identifier` equals the object's primary key and is unique across the
/// ledger. A row is only physically removed by the cleanup sweep once it is
/// tombstoned (`is_deleted`) and acknowledged (`Synced`).
///
/// `generation` increases on every write that changes what the entry stands
/// for. An upload acknowledgement only settles the entry if the generation
/// it was uploaded at is still current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedEntity {
    identifier: String,
    type_name: String,
    change_state: ChangeState,
    is_deleted: bool,
    modified_time: Option<DateTime<Utc>>,
    generation: i64,
}

impl SyncedEntity {
    /// Creates a live entry in the given state
    ///
    /// # Errors
    /// Returns error if the identifier or type name is empty
    pub fn new(
        type_name: impl Into<String>,
        identifier: impl Into<String>,
        change_state: ChangeState,
    ) -> Result<Self, DomainError> {
        let identifier = identifier.into();
        let type_name = type_name.into();
        if identifier.is_empty() {
            return Err(DomainError::InvalidIdentifier(
                "Entity identifier cannot be empty".to_string(),
            ));
        }
        if type_name.is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "Entity {identifier} has no type name"
            )));
        }
        Ok(Self {
            identifier,
            type_name,
            change_state,
            is_deleted: false,
            modified_time: Some(Utc::now()),
            generation: 0,
        })
    }

    /// Rebuilds an entry from persisted columns without validation
    pub fn from_parts(
        identifier: String,
        type_name: String,
        change_state: ChangeState,
        is_deleted: bool,
        modified_time: Option<DateTime<Utc>>,
        generation: i64,
    ) -> Self {
        Self {
            identifier,
            type_name,
            change_state,
            is_deleted,
            modified_time,
            generation,
        }
    }

    // --- Getters ---

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn change_state(&self) -> ChangeState {
        self.change_state
    }

    pub fn is_deleted(&self) -> bool {
        self.is_deleted
    }

    pub fn modified_time(&self) -> Option<DateTime<Utc>> {
        self.modified_time
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    /// Returns true if the entry still holds the change uploaded at `generation`
    pub fn is_awaiting(&self, generation: i64) -> bool {
        self.generation == generation && self.change_state != ChangeState::Synced
    }

    /// Returns true if the cleanup sweep may remove this entry
    pub fn is_purgeable(&self) -> bool {
        self.is_deleted && self.change_state == ChangeState::Synced
    }

    // --- Transitions ---

    /// Applies a local insert or update
    pub fn record_local_mutation(&mut self) {
        self.change_state = ChangeState::after_local_mutation(Some(self.change_state));
        self.is_deleted = false;
        self.modified_time = Some(Utc::now());
        self.generation += 1;
    }

    /// Applies a local deletion
    pub fn record_local_deletion(&mut self) {
        self.change_state = ChangeState::Deleted;
        self.modified_time = Some(Utc::now());
        self.generation += 1;
    }

    /// Applies an upload acknowledgement for a saved record
    pub fn mark_synced(&mut self) {
        self.change_state = ChangeState::Synced;
        self.modified_time = Some(Utc::now());
    }

    /// Applies an acknowledged or remote-originated deletion
    pub fn mark_tombstoned(&mut self) {
        self.change_state = ChangeState::Synced;
        self.is_deleted = true;
        self.modified_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_state_roundtrip() {
        for state in ChangeState::ALL {
            let parsed: ChangeState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("bogus".parse::<ChangeState>().is_err());
    }

    #[test]
    fn test_needs_upload() {
        assert!(ChangeState::New.needs_upload());
        assert!(ChangeState::Changed.needs_upload());
        assert!(!ChangeState::Deleted.needs_upload());
        assert!(!ChangeState::Synced.needs_upload());
    }

    #[test]
    fn test_local_mutation_never_returns_to_new() {
        assert_eq!(ChangeState::after_local_mutation(None), ChangeState::New);
        assert_eq!(
            ChangeState::after_local_mutation(Some(ChangeState::New)),
            ChangeState::New
        );
        assert_eq!(
            ChangeState::after_local_mutation(Some(ChangeState::Synced)),
            ChangeState::Changed
        );
        assert_eq!(
            ChangeState::after_local_mutation(Some(ChangeState::Changed)),
            ChangeState::Changed
        );
    }

    #[test]
    fn test_new_entity_validation() {
        assert!(SyncedEntity::new("Pilot", "", ChangeState::New).is_err());
        assert!(SyncedEntity::new("", "p1", ChangeState::New).is_err());

        let entity = SyncedEntity::new("Pilot", "p1", ChangeState::New).unwrap();
        assert_eq!(entity.identifier(), "p1");
        assert_eq!(entity.type_name(), "Pilot");
        assert!(!entity.is_deleted());
        assert!(entity.modified_time().is_some());
    }

    #[test]
    fn test_transitions() {
        let mut entity = SyncedEntity::new("Pilot", "p1", ChangeState::New).unwrap();
        entity.mark_synced();
        assert_eq!(entity.change_state(), ChangeState::Synced);

        entity.record_local_mutation();
        assert_eq!(entity.change_state(), ChangeState::Changed);

        entity.record_local_deletion();
        assert_eq!(entity.change_state(), ChangeState::Deleted);
        assert!(!entity.is_purgeable());

        entity.mark_tombstoned();
        assert!(entity.is_deleted());
        assert!(entity.is_purgeable());
    }

    #[test]
    fn test_local_writes_advance_generation() {
        let mut entity = SyncedEntity::new("Pilot", "p1", ChangeState::New).unwrap();
        assert!(entity.is_awaiting(0));

        entity.record_local_mutation();
        assert_eq!(entity.generation(), 1);
        assert!(!entity.is_awaiting(0));

        entity.record_local_deletion();
        assert!(entity.is_awaiting(2));

        entity.mark_synced();
        assert_eq!(entity.generation(), 2);
        assert!(!entity.is_awaiting(2));
    }
}
