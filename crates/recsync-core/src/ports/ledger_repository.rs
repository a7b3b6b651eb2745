//! Ledger repository port (driven/secondary port)
//!
//! This module defines the interface for persisting the entity ledger:
//! one [`SyncedEntity`] per tracked object and the deferred
//! [`PendingRelationship`] edges.
//!
//! ## Design Notes
//!
//! - Every mutation is described as a [`LedgerBatch`] and applied with
//!   [`ILedgerRepository::apply`] inside a single storage transaction. A
//!   failing batch leaves no partial writes and surfaces as
//!   [`LedgerError::WriteFailed`].
//! - Upload acknowledgements settle entries through [`LedgerOp::SettleUpload`]
//!   and [`LedgerOp::SettleDeletion`], which only match the generation the
//!   entry had when it was uploaded. The uploaded generations of a push are
//!   kept under its operation id until the push is acknowledged.
//! - Errors are classified (`thiserror`) rather than `anyhow` because the
//!   engine reports ledger write failures to its caller distinctly.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::domain::{
    ChangeState, OperationId, PendingRelationship, RelationshipKey, SyncedEntity,
};

/// Entity generations by identifier, as captured for one upload
pub type EntityVersions = BTreeMap<String, i64>;

// ============================================================================
// LedgerError
// ============================================================================

/// Errors raised by ledger storage
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The write transaction was aborted; nothing was persisted
    #[error("Ledger write failed: {0}")]
    WriteFailed(String),

    /// A query could not be executed
    #[error("Ledger read failed: {0}")]
    ReadFailed(String),

    /// A stored row could not be decoded
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),
}

// ============================================================================
// Queries
// ============================================================================

/// Filter criteria for ledger entity queries
///
/// An empty `states` set matches every state; `type_name` narrows the
/// result to one tracked type.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub states: Vec<ChangeState>,
    pub type_name: Option<String>,
}

impl EntityFilter {
    /// Creates a new empty filter (matches all entities)
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the query to the given states
    pub fn with_states(mut self, states: impl IntoIterator<Item = ChangeState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    /// Restricts the query to one type
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// Counts removed by a cleanup sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub entities_removed: u64,
    pub relationships_removed: u64,
}

// ============================================================================
// Mutations
// ============================================================================

/// A single ledger mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    /// Insert or overwrite the state of an entity and clear its tombstone
    Upsert {
        type_name: String,
        identifier: String,
        state: ChangeState,
    },
    /// Insert an entity only if no entry exists for the identifier
    InsertIfAbsent {
        type_name: String,
        identifier: String,
        state: ChangeState,
    },
    /// Move a `New`/`Changed` entity to `Synced` if it is still at `generation`
    SettleUpload { identifier: String, generation: i64 },
    /// Tombstone a `Deleted` entity if it is still at `generation`
    SettleDeletion { identifier: String, generation: i64 },
    /// Remember the generations uploaded by a remote operation
    RecordPush {
        operation: OperationId,
        versions: EntityVersions,
    },
    /// Drop the generations remembered for a remote operation
    ForgetPush { operation: OperationId },
    /// Tombstone an entity, creating the entry if it does not exist
    Tombstone {
        type_name: String,
        identifier: String,
    },
    /// Insert a pending edge, replacing any edge with the same key
    PutPending(PendingRelationship),
    /// Persist the attempt counter and flags of an existing edge
    UpdatePending(PendingRelationship),
    /// Mark every live edge originating from an object as dead
    InvalidatePendingFrom {
        from_type: String,
        from_identifier: String,
    },
}

/// Ordered list of mutations applied atomically
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    ops: Vec<LedgerOp>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: LedgerOp) {
        self.ops.push(op);
    }

    /// Moves every op of `other` to the end of this batch
    pub fn append(&mut self, other: &mut LedgerBatch) {
        self.ops.append(&mut other.ops);
    }

    pub fn ops(&self) -> &[LedgerOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<LedgerOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<Vec<LedgerOp>> for LedgerBatch {
    fn from(ops: Vec<LedgerOp>) -> Self {
        Self { ops }
    }
}

// ============================================================================
// ILedgerRepository trait
// ============================================================================

/// Port trait for the durable entity ledger
///
/// ## Implementation Notes
///
/// - `apply` must run the whole batch in one transaction, in order.
/// - `identifier` is unique across the ledger regardless of type.
/// - `live_relationships` returns edges that are neither dead nor applied,
///   ordered by key.
#[async_trait::async_trait]
pub trait ILedgerRepository: Send + Sync {
    /// Applies a batch of mutations atomically
    async fn apply(&self, batch: LedgerBatch) -> Result<(), LedgerError>;

    /// Retrieves an entity by identifier
    async fn find(&self, identifier: &str) -> Result<Option<SyncedEntity>, LedgerError>;

    /// Queries entities matching the filter, ordered by identifier
    async fn find_all(&self, filter: &EntityFilter) -> Result<Vec<SyncedEntity>, LedgerError>;

    /// Retrieves every edge awaiting resolution
    async fn live_relationships(&self) -> Result<Vec<PendingRelationship>, LedgerError>;

    /// Retrieves an edge by key, whatever its flags
    async fn relationship(
        &self,
        key: &RelationshipKey,
    ) -> Result<Option<PendingRelationship>, LedgerError>;

    /// Generations recorded for a remote operation; empty if none were
    async fn push_snapshot(&self, operation: &OperationId) -> Result<EntityVersions, LedgerError>;

    /// Counts entities grouped by change state
    async fn count_by_state(&self) -> Result<HashMap<ChangeState, u64>, LedgerError>;

    /// Removes tombstoned entities and dead or applied edges
    async fn purge_dead_or_applied(&self) -> Result<PurgeReport, LedgerError>;

    // --- Single-op conveniences ---

    /// Inserts or overwrites one entity's state
    async fn upsert(
        &self,
        type_name: &str,
        identifier: &str,
        state: ChangeState,
    ) -> Result<(), LedgerError> {
        self.apply(LedgerBatch::from(vec![LedgerOp::Upsert {
            type_name: type_name.to_string(),
            identifier: identifier.to_string(),
            state,
        }]))
        .await
    }

    /// Moves uploaded entities to `Synced` if they are still at the given
    /// generation
    async fn mark_synced(&self, versions: &EntityVersions) -> Result<(), LedgerError> {
        let ops = versions
            .iter()
            .map(|(identifier, &generation)| LedgerOp::SettleUpload {
                identifier: identifier.clone(),
                generation,
            })
            .collect::<Vec<_>>();
        self.apply(LedgerBatch::from(ops)).await
    }

    /// Tombstones deleted entities if they are still at the given generation
    async fn mark_deleted(&self, versions: &EntityVersions) -> Result<(), LedgerError> {
        let ops = versions
            .iter()
            .map(|(identifier, &generation)| LedgerOp::SettleDeletion {
                identifier: identifier.clone(),
                generation,
            })
            .collect::<Vec<_>>();
        self.apply(LedgerBatch::from(ops)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_builder() {
        let filter = EntityFilter::new()
            .with_states([ChangeState::New, ChangeState::Changed])
            .with_type("Pilot");
        assert_eq!(filter.states, vec![ChangeState::New, ChangeState::Changed]);
        assert_eq!(filter.type_name.as_deref(), Some("Pilot"));
    }

    #[test]
    fn test_batch_append() {
        let mut first = LedgerBatch::new();
        first.push(LedgerOp::SettleUpload {
            identifier: "p1".to_string(),
            generation: 0,
        });
        let mut second = LedgerBatch::from(vec![LedgerOp::SettleDeletion {
            identifier: "p2".to_string(),
            generation: 2,
        }]);

        first.append(&mut second);

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
    }
}
