//! Remote record store port (driven/secondary port)
//!
//! This module defines the narrow async surface the sync driver needs from
//! the remote, schema-less record store: account status, zone provisioning,
//! token-bounded change fetch, long-running modify operations and push
//! subscriptions.
//!
//! ## Design Notes
//!
//! - Errors are classified with [`RemoteError`] because the driver's retry
//!   policy depends on the failure kind and the server's backoff hint.
//! - Modify operations are split into `submit_modify` and
//!   `await_operation` so an operation that outlives the process can be
//!   re-attached through `pending_operations` instead of being re-issued.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{ChangeToken, DeletedRecord, OperationId, Record, RecordId, SubscriptionId, ZoneId};

// ============================================================================
// AccountStatus
// ============================================================================

/// Availability of the user's remote account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Available,
    NoAccount,
    Restricted,
    CouldNotDetermine,
    TemporarilyUnavailable,
}

impl AccountStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, AccountStatus::Available)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Available => "available",
            AccountStatus::NoAccount => "no account",
            AccountStatus::Restricted => "restricted",
            AccountStatus::CouldNotDetermine => "could not determine",
            AccountStatus::TemporarilyUnavailable => "temporarily unavailable",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Errors raised by the remote record store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote account unavailable: {0}")]
    AccountInvalid(AccountStatus),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Zone busy (retry after {retry_after:?})")]
    ZoneBusy { retry_after: Option<Duration> },

    #[error("Service unavailable (retry after {retry_after:?})")]
    ServiceUnavailable { retry_after: Option<Duration> },

    #[error("Zone not found: {0}")]
    ZoneNotFound(ZoneId),

    #[error("Change token expired")]
    ChangeTokenExpired,

    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Server-supplied backoff hint, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after }
            | RemoteError::ZoneBusy { retry_after }
            | RemoteError::ServiceUnavailable { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns true for failures that may succeed when repeated later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. }
                | RemoteError::ZoneBusy { .. }
                | RemoteError::ServiceUnavailable { .. }
        )
    }

    /// Returns true for failures the host application should be told about
    pub fn requires_host_attention(&self) -> bool {
        matches!(
            self,
            RemoteError::AccountInvalid(_)
                | RemoteError::NetworkUnavailable(_)
                | RemoteError::ServiceUnavailable { .. }
        )
    }
}

// ============================================================================
// Fetch and modify DTOs
// ============================================================================

/// Container-level change summary
#[derive(Debug, Clone)]
pub struct DatabaseChanges {
    /// Zones with changes since the supplied token
    pub changed_zones: Vec<ZoneId>,
    /// Zones deleted remotely since the supplied token
    pub deleted_zones: Vec<ZoneId>,
    pub token: ChangeToken,
    pub more_coming: bool,
}

/// One page of changes within a zone
#[derive(Debug, Clone)]
pub struct ZoneChanges {
    pub modified: Vec<Record>,
    pub deleted: Vec<DeletedRecord>,
    pub token: ChangeToken,
    pub more_coming: bool,
}

/// Records to save and delete in one operation
///
/// Saves only send changed keys: fields absent from a record are left
/// untouched on the server.
#[derive(Debug, Clone, Default)]
pub struct ModifyRequest {
    pub save: Vec<Record>,
    pub delete: Vec<RecordId>,
}

impl ModifyRequest {
    pub fn is_empty(&self) -> bool {
        self.save.is_empty() && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.save.len() + self.delete.len()
    }
}

/// Result of a completed modify operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyOutcome {
    pub saved: Vec<RecordId>,
    pub deleted: Vec<RecordId>,
}

// ============================================================================
// IRemoteRecordStore trait
// ============================================================================

/// Port trait for the remote record store
///
/// ## Implementation Notes
///
/// - `fetch_*` with `None` starts from the beginning of history.
/// - `await_operation` may be called for an operation submitted by an
///   earlier process; it fails with `OperationNotFound` once the server
///   has forgotten the operation.
/// - `pending_operations` lists modify operations still in flight.
#[async_trait::async_trait]
pub trait IRemoteRecordStore: Send + Sync {
    async fn account_status(&self) -> Result<AccountStatus, RemoteError>;

    async fn zone_exists(&self, zone: &ZoneId) -> Result<bool, RemoteError>;

    async fn create_zone(&self, zone: &ZoneId) -> Result<(), RemoteError>;

    async fn fetch_database_changes(
        &self,
        since: Option<&ChangeToken>,
    ) -> Result<DatabaseChanges, RemoteError>;

    async fn fetch_zone_changes(
        &self,
        zone: &ZoneId,
        since: Option<&ChangeToken>,
    ) -> Result<ZoneChanges, RemoteError>;

    /// Starts a modify operation and returns its identifier
    async fn submit_modify(&self, request: ModifyRequest) -> Result<OperationId, RemoteError>;

    /// Waits for a modify operation to complete
    async fn await_operation(&self, id: &OperationId) -> Result<ModifyOutcome, RemoteError>;

    async fn pending_operations(&self) -> Result<Vec<OperationId>, RemoteError>;

    async fn save_subscription(&self, id: &SubscriptionId) -> Result<(), RemoteError>;

    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), RemoteError>;
}
