//! recsync Engine - Change tracking and reconciliation
//!
//! Provides:
//! - Object↔record conversion with relationship flattening
//! - Ledger bookkeeping of local changes and upload-set generation
//! - Ingestion of remote changes and deferred relationship resolution
//! - The pull/push driver with change tokens, retry and resumable pushes
//!
//! ## Modules
//!
//! - [`converter`] - Maps `LocalObject`s to `Record`s and back
//! - [`reconciler`] - Reconciliation engine owning the ledger
//! - [`driver`] - Sync driver running the pull/push protocol
//! - [`preferences`] - Typed access to persisted tokens and flags
//! - [`logging`] - `tracing` subscriber setup

pub mod converter;
pub mod driver;
pub mod logging;
pub mod preferences;
pub mod reconciler;
mod retry;

pub use converter::{ConversionSkip, Converter, InboundObject};
pub use driver::{PullSummary, PushSummary, StartSummary, SyncDriver};
pub use preferences::SyncPreferences;
pub use reconciler::{
    IngestReport, LifecycleHooks, Reconciler, RelationshipError, ResolutionReport, UploadBatch,
    UploadSet,
};

use thiserror::Error;

use recsync_core::domain::{ConfigurationFault, DomainError};
use recsync_core::ports::{LedgerError, RemoteError};

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A tracked type cannot be synchronized; fatal at startup
    #[error("Configuration fault: {0}")]
    Configuration(#[from] ConfigurationFault),

    /// A ledger transaction was aborted
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The remote store rejected or could not serve a request
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The local object store failed
    #[error("Local store error: {0}")]
    LocalStore(#[source] anyhow::Error),

    /// Persisted preferences could not be read or written
    #[error("Preference store error: {0}")]
    Preferences(#[source] anyhow::Error),

    /// A domain-level validation error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// The operation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// The remote error behind this failure, if any
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(e) => Some(e),
            _ => None,
        }
    }
}
