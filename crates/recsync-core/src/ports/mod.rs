//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ILedgerRepository`] - Durable entity ledger and pending relationships
//! - [`IRemoteRecordStore`] - Remote schema-less record store
//! - [`ILocalObjectStore`] - Typed local object store
//! - [`IPreferenceStore`] - Persisted sync bookkeeping (tokens, flags)
//! - [`INotificationService`] - Host application notifications

pub mod ledger_repository;
pub mod notification;
pub mod object_store;
pub mod preferences;
pub mod record_store;

pub use ledger_repository::{
    EntityFilter, EntityVersions, ILedgerRepository, LedgerBatch, LedgerError, LedgerOp,
    PurgeReport,
};
pub use notification::{INotificationService, NotificationPriority, SyncNotification};
pub use object_store::{ChangeBatch, ILocalObjectStore, ObjectWrite, StoreCapabilities, WriteMode};
pub use preferences::IPreferenceStore;
pub use record_store::{
    AccountStatus, DatabaseChanges, IRemoteRecordStore, ModifyOutcome, ModifyRequest, RemoteError,
    ZoneChanges,
};
