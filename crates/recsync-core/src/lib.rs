//! recsync Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `SyncedEntity`, `PendingRelationship`, `LocalObject`, `Record`
//! - **Schema registry** - validated `TypeDescriptor`s for every tracked local type
//! - **Port definitions** - Traits for adapters: `ILedgerRepository`, `IRemoteRecordStore`,
//!   `ILocalObjectStore`, `IPreferenceStore`, `INotificationService`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure data and invariants with no I/O.
//! Ports define trait interfaces that adapter crates implement; the
//! reconciliation engine drives them.

pub mod config;
pub mod domain;
pub mod ports;
