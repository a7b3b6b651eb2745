//! recsync Cache - Local ledger persistence
//!
//! SQLite-based storage for:
//! - The entity ledger (`synced_entities`)
//! - Deferred relationship edges (`pending_relationships`)
//! - Sync preferences: change tokens and flags (`preferences`)
//!
//! ## Architecture
//!
//! This crate implements the `ILedgerRepository` and `IPreferenceStore`
//! ports from `recsync-core` using SQLite as the storage backend. It is a
//! driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteLedgerRepository`] - `ILedgerRepository` with transactional batches
//! - [`SqlitePreferenceStore`] - `IPreferenceStore` key/value table
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use recsync_cache::{DatabasePool, SqliteLedgerRepository, SqlitePreferenceStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/recsync/ledger.db")).await?;
//! let ledger = SqliteLedgerRepository::new(pool.pool().clone());
//! let prefs = SqlitePreferenceStore::new(pool.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod preferences;
pub mod repository;

pub use pool::DatabasePool;
pub use preferences::SqlitePreferenceStore;
pub use repository::SqliteLedgerRepository;

use recsync_core::ports::LedgerError;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<CacheError> for LedgerError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::SerializationError(msg) => LedgerError::Corrupt(msg),
            other => LedgerError::ReadFailed(other.to_string()),
        }
    }
}
