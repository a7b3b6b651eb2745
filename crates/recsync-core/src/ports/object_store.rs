//! Local object store port (driven/secondary port)
//!
//! This module defines the interface to the application's typed local
//! store: primary-key lookup, atomic write scopes, change observation and
//! a capability check used at registration.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - Writes made with [`WriteMode::Silent`] must not be delivered to
//!   observers; the engine uses it when writing back remote data so its
//!   own writes never come back as local changes.

use tokio::sync::mpsc;

use crate::domain::LocalObject;

/// Whether observers see a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Observers receive the change
    Notify,
    /// Observers are not told about the change
    Silent,
}

/// One write inside a [`ILocalObjectStore::commit`] scope
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectWrite {
    /// Insert or replace an object
    Put(LocalObject),
    /// Remove an object by primary key; a missing object is not an error
    Delete {
        type_name: String,
        primary_key: String,
    },
}

/// A batch of changes to one collection, as seen by an observer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub type_name: String,
    pub inserted: Vec<LocalObject>,
    pub updated: Vec<LocalObject>,
    /// Primary keys of objects removed from the store
    pub deleted: Vec<String>,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// What the store allows for a collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// Application code may physically delete objects without going through
    /// the engine
    pub hard_delete_outside_engine: bool,
}

/// Port trait for the typed local object store
#[async_trait::async_trait]
pub trait ILocalObjectStore: Send + Sync {
    /// Retrieves an object by type and primary key
    async fn get(&self, type_name: &str, primary_key: &str)
        -> anyhow::Result<Option<LocalObject>>;

    /// Retrieves every object of a type
    async fn all(&self, type_name: &str) -> anyhow::Result<Vec<LocalObject>>;

    /// Applies all writes in one store transaction
    async fn commit(&self, writes: Vec<ObjectWrite>, mode: WriteMode) -> anyhow::Result<()>;

    /// Subscribes to insert/update/delete batches of a collection
    async fn observe(&self, type_name: &str) -> anyhow::Result<mpsc::Receiver<ChangeBatch>>;

    /// Reports what the store permits for a collection
    fn capabilities(&self, type_name: &str) -> StoreCapabilities;

    /// Inserts or replaces one object
    async fn put(&self, object: LocalObject, mode: WriteMode) -> anyhow::Result<()> {
        self.commit(vec![ObjectWrite::Put(object)], mode).await
    }

    /// Removes one object
    async fn delete(&self, type_name: &str, primary_key: &str, mode: WriteMode) -> anyhow::Result<()> {
        self.commit(
            vec![ObjectWrite::Delete {
                type_name: type_name.to_string(),
                primary_key: primary_key.to_string(),
            }],
            mode,
        )
        .await
    }
}
