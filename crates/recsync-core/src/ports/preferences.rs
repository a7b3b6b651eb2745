//! Persisted preferences port (driven/secondary port)
//!
//! A small string key/value store for sync bookkeeping: change tokens,
//! bootstrap flags and subscription state. Values survive restarts and are
//! cleared wholesale when sync is switched off.
//!
//! Uses `anyhow::Result` because storage errors are adapter-specific.

/// Port trait for persisted key/value preferences
#[async_trait::async_trait]
pub trait IPreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Inserts or overwrites a value
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    async fn remove(&self, key: &str) -> anyhow::Result<()>;

    /// Removes every stored preference
    async fn clear(&self) -> anyhow::Result<()>;
}
