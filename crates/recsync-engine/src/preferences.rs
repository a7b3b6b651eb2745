//! Typed access to persisted sync state
//!
//! Change tokens, bootstrap flags, the subscription flag and zone
//! provisioning flags live in the host's [`IPreferenceStore`] under stable
//! string keys. Everything is wiped together by [`SyncPreferences::clear_all`].

use std::sync::Arc;

use tracing::warn;

use recsync_core::domain::{ChangeToken, ZoneId};
use recsync_core::ports::IPreferenceStore;

use crate::SyncError;

const DATABASE_TOKEN_KEY: &str = "recsync.database_change_token";
const ZONE_TOKEN_PREFIX: &str = "recsync.zone_change_token.";
const BOOTSTRAPPED_PREFIX: &str = "recsync.bootstrapped.";
const SUBSCRIPTION_KEY: &str = "recsync.subscription_active";
const ZONE_PROVISIONED_PREFIX: &str = "recsync.zone_provisioned.";

const TRUE: &str = "1";

/// Typed facade over the preference store
#[derive(Clone)]
pub struct SyncPreferences {
    store: Arc<dyn IPreferenceStore>,
}

impl SyncPreferences {
    pub fn new(store: Arc<dyn IPreferenceStore>) -> Self {
        Self { store }
    }

    // --- Change tokens ---

    pub async fn database_token(&self) -> Result<Option<ChangeToken>, SyncError> {
        self.token(DATABASE_TOKEN_KEY).await
    }

    pub async fn set_database_token(&self, token: &ChangeToken) -> Result<(), SyncError> {
        self.set(DATABASE_TOKEN_KEY, &token.encode()).await
    }

    pub async fn zone_token(&self, zone: &ZoneId) -> Result<Option<ChangeToken>, SyncError> {
        self.token(&zone_token_key(zone)).await
    }

    pub async fn set_zone_token(&self, zone: &ZoneId, token: &ChangeToken) -> Result<(), SyncError> {
        self.set(&zone_token_key(zone), &token.encode()).await
    }

    pub async fn clear_zone_token(&self, zone: &ZoneId) -> Result<(), SyncError> {
        self.remove(&zone_token_key(zone)).await
    }

    // --- Flags ---

    pub async fn is_bootstrapped(&self, type_name: &str) -> Result<bool, SyncError> {
        self.flag(&format!("{BOOTSTRAPPED_PREFIX}{type_name}")).await
    }

    pub async fn set_bootstrapped(&self, type_name: &str) -> Result<(), SyncError> {
        self.set(&format!("{BOOTSTRAPPED_PREFIX}{type_name}"), TRUE)
            .await
    }

    pub async fn is_subscription_active(&self) -> Result<bool, SyncError> {
        self.flag(SUBSCRIPTION_KEY).await
    }

    pub async fn set_subscription_active(&self, active: bool) -> Result<(), SyncError> {
        if active {
            self.set(SUBSCRIPTION_KEY, TRUE).await
        } else {
            self.remove(SUBSCRIPTION_KEY).await
        }
    }

    pub async fn is_zone_provisioned(&self, zone: &ZoneId) -> Result<bool, SyncError> {
        self.flag(&zone_provisioned_key(zone)).await
    }

    pub async fn set_zone_provisioned(&self, zone: &ZoneId, provisioned: bool) -> Result<(), SyncError> {
        if provisioned {
            self.set(&zone_provisioned_key(zone), TRUE).await
        } else {
            self.remove(&zone_provisioned_key(zone)).await
        }
    }

    /// Forgets every token and flag ("switch off")
    pub async fn clear_all(&self) -> Result<(), SyncError> {
        self.store.clear().await.map_err(SyncError::Preferences)
    }

    // --- Raw access ---

    async fn token(&self, key: &str) -> Result<Option<ChangeToken>, SyncError> {
        let Some(encoded) = self.get(key).await? else {
            return Ok(None);
        };
        match ChangeToken::decode(&encoded) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                // An unreadable token only costs a full refetch.
                warn!(key, error = %e, "Discarding unreadable change token");
                Ok(None)
            }
        }
    }

    async fn flag(&self, key: &str) -> Result<bool, SyncError> {
        Ok(self.get(key).await?.as_deref() == Some(TRUE))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        self.store.get(key).await.map_err(SyncError::Preferences)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        self.store.set(key, value).await.map_err(SyncError::Preferences)
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.store.remove(key).await.map_err(SyncError::Preferences)
    }
}

fn zone_token_key(zone: &ZoneId) -> String {
    format!("{ZONE_TOKEN_PREFIX}{zone}")
}

fn zone_provisioned_key(zone: &ZoneId) -> String {
    format!("{ZONE_PROVISIONED_PREFIX}{zone}")
}
