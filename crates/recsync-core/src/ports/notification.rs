//! Host notification port (driven/secondary port)
//!
//! This module defines how the sync driver tells the host application that
//! sync cannot proceed, so it can react (for example by disabling sync or
//! prompting the user to sign in).
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because delivery is adapter-specific.
//! - Notifications are fire-and-forget; a delivery failure is logged by the
//!   caller and never aborts sync bookkeeping.

use serde::{Deserialize, Serialize};

use crate::ports::record_store::AccountStatus;

/// Priority level for a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Conditions the host application is told about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotification {
    /// The remote account cannot be used
    AccountUnavailable { status: AccountStatus },
    /// The remote store cannot be reached
    RemoteUnavailable { reason: String },
}

impl SyncNotification {
    /// Short title suitable for a banner
    pub fn title(&self) -> &'static str {
        match self {
            SyncNotification::AccountUnavailable { .. } => "Sync account unavailable",
            SyncNotification::RemoteUnavailable { .. } => "Sync service unreachable",
        }
    }

    /// Human-readable detail
    pub fn body(&self) -> String {
        match self {
            SyncNotification::AccountUnavailable { status } => {
                format!("The remote account is {status}; sync is paused.")
            }
            SyncNotification::RemoteUnavailable { reason } => {
                format!("Could not reach the remote store: {reason}")
            }
        }
    }

    pub fn priority(&self) -> NotificationPriority {
        match self {
            SyncNotification::AccountUnavailable { .. } => NotificationPriority::High,
            SyncNotification::RemoteUnavailable { .. } => NotificationPriority::Normal,
        }
    }
}

/// Port trait for process-wide host notifications
#[async_trait::async_trait]
pub trait INotificationService: Send + Sync {
    /// Delivers a notification to the host application
    async fn notify(&self, notification: &SyncNotification) -> anyhow::Result<()>;
}
