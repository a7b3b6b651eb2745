//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for remote-side identifiers.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Zones
// ============================================================================

/// Identifier of a remote partition (zone)
///
/// Zones group records and are the unit of incremental-fetch change tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ZoneId(String);

impl ZoneId {
    /// Name of the zone every container provides out of the box
    pub const DEFAULT_NAME: &'static str = "_defaultZone";

    /// Create a new ZoneId
    ///
    /// # Errors
    /// Returns error if the name is empty or contains whitespace or `/`
    pub fn new(name: String) -> Result<Self, DomainError> {
        if name.is_empty() {
            return Err(DomainError::InvalidZone(
                "Zone name cannot be empty".to_string(),
            ));
        }

        if name.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(DomainError::InvalidZone(format!(
                "Zone name contains invalid characters: {name}"
            )));
        }

        Ok(Self(name))
    }

    /// The container's default zone
    #[must_use]
    pub fn default_zone() -> Self {
        Self(Self::DEFAULT_NAME.to_string())
    }

    /// Returns true for the container's default zone, which is never created
    /// or checked explicitly
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT_NAME
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ZoneId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ZoneId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ZoneId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ZoneId> for String {
    fn from(zone: ZoneId) -> Self {
        zone.0
    }
}

// ============================================================================
// Change tokens
// ============================================================================

/// Opaque cursor marking how much of a zone's or container's history has
/// been consumed
///
/// The remote store hands tokens out as raw bytes; they are persisted as
/// standard Base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    /// Create a new ChangeToken from raw bytes
    ///
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(bytes: Vec<u8>) -> Result<Self, DomainError> {
        if bytes.is_empty() {
            return Err(DomainError::InvalidChangeToken(
                "Change token cannot be empty".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    /// Decode a token previously produced by [`ChangeToken::encode`]
    ///
    /// # Errors
    /// Returns error if the text is not valid Base64 or decodes to nothing
    pub fn decode(encoded: &str) -> Result<Self, DomainError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| DomainError::InvalidChangeToken(format!("Invalid Base64: {e}")))?;
        Self::new(bytes)
    }

    /// Encode the token as Base64 text for persistence
    #[must_use]
    pub fn encode(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }

    /// Get the raw token bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for ChangeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

// ============================================================================
// Remote operations and subscriptions
// ============================================================================

/// Identifier of a long-running remote write operation
///
/// Assigned by the remote store; used to re-attach to an in-flight push
/// after a process restart instead of issuing it again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    /// Create a new OperationId
    ///
    /// # Errors
    /// Returns error if the identifier is empty
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.trim().is_empty() {
            return Err(DomainError::InvalidOperationId(
                "Operation ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for OperationId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

/// Identifier of a push-style change subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Create a new SubscriptionId
    ///
    /// # Errors
    /// Returns error if the identifier is empty
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "Subscription ID cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.0
    }
}
