//! Configuration module for recsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{ZonePolicy, DEFAULT_MAX_ATTEMPTS};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for recsync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

/// How tracked types are assigned to remote zones.
///
/// A caller-supplied mapping function has no YAML form; use
/// [`ZonePolicy::Custom`] programmatically instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonePolicyKind {
    /// Every type in the container's default zone.
    #[default]
    Default,
    /// One zone per type, named after the type.
    PerType,
    /// All types in the zone named by `shared_zone_name`.
    Shared,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub zone_policy: ZonePolicyKind,
    /// Zone used by the `shared` policy.
    pub shared_zone_name: Option<String>,
    /// Records per modify request.
    pub push_batch_size: usize,
    /// Seconds between periodic pulls.
    pub poll_interval: u64,
    /// Failed resolution attempts after which a pending relationship is dead.
    pub max_relationship_attempts: u32,
    /// Version stamped on every outbound record.
    pub schema_version: i64,
    /// Stable identifier of the push subscription.
    pub subscription_id: String,
}

/// Ledger storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/recsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("recsync")
            .join("config.yaml")
    }
}

impl SyncConfig {
    /// The zone policy described by this section.
    pub fn zone_policy(&self) -> ZonePolicy {
        match self.zone_policy {
            ZonePolicyKind::Default => ZonePolicy::Default,
            ZonePolicyKind::PerType => ZonePolicy::PerType,
            ZonePolicyKind::Shared => {
                ZonePolicy::Shared(self.shared_zone_name.clone().unwrap_or_default())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            zone_policy: ZonePolicyKind::Default,
            shared_zone_name: None,
            push_batch_size: 400,
            poll_interval: 300,
            max_relationship_attempts: DEFAULT_MAX_ATTEMPTS,
            schema_version: 1,
            subscription_id: "recsync-private-changes".to_string(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("recsync")
                .join("ledger.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.poll_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.push_batch_size == 0 {
            errors.push(ValidationError {
                field: "sync.push_batch_size".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.poll_interval == 0 {
            errors.push(ValidationError {
                field: "sync.poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_relationship_attempts == 0 {
            errors.push(ValidationError {
                field: "sync.max_relationship_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.schema_version < 0 {
            errors.push(ValidationError {
                field: "sync.schema_version".into(),
                message: "must not be negative".into(),
            });
        }
        if self.sync.subscription_id.trim().is_empty() {
            errors.push(ValidationError {
                field: "sync.subscription_id".into(),
                message: "must not be empty".into(),
            });
        }
        if self.sync.zone_policy == ZonePolicyKind::Shared {
            let name = self.sync.shared_zone_name.as_deref().unwrap_or("");
            if crate::domain::ZoneId::new(name.to_string()).is_err() {
                errors.push(ValidationError {
                    field: "sync.shared_zone_name".into(),
                    message: format!("invalid zone name for shared policy: {name:?}"),
                });
            }
        }

        // --- ledger ---
        if self.ledger.database_path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "ledger.database_path".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid log level '{}'; expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for programmatic construction of a [`Config`].
///
/// Starts from [`Config::default`] and lets callers override individual fields.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder pre-filled with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn zone_policy(mut self, kind: ZonePolicyKind) -> Self {
        self.config.sync.zone_policy = kind;
        self
    }

    pub fn shared_zone_name(mut self, name: impl Into<String>) -> Self {
        self.config.sync.shared_zone_name = Some(name.into());
        self
    }

    pub fn push_batch_size(mut self, size: usize) -> Self {
        self.config.sync.push_batch_size = size;
        self
    }

    pub fn poll_interval(mut self, seconds: u64) -> Self {
        self.config.sync.poll_interval = seconds;
        self
    }

    pub fn max_relationship_attempts(mut self, attempts: u32) -> Self {
        self.config.sync.max_relationship_attempts = attempts;
        self
    }

    pub fn schema_version(mut self, version: i64) -> Self {
        self.config.sync.schema_version = version;
        self
    }

    pub fn subscription_id(mut self, id: impl Into<String>) -> Self {
        self.config.sync.subscription_id = id.into();
        self
    }

    // --- ledger ---

    pub fn database_path(mut self, path: PathBuf) -> Self {
        self.config.ledger.database_path = path;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
