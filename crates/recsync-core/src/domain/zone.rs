//! Zone assignment
//!
//! A [`ZonePolicy`] decides which remote zone holds the records of each
//! tracked type. The policy is resolved once against the schema registry
//! into a [`ZoneMap`]; changing it after data exists is unsupported because
//! existing record identifiers would no longer resolve.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::errors::ConfigurationFault;
use super::newtypes::ZoneId;
use super::schema::SchemaRegistry;

/// Caller-supplied mapping from a type name to a zone
pub type ZoneFn = Arc<dyn Fn(&str) -> ZoneId + Send + Sync>;

/// How tracked types are mapped to remote zones
#[derive(Clone, Default)]
pub enum ZonePolicy {
    /// Every type lives in the container's default zone
    #[default]
    Default,
    /// Each type gets a zone named after the type
    PerType,
    /// All types share one named zone
    Shared(String),
    /// Arbitrary caller-supplied mapping
    Custom(ZoneFn),
}

impl fmt::Debug for ZonePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZonePolicy::Default => write!(f, "Default"),
            ZonePolicy::PerType => write!(f, "PerType"),
            ZonePolicy::Shared(name) => f.debug_tuple("Shared").field(name).finish(),
            ZonePolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl ZonePolicy {
    /// Resolves the zone of every registered type
    ///
    /// # Errors
    /// Returns [`ConfigurationFault::InvalidZone`] if the policy yields a name
    /// that is not a valid zone.
    pub fn resolve(&self, registry: &SchemaRegistry) -> Result<ZoneMap, ConfigurationFault> {
        let mut by_type = BTreeMap::new();
        for type_name in registry.type_names() {
            let zone = match self {
                ZonePolicy::Default => ZoneId::default_zone(),
                ZonePolicy::PerType => ZoneId::new(type_name.to_string()).map_err(|e| {
                    ConfigurationFault::InvalidZone {
                        type_name: type_name.to_string(),
                        reason: e.to_string(),
                    }
                })?,
                ZonePolicy::Shared(name) => ZoneId::new(name.clone()).map_err(|e| {
                    ConfigurationFault::InvalidZone {
                        type_name: type_name.to_string(),
                        reason: e.to_string(),
                    }
                })?,
                ZonePolicy::Custom(f) => f(type_name),
            };
            by_type.insert(type_name.to_string(), zone);
        }
        Ok(ZoneMap { by_type })
    }
}

/// Resolved zone of every tracked type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneMap {
    by_type: BTreeMap<String, ZoneId>,
}

impl ZoneMap {
    pub fn zone_for(&self, type_name: &str) -> Option<&ZoneId> {
        self.by_type.get(type_name)
    }

    /// Distinct zones in use
    pub fn zones(&self) -> BTreeSet<ZoneId> {
        self.by_type.values().cloned().collect()
    }

    /// Types whose records live in `zone`
    pub fn types_in<'a>(&'a self, zone: &'a ZoneId) -> impl Iterator<Item = &'a str> + 'a {
        self.by_type
            .iter()
            .filter(move |(_, z)| *z == zone)
            .map(|(t, _)| t.as_str())
    }
}
