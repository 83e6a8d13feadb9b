//! Driver configuration.
//!
//! Provides layered configuration loading with priority:
//! 1. Default values (hardcoded)
//! 2. Optional config file
//! 3. Environment variables with the `DOCDB` prefix (highest priority)

mod connection;
mod discovery;
pub use connection::*;
pub use discovery::*;


use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Top-level driver settings snapshot.
///
/// Captured once when a proxy is constructed; proxies never observe later
/// mutations of the source the snapshot was loaded from.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DriverConfig {
    /// Seed addresses used to bootstrap topology discovery.
    ///
    /// Seeds are not guaranteed to remain part of the resolved topology.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Required replica set name; when set, nodes belonging to a different
    /// set are rejected during connect
    #[serde(default)]
    pub replica_set: Option<String>,

    /// Transport-level connection tuning
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Topology discovery race tuning
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            replica_set: None,
            connection: ConnectionConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from an optional file path layered under
    /// `DOCDB`-prefixed environment variables.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("DOCDB")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("seeds"),
        );

        let settings: Self = builder.build()?.try_deserialize::<Self>().map_err(Error::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the combined configuration
    pub fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            return Err(ConfigError::Message("at least one seed address is required".into()).into());
        }
        if let Some(name) = &self.replica_set {
            if name.is_empty() {
                return Err(ConfigError::Message("replica_set must not be empty when set".into()).into());
            }
        }
        self.connection.validate()?;
        self.discovery.validate()?;
        Ok(())
    }
}
