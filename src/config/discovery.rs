use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Tuning for the seed-probing discovery race.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Hard deadline for one discovery race in milliseconds.
    ///
    /// Once elapsed the coordinator stops waiting; in-flight probes are
    /// abandoned, not cancelled.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_in_ms: u64,

    /// How long a promoted proxy waits on one drain of leftover probe
    /// results, in milliseconds
    #[serde(default = "default_absorb_interval")]
    pub absorb_interval_in_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_in_ms: default_discovery_timeout(),
            absorb_interval_in_ms: default_absorb_interval(),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.discovery_timeout_in_ms == 0 {
            return Err(ConfigError::Message("discovery timeout must be > 0".into()).into());
        }
        if self.absorb_interval_in_ms == 0 {
            return Err(ConfigError::Message("absorb interval must be > 0".into()).into());
        }
        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_in_ms)
    }

    pub fn absorb_interval(&self) -> Duration {
        Duration::from_millis(self.absorb_interval_in_ms)
    }
}

fn default_discovery_timeout() -> u64 {
    10_000
}
fn default_absorb_interval() -> u64 {
    500
}
