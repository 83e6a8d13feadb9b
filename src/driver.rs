//! Driver entry point
//!
//! Provides the top-level handle applications hold:
//! - [`Driver`] - Main entry point over a discovered topology
//! - [`DriverBuilder`] - Configurable driver construction
//!
//! # Basic Usage
//! ```no_run
//! use docdb_driver::{Driver, ReadPreference};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let driver = Driver::builder(vec![
//!         "http://node1:27017".into(),
//!         "http://node2:27017".into(),
//!     ])
//!     .connect_timeout(Duration::from_secs(3))
//!     .discovery_timeout(Duration::from_secs(10))
//!     .build()
//!     .unwrap();
//!
//!     driver.connect().await.unwrap();
//!
//!     let instance = driver.proxy().choose_instance(ReadPreference::Primary).await.unwrap();
//!     println!("Selected {}", instance.address());
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::ConnectionState;
use crate::DiscoveringProxy;
use crate::DriverConfig;
use crate::GrpcConnector;
use crate::ReadPreference;
use crate::Result;
use crate::ServerProxy;
use crate::TopologyType;

/// Main entry point to a deployment whose shape is discovered lazily.
///
/// Cheap to clone; all clones share one underlying proxy, so concurrent
/// use from many tasks still collapses into a single discovery.
#[derive(Clone)]
pub struct Driver {
    proxy: Arc<DiscoveringProxy>,
    config: DriverConfig,
}

impl Driver {
    /// Create a configured driver builder
    ///
    /// # Arguments
    /// * `seeds` - Initial deployment addresses for discovery
    ///
    /// # Panics
    /// Will panic if no seed address is provided
    pub fn builder(seeds: Vec<String>) -> DriverBuilder {
        assert!(!seeds.is_empty(), "At least one seed address required");
        DriverBuilder::new(seeds)
    }

    /// The underlying topology proxy
    pub fn proxy(&self) -> &dyn ServerProxy {
        self.proxy.as_ref()
    }

    /// Resolve the topology and establish connections, bounded by the
    /// configured discovery timeout.
    pub async fn connect(&self) -> Result<()> {
        self.proxy
            .connect(self.config.discovery.discovery_timeout(), ReadPreference::Primary)
            .await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.proxy.disconnect().await
    }

    pub fn topology(&self) -> TopologyType {
        self.proxy.topology()
    }

    pub fn state(&self) -> ConnectionState {
        self.proxy.state()
    }
}

pub struct DriverBuilder {
    config: DriverConfig,
}

impl DriverBuilder {
    /// Create a new builder with default config and specified seeds
    pub fn new(seeds: Vec<String>) -> Self {
        Self {
            config: DriverConfig {
                seeds,
                ..DriverConfig::default()
            },
        }
    }

    /// Set per-address connection timeout (default: 1s)
    pub fn connect_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connection.connect_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Set request timeout (default: 3s)
    pub fn request_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.connection.request_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Set overall topology discovery timeout (default: 10s)
    pub fn discovery_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.discovery.discovery_timeout_in_ms = timeout.as_millis() as u64;
        self
    }

    /// Require membership in the named replica set
    pub fn replica_set(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.config.replica_set = Some(name.into());
        self
    }

    /// Completely replaces the default configuration
    ///
    /// # Warning: Configuration Override
    /// This will discard all previous settings configured through individual
    /// methods like [`connect_timeout`](DriverBuilder::connect_timeout) or
    /// [`replica_set`](DriverBuilder::replica_set), including the seed list.
    pub fn set_config(
        mut self,
        config: DriverConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Build the driver with current configuration
    ///
    /// Validates the configuration; no I/O happens until first use.
    pub fn build(self) -> Result<Driver> {
        self.config.validate()?;
        let connector = Arc::new(GrpcConnector::new(self.config.connection.clone()));
        let proxy = Arc::new(DiscoveringProxy::new(self.config.clone(), connector));
        Ok(Driver {
            proxy,
            config: self.config,
        })
    }
}
