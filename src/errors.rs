//! Driver Error Hierarchy
//!
//! Defines error types for the topology-discovery and connection-proxying
//! core, categorized by the operation that raises them: per-instance
//! connection failures, aggregate connect failures, discovery failures and
//! server-selection failures.

use std::time::Duration;

use config::ConfigError;

use crate::InstanceRole;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Driver configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A single instance failed to connect, ping or re-verify
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Every configured address of a direct connection failed
    #[error(transparent)]
    AllAddressesFailed(#[from] AllAddressesFailed),

    /// Topology discovery could not resolve a concrete deployment shape
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// No usable server instance for the requested operation
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Failure of one connection attempt against one endpoint.
///
/// Retained on the probed [`ServerInstance`](crate::ServerInstance) so that
/// "why did this instance fail" can be answered later without re-probing;
/// `Clone` exists solely to support that retention.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectError {
    /// Malformed endpoint address
    #[error("Invalid endpoint address: {0}")]
    InvalidAddress(String),

    /// Transport-level connect failure
    #[error("Connect to {address} failed: {reason}")]
    Unreachable { address: String, reason: String },

    /// The attempt exceeded its time budget
    #[error("Connect to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// The endpoint answered but the introspection handshake failed
    #[error("Handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    /// The endpoint is up but reports itself as not serving
    #[error("Service at {address} is not ready: {status}")]
    ServiceUnavailable { address: String, status: String },

    /// The node belongs to a different replica set than the one required
    #[error("Node {address} reports replica set {actual:?}, expected {expected:?}")]
    SetNameMismatch {
        address: String,
        expected: String,
        actual: Option<String>,
    },

    /// A re-verification found the cached role/metadata no longer accurate
    #[error("Instance {address} changed identity: {detail}")]
    StateChanged { address: String, detail: String },
}

/// One entry of the per-address diagnostics carried by [`AllAddressesFailed`].
#[derive(Debug, Clone)]
pub struct AddressFailure {
    pub address: String,
    pub error: ConnectError,
}

/// Aggregate connect failure: every address in a direct proxy's list failed.
///
/// The first failure surfaces as the primary message; the full per-address
/// set is retained in `failures`, in address order, for diagnostics.
#[derive(Debug, thiserror::Error)]
#[error("Connect failed on all {} addresses, first: {}", .failures.len(), .failures.first().map(|f| f.error.to_string()).unwrap_or_else(|| "no addresses configured".into()))]
pub struct AllAddressesFailed {
    pub failures: Vec<AddressFailure>,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The race deadline elapsed with no successful probe
    #[error("Topology discovery timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Every seed probe completed and none succeeded
    #[error("No seed reachable, {} probes failed", .failures.len())]
    AllSeedsFailed { failures: Vec<AddressFailure> },

    /// The winning probe's role maps to no known topology variant
    #[error("Instance {address} reports role {role:?} which maps to no known topology")]
    IndeterminateTopology { address: String, role: InstanceRole },
}

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// No instance satisfies the requested read preference right now
    #[error("No usable server instance: {reason}")]
    ConnectionUnavailable { reason: String },

    /// The chosen server speaks a wire-version range this driver cannot
    #[error("Server {address} wire versions [{server_min}, {server_max}] incompatible with driver [{driver_min}, {driver_max}]")]
    IncompatibleServer {
        address: String,
        server_min: i32,
        server_max: i32,
        driver_min: i32,
        driver_max: i32,
    },
}
