//! Topology discovery and connection proxying.
//!
//! This module:
//! - Models one endpoint per [`ServerInstance`] with its own connection
//!   state machine and retained failure
//! - Races concurrent seed probes through a deadline-bounded
//!   [`ProbeRaceQueue`]
//! - Presents one polymorphic [`ServerProxy`] contract over every deployment
//!   shape
//! - Promotes the unknown-topology [`DiscoveringProxy`] exactly once into a
//!   concrete variant ([`DirectProxy`], [`ReplicaSetProxy`] or
//!   [`ShardedProxy`]) the first time a connection is actually needed
//!
//! Callers hold a proxy, never raw connections; `choose_instance` is the only
//! entry point the query and auth layers need.

mod direct;
mod discovering;
mod instance;
mod proxy;
mod race;
mod replica_set;
mod sharded;

pub use direct::*;
pub use discovering::*;
pub use instance::*;
pub use proxy::*;
pub use race::*;
pub use replica_set::*;
pub use sharded::*;

#[cfg(test)]
mod discovering_test;

use std::time::Duration;

/// Deployment shape as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopologyType {
    #[default]
    Unknown,
    Standalone,
    ReplicaSet,
    Sharded,
}

/// Role one server reports for itself during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InstanceRole {
    #[default]
    Unknown,
    Standalone,
    ReplicaSetMember,
    ShardRouter,
}

/// Lifecycle state shared by instances and proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Read routing preference, an input to server selection.
///
/// Only topology-aware proxies act on it; a single-instance topology accepts
/// it for interface symmetry and ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// Server build metadata captured from the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: String,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
}

/// Remaining budget until `deadline`, zero once it has passed.
pub(crate) fn remaining_budget(deadline: tokio::time::Instant) -> Duration {
    deadline.saturating_duration_since(tokio::time::Instant::now())
}
