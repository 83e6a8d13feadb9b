use std::sync::Arc;
use std::time::Duration;

use tonic::async_trait;

use crate::constants::MAX_SUPPORTED_WIRE_VERSION;
use crate::constants::MIN_SUPPORTED_WIRE_VERSION;
use crate::BuildInfo;
use crate::ConnectionState;
use crate::ReadPreference;
use crate::Result;
use crate::SelectionError;
use crate::ServerInstance;
use crate::TopologyType;

/// Polymorphic proxy contract every topology variant implements.
///
/// Higher layers (queries, authentication, pool lifecycle) call
/// `choose_instance`/`connect` on whatever proxy they hold without knowing
/// which deployment shape they are running against. Advisory accessors never
/// block and never trigger discovery.
#[async_trait]
pub trait ServerProxy: Send + Sync + 'static {
    /// Returns a Connected, protocol-compatible instance for the requested
    /// read preference, connecting first when needed.
    async fn choose_instance(
        &self,
        read_preference: ReadPreference,
    ) -> Result<Arc<ServerInstance>>;

    /// Establishes the proxy's connection(s) within `timeout`. Concurrent
    /// callers collapse into one physical attempt.
    async fn connect(
        &self,
        timeout: Duration,
        read_preference: ReadPreference,
    ) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn ping(&self) -> Result<Duration>;

    /// Re-validates connection health and cached metadata accuracy
    async fn verify_state(&self) -> Result<()>;

    fn topology(&self) -> TopologyType;

    fn instances(&self) -> Vec<Arc<ServerInstance>>;

    fn build_info(&self) -> Option<BuildInfo>;

    /// Capability query: the replica set this proxy is bound to, `None`
    /// where not applicable. Replaces any runtime type inspection.
    fn replica_set_name(&self) -> Option<String>;

    /// Monotonic discovery-cycle counter; incremented once per cycle, never
    /// per per-address retry
    fn connection_attempt(&self) -> u64;

    fn state(&self) -> ConnectionState;
}

/// Validates that a chosen instance speaks a wire-version range this driver
/// supports.
pub(crate) fn check_wire_compatibility(instance: &ServerInstance) -> Result<()> {
    let info = instance.build_info().ok_or(SelectionError::ConnectionUnavailable {
        reason: format!("instance {} has no handshake metadata", instance.address()),
    })?;

    if info.min_wire_version > MAX_SUPPORTED_WIRE_VERSION
        || info.max_wire_version < MIN_SUPPORTED_WIRE_VERSION
    {
        return Err(SelectionError::IncompatibleServer {
            address: instance.address(),
            server_min: info.min_wire_version,
            server_max: info.max_wire_version,
            driver_min: MIN_SUPPORTED_WIRE_VERSION,
            driver_max: MAX_SUPPORTED_WIRE_VERSION,
        }
        .into());
    }

    Ok(())
}
