// -
// Wire protocol compatibility window

/// Oldest server wire version this driver can talk to
pub(crate) const MIN_SUPPORTED_WIRE_VERSION: i32 = 4;
/// Newest server wire version this driver understands
pub(crate) const MAX_SUPPORTED_WIRE_VERSION: i32 = 9;

// -
// RPC surface consumed from the server

/// Full method path of the topology introspection handshake
pub(crate) const HELLO_RPC_PATH: &str = "/docdb.v1.Topology/Hello";

/// Service name probed through the standard gRPC health service
pub(crate) const HEALTH_PROBE_SERVICE: &str = "docdb.v1.Topology";
