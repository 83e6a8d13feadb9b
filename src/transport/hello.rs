use prost::Message;

use crate::InstanceRole;

/// Wire form of the topology introspection request.
#[derive(Clone, PartialEq, Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub client_name: String,

    #[prost(string, tag = "2")]
    pub client_version: String,
}

/// Wire form of the introspection reply.
#[derive(Clone, PartialEq, Message)]
pub struct HelloResponse {
    /// Self-reported role tag: "standalone", "replica_set_member" or
    /// "shard_router"
    #[prost(string, tag = "1")]
    pub role: String,

    #[prost(string, tag = "2")]
    pub version: String,

    #[prost(int32, tag = "3")]
    pub min_wire_version: i32,

    #[prost(int32, tag = "4")]
    pub max_wire_version: i32,

    /// Replica set name, present only on set members
    #[prost(string, optional, tag = "5")]
    pub set_name: Option<String>,

    /// Membership view as seen by this node
    #[prost(string, repeated, tag = "6")]
    pub hosts: Vec<String>,

    /// Canonical self-address, when it differs from the dialed one
    #[prost(string, optional, tag = "7")]
    pub me: Option<String>,

    #[prost(bool, tag = "8")]
    pub is_primary: bool,

    #[prost(bool, tag = "9")]
    pub arbiter_only: bool,
}

/// Decoded handshake record consumed by topology discovery.
///
/// Everything the discovery core knows about a server comes from here: the
/// role tag, version window, replica-set metadata and the canonical
/// self-address used for post-connect address correction.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReply {
    pub role: InstanceRole,
    pub version: String,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub set_name: Option<String>,
    pub hosts: Vec<String>,
    pub me: Option<String>,
    pub is_primary: bool,
    pub arbiter_only: bool,
}

impl From<HelloResponse> for HandshakeReply {
    fn from(resp: HelloResponse) -> Self {
        let role = classify_role(&resp);
        Self {
            role,
            version: resp.version,
            min_wire_version: resp.min_wire_version,
            max_wire_version: resp.max_wire_version,
            set_name: resp.set_name,
            hosts: resp.hosts,
            me: resp.me,
            is_primary: resp.is_primary,
            arbiter_only: resp.arbiter_only,
        }
    }
}

/// Maps the self-reported role tag onto a topology role.
///
/// A node that carries a replica-set name is treated as a set member even if
/// its role tag is missing or unrecognized; anything else unrecognized stays
/// `Unknown` and fails promotion later.
fn classify_role(resp: &HelloResponse) -> InstanceRole {
    match resp.role.as_str() {
        "standalone" => InstanceRole::Standalone,
        "replica_set_member" => InstanceRole::ReplicaSetMember,
        "shard_router" => InstanceRole::ShardRouter,
        _ if resp.set_name.is_some() => InstanceRole::ReplicaSetMember,
        _ => InstanceRole::Unknown,
    }
}
