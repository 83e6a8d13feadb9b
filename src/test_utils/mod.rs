//! Shared test components between unit tests across the topology modules.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tonic::async_trait;

use crate::ConnectError;
use crate::Connector;
use crate::DriverConfig;
use crate::HandshakeReply;
use crate::InstanceRole;

/// Scripted behavior for one address served by a [`StubConnector`].
#[derive(Clone)]
pub(crate) enum ProbeScript {
    /// Handshake succeeds with this reply after `delay`
    Success {
        reply: HandshakeReply,
        delay: Duration,
    },
    /// Handshake fails with this error after `delay`
    Failure {
        error: ConnectError,
        delay: Duration,
    },
}

/// Deterministic in-memory connector.
///
/// Each address is scripted up front; delays run on tokio's (possibly
/// paused) clock so races and deadlines are reproducible. Unscripted
/// addresses fail as unreachable.
pub(crate) struct StubConnector {
    scripts: DashMap<String, ProbeScript>,
    handshakes: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
}

impl StubConnector {
    pub(crate) fn new() -> Self {
        Self {
            scripts: DashMap::new(),
            handshakes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn script(
        &self,
        address: impl Into<String>,
        script: ProbeScript,
    ) {
        self.scripts.insert(address.into(), script);
    }

    pub(crate) fn succeed(
        &self,
        address: impl Into<String>,
        reply: HandshakeReply,
        delay: Duration,
    ) {
        self.script(address, ProbeScript::Success { reply, delay });
    }

    pub(crate) fn fail(
        &self,
        address: impl Into<String>,
        error: ConnectError,
        delay: Duration,
    ) {
        self.script(address, ProbeScript::Failure { error, delay });
    }

    /// Total handshakes issued, across all addresses
    pub(crate) fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub(crate) fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn handshake(
        &self,
        address: String,
    ) -> std::result::Result<HandshakeReply, ConnectError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.get(&address).map(|s| s.value().clone());
        match script {
            Some(ProbeScript::Success { reply, delay }) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            Some(ProbeScript::Failure { error, delay }) => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
            None => Err(ConnectError::Unreachable {
                address: address.clone(),
                reason: "no scripted behavior".to_string(),
            }),
        }
    }

    async fn ping(
        &self,
        address: String,
    ) -> std::result::Result<Duration, ConnectError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.get(&address).map(|s| s.value().clone());
        match script {
            Some(ProbeScript::Success { delay, .. }) => Ok(delay),
            Some(ProbeScript::Failure { error, .. }) => Err(error),
            None => Err(ConnectError::Unreachable {
                address,
                reason: "no scripted behavior".to_string(),
            }),
        }
    }

    async fn close(
        &self,
        _address: String,
    ) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn standalone_reply() -> HandshakeReply {
    HandshakeReply {
        role: InstanceRole::Standalone,
        version: "7.3.1".to_string(),
        min_wire_version: 4,
        max_wire_version: 9,
        set_name: None,
        hosts: Vec::new(),
        me: None,
        is_primary: true,
        arbiter_only: false,
    }
}

pub(crate) fn replica_member_reply(
    set_name: &str,
    hosts: &[&str],
    is_primary: bool,
) -> HandshakeReply {
    HandshakeReply {
        role: InstanceRole::ReplicaSetMember,
        version: "7.3.1".to_string(),
        min_wire_version: 4,
        max_wire_version: 9,
        set_name: Some(set_name.to_string()),
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        me: None,
        is_primary,
        arbiter_only: false,
    }
}

pub(crate) fn router_reply() -> HandshakeReply {
    HandshakeReply {
        role: InstanceRole::ShardRouter,
        version: "7.3.1".to_string(),
        min_wire_version: 4,
        max_wire_version: 9,
        set_name: None,
        hosts: Vec::new(),
        me: None,
        is_primary: false,
        arbiter_only: false,
    }
}

pub(crate) fn unreachable(address: &str) -> ConnectError {
    ConnectError::Unreachable {
        address: address.to_string(),
        reason: "connection refused".to_string(),
    }
}

pub(crate) fn test_config(seeds: &[&str]) -> DriverConfig {
    DriverConfig {
        seeds: seeds.iter().map(|s| s.to_string()).collect(),
        ..DriverConfig::default()
    }
}
