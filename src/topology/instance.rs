use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;
use tracing::warn;

use crate::BuildInfo;
use crate::ConnectError;
use crate::ConnectionState;
use crate::Connector;
use crate::HandshakeReply;
use crate::InstanceRole;

/// One network endpoint owned by exactly one proxy.
///
/// The instance drives its own connection attempt, health state and cached
/// handshake metadata. It is not internally reentrant-safe against concurrent
/// connects; the owning proxy serializes mutating operations, and at most one
/// physical connect attempt is in flight per instance at any time.
pub struct ServerInstance {
    /// Stable slot in the owning proxy's instance list
    slot: usize,
    connector: Arc<dyn Connector>,
    desc: RwLock<Descriptor>,
}

/// Mutable descriptor: address, state and Connected-only metadata.
///
/// Role and address are written together under the same lock so readers never
/// observe a torn pair.
struct Descriptor {
    address: String,
    state: ConnectionState,
    reply: Option<HandshakeReply>,
    latency: Option<Duration>,
    last_error: Option<ConnectError>,
}

impl ServerInstance {
    pub fn new(
        address: impl Into<String>,
        slot: usize,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            slot,
            connector,
            desc: RwLock::new(Descriptor {
                address: address.into(),
                state: ConnectionState::Disconnected,
                reply: None,
                latency: None,
                last_error: None,
            }),
        }
    }

    /// Performs the handshake that yields role/version/replica-set metadata.
    ///
    /// No-op success when already Connected. A call that observes an
    /// in-progress attempt returns without starting a second physical one.
    /// Failures are retained on the instance and propagated to the caller.
    pub async fn connect(&self) -> std::result::Result<(), ConnectError> {
        let address = {
            let mut desc = self.desc.write();
            match desc.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    debug!(address = %desc.address, "Connect already in flight");
                    return Ok(());
                }
                _ => {}
            }
            desc.state = ConnectionState::Connecting;
            desc.last_error = None;
            desc.address.clone()
        };

        match self.connector.handshake(address.clone()).await {
            Ok(reply) => {
                let mut desc = self.desc.write();
                if let Some(me) = reply.me.as_deref() {
                    if me != desc.address {
                        debug!(dialed = %desc.address, canonical = %me, "Adopting canonical self-address");
                        desc.address = me.to_string();
                    }
                }
                desc.reply = Some(reply);
                desc.state = ConnectionState::Connected;
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Transitions to Disconnected and releases the transport.
    ///
    /// Safe to call from any state; a no-op when already Disconnected.
    pub async fn disconnect(&self) {
        let address = {
            let mut desc = self.desc.write();
            if matches!(
                desc.state,
                ConnectionState::Disconnected | ConnectionState::Disconnecting
            ) {
                return;
            }
            desc.state = ConnectionState::Disconnecting;
            desc.address.clone()
        };

        self.connector.close(address).await;

        let mut desc = self.desc.write();
        desc.state = ConnectionState::Disconnected;
        desc.reply = None;
    }

    /// Lightweight round trip. A failed ping is recorded but does not itself
    /// force a disconnect; that decision belongs to the caller.
    pub async fn ping(&self) -> std::result::Result<Duration, ConnectError> {
        let address = self.address();
        match self.connector.ping(address).await {
            Ok(latency) => {
                self.desc.write().latency = Some(latency);
                Ok(latency)
            }
            Err(err) => {
                self.desc.write().last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Re-validates that a Connected instance is still healthy and that its
    /// cached role and set name are still accurate. Transitions to
    /// Disconnected on failure or identity change.
    pub async fn verify_state(&self) -> std::result::Result<(), ConnectError> {
        let (address, cached) = {
            let desc = self.desc.read();
            if desc.state != ConnectionState::Connected {
                return Ok(());
            }
            (desc.address.clone(), desc.reply.clone())
        };

        match self.connector.handshake(address.clone()).await {
            Ok(fresh) => {
                let stale = match &cached {
                    Some(cached) => cached.role != fresh.role || cached.set_name != fresh.set_name,
                    None => true,
                };
                if stale {
                    let err = ConnectError::StateChanged {
                        address,
                        detail: format!(
                            "role is now {:?}, set {:?}",
                            fresh.role, fresh.set_name
                        ),
                    };
                    warn!(%err, "Instance failed re-verification");
                    self.fail(err.clone());
                    return Err(err);
                }
                self.desc.write().reply = Some(fresh);
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Records a failure and resets to Disconnected. Used both for handshake
    /// failures and for attempts abandoned by the owner's deadline.
    pub(crate) fn fail(
        &self,
        err: ConnectError,
    ) {
        let mut desc = self.desc.write();
        desc.state = ConnectionState::Disconnected;
        desc.reply = None;
        desc.last_error = Some(err);
    }

    /// Points the instance at a different address before a connect attempt.
    pub(crate) fn set_address(
        &self,
        address: String,
    ) {
        self.desc.write().address = address;
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn address(&self) -> String {
        self.desc.read().address.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.desc.read().state
    }

    /// Detected role; `Unknown` unless Connected
    pub fn role(&self) -> InstanceRole {
        self.desc
            .read()
            .reply
            .as_ref()
            .map(|r| r.role)
            .unwrap_or_default()
    }

    pub fn set_name(&self) -> Option<String> {
        self.desc.read().reply.as_ref().and_then(|r| r.set_name.clone())
    }

    /// Membership view reported by this node, empty unless Connected
    pub fn member_hosts(&self) -> Vec<String> {
        self.desc
            .read()
            .reply
            .as_ref()
            .map(|r| r.hosts.clone())
            .unwrap_or_default()
    }

    pub fn is_primary(&self) -> bool {
        self.desc
            .read()
            .reply
            .as_ref()
            .map(|r| r.is_primary)
            .unwrap_or(false)
    }

    pub fn is_arbiter(&self) -> bool {
        self.desc
            .read()
            .reply
            .as_ref()
            .map(|r| r.arbiter_only)
            .unwrap_or(false)
    }

    pub fn build_info(&self) -> Option<BuildInfo> {
        self.desc.read().reply.as_ref().map(|r| BuildInfo {
            version: r.version.clone(),
            min_wire_version: r.min_wire_version,
            max_wire_version: r.max_wire_version,
        })
    }

    /// Why the last attempt failed, without re-probing
    pub fn last_error(&self) -> Option<ConnectError> {
        self.desc.read().last_error.clone()
    }

    pub fn latency(&self) -> Option<Duration> {
        self.desc.read().latency
    }
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let desc = self.desc.read();
        f.debug_struct("ServerInstance")
            .field("slot", &self.slot)
            .field("address", &desc.address)
            .field("state", &desc.state)
            .field("role", &desc.reply.as_ref().map(|r| r.role))
            .finish()
    }
}
