use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use crate::check_wire_compatibility;
use crate::remaining_budget;
use crate::AddressFailure;
use crate::AllAddressesFailed;
use crate::BuildInfo;
use crate::ConnectError;
use crate::ConnectionState;
use crate::Connector;
use crate::ReadPreference;
use crate::Result;
use crate::SelectionError;
use crate::ServerInstance;
use crate::ServerProxy;
use crate::TopologyType;

/// Proxy bound to exactly one logical instance.
///
/// The configured address list is a failover chain for establishing the
/// initial connection only; there is no topology re-evaluation afterwards.
/// All mutating operations serialize through one exclusive gate so concurrent
/// callers collapse into a single physical attempt.
pub struct DirectProxy {
    addresses: Vec<String>,
    required_set_name: Option<String>,
    /// Implicit-connect budget used by `choose_instance`
    connect_timeout: Duration,
    instance: Arc<ServerInstance>,
    gate: Mutex<()>,
    attempt: AtomicU64,
    state: RwLock<ConnectionState>,
}

impl DirectProxy {
    pub fn new(
        addresses: Vec<String>,
        required_set_name: Option<String>,
        connect_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        debug_assert!(!addresses.is_empty(), "direct proxy needs at least one address");
        let first = addresses.first().cloned().unwrap_or_default();
        Self {
            addresses,
            required_set_name,
            connect_timeout,
            instance: Arc::new(ServerInstance::new(first, 0, connector)),
            gate: Mutex::new(()),
            attempt: AtomicU64::new(0),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    /// Binds a promoted proxy to the already-Connected discovery winner.
    /// Seeding the attempt counter keeps numbering continuous across the
    /// promotion.
    pub(crate) fn promoted(
        instance: Arc<ServerInstance>,
        attempt: u64,
        connect_timeout: Duration,
    ) -> Self {
        let state = instance.state();
        Self {
            addresses: vec![instance.address()],
            required_set_name: None,
            connect_timeout,
            instance,
            gate: Mutex::new(()),
            attempt: AtomicU64::new(attempt),
            state: RwLock::new(state),
        }
    }

    fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
            && self.instance.state() == ConnectionState::Connected
    }
}

#[async_trait]
impl ServerProxy for DirectProxy {
    async fn choose_instance(
        &self,
        read_preference: ReadPreference,
    ) -> Result<Arc<ServerInstance>> {
        // Read preference has no effect on a single-instance topology.
        if self.instance.state() != ConnectionState::Connected {
            self.connect(self.connect_timeout, read_preference).await?;
        }

        if self.instance.state() == ConnectionState::Connected {
            check_wire_compatibility(&self.instance)?;
            Ok(self.instance.clone())
        } else {
            Err(SelectionError::ConnectionUnavailable {
                reason: format!("instance {} is {:?}", self.instance.address(), self.instance.state()),
            }
            .into())
        }
    }

    async fn connect(
        &self,
        timeout: Duration,
        _read_preference: ReadPreference,
    ) -> Result<()> {
        // Fast path, no gate needed.
        if self.is_connected() {
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        // One increment per discovery cycle, not per address.
        self.attempt.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut failures: Vec<AddressFailure> = Vec::with_capacity(self.addresses.len());

        for address in &self.addresses {
            let remaining = remaining_budget(deadline);
            if remaining.is_zero() {
                // Overall deadline is authoritative: addresses reached after
                // it are recorded without any network attempt.
                failures.push(AddressFailure {
                    address: address.clone(),
                    error: ConnectError::Timeout {
                        address: address.clone(),
                        timeout,
                    },
                });
                continue;
            }

            self.instance.set_address(address.clone());
            match tokio::time::timeout(remaining, self.instance.connect()).await {
                Err(_elapsed) => {
                    let err = ConnectError::Timeout {
                        address: address.clone(),
                        timeout,
                    };
                    // The in-flight attempt was dropped with the future.
                    self.instance.fail(err.clone());
                    failures.push(AddressFailure {
                        address: address.clone(),
                        error: err,
                    });
                }
                Ok(Err(err)) => {
                    warn!(address = %address, %err, "Connect attempt failed");
                    failures.push(AddressFailure {
                        address: address.clone(),
                        error: err,
                    });
                }
                Ok(Ok(())) => {
                    if let Some(expected) = &self.required_set_name {
                        let actual = self.instance.set_name();
                        if actual.as_deref() != Some(expected.as_str()) {
                            let err = ConnectError::SetNameMismatch {
                                address: address.clone(),
                                expected: expected.clone(),
                                actual,
                            };
                            warn!(%err, "Rejecting node outside required replica set");
                            self.instance.disconnect().await;
                            self.instance.fail(err.clone());
                            failures.push(AddressFailure {
                                address: address.clone(),
                                error: err,
                            });
                            continue;
                        }
                    }

                    debug!(address = %self.instance.address(), "Direct connection established");
                    *self.state.write() = ConnectionState::Connected;
                    return Ok(());
                }
            }
        }

        *self.state.write() = ConnectionState::Disconnected;
        Err(AllAddressesFailed { failures }.into())
    }

    async fn disconnect(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        *self.state.write() = ConnectionState::Disconnecting;
        self.instance.disconnect().await;
        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        Ok(self.instance.ping().await?)
    }

    async fn verify_state(&self) -> Result<()> {
        // Nothing to verify while down.
        if matches!(
            *self.state.read(),
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        match self.instance.verify_state().await {
            Ok(()) => Ok(()),
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                Err(err.into())
            }
        }
    }

    fn topology(&self) -> TopologyType {
        TopologyType::Standalone
    }

    fn instances(&self) -> Vec<Arc<ServerInstance>> {
        vec![self.instance.clone()]
    }

    fn build_info(&self) -> Option<BuildInfo> {
        self.instance.build_info()
    }

    fn replica_set_name(&self) -> Option<String> {
        // Directly connecting to a set member is allowed; surface its set.
        self.instance.set_name()
    }

    fn connection_attempt(&self) -> u64 {
        self.attempt.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}
