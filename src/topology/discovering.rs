use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::remaining_budget;
use crate::AddressFailure;
use crate::BuildInfo;
use crate::ConnectError;
use crate::ConnectionState;
use crate::Connector;
use crate::DirectProxy;
use crate::DiscoveryError;
use crate::DriverConfig;
use crate::InstanceRole;
use crate::ProbeRaceQueue;
use crate::ReadPreference;
use crate::ReplicaSetProxy;
use crate::Result;
use crate::SelectionError;
use crate::ServerInstance;
use crate::ServerProxy;
use crate::ShardedProxy;
use crate::TopologyType;

use super::race::ProbeTicketQueue;

/// Concrete proxy a [`DiscoveringProxy`] promotes itself into.
///
/// An explicit tagged variant behind a write-once handle; capability queries
/// (like the replica-set name) go through the trait, never through type
/// inspection.
pub enum ResolvedProxy {
    Direct(DirectProxy),
    ReplicaSet(ReplicaSetProxy),
    Sharded(ShardedProxy),
}

impl ResolvedProxy {
    fn as_proxy(&self) -> &dyn ServerProxy {
        match self {
            ResolvedProxy::Direct(p) => p,
            ResolvedProxy::ReplicaSet(p) => p,
            ResolvedProxy::Sharded(p) => p,
        }
    }
}

impl std::fmt::Debug for ResolvedProxy {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ResolvedProxy::Direct(_) => f.write_str("ResolvedProxy::Direct"),
            ResolvedProxy::ReplicaSet(_) => f.write_str("ResolvedProxy::ReplicaSet"),
            ResolvedProxy::Sharded(_) => f.write_str("ResolvedProxy::Sharded"),
        }
    }
}

#[async_trait]
impl ServerProxy for ResolvedProxy {
    async fn choose_instance(
        &self,
        read_preference: ReadPreference,
    ) -> Result<Arc<ServerInstance>> {
        self.as_proxy().choose_instance(read_preference).await
    }

    async fn connect(
        &self,
        timeout: Duration,
        read_preference: ReadPreference,
    ) -> Result<()> {
        self.as_proxy().connect(timeout, read_preference).await
    }

    async fn disconnect(&self) -> Result<()> {
        self.as_proxy().disconnect().await
    }

    async fn ping(&self) -> Result<Duration> {
        self.as_proxy().ping().await
    }

    async fn verify_state(&self) -> Result<()> {
        self.as_proxy().verify_state().await
    }

    fn topology(&self) -> TopologyType {
        self.as_proxy().topology()
    }

    fn instances(&self) -> Vec<Arc<ServerInstance>> {
        self.as_proxy().instances()
    }

    fn build_info(&self) -> Option<BuildInfo> {
        self.as_proxy().build_info()
    }

    fn replica_set_name(&self) -> Option<String> {
        self.as_proxy().replica_set_name()
    }

    fn connection_attempt(&self) -> u64 {
        self.as_proxy().connection_attempt()
    }

    fn state(&self) -> ConnectionState {
        self.as_proxy().state()
    }
}

/// Entry-point proxy used while the deployment shape is unknown.
///
/// Presents the full proxy contract from the start. The first time a
/// connection is actually needed it races probes across every seed,
/// classifies the winner and promotes itself, exactly once, into delegating
/// to the matching concrete variant. Advisory reads while unresolved return
/// well-defined defaults and never trigger discovery.
pub struct DiscoveringProxy {
    config: DriverConfig,
    connector: Arc<dyn Connector>,
    /// Seed instances, created once per configured address
    seeds: Vec<Arc<ServerInstance>>,
    /// Write-once-then-immutable: never observed partially constructed
    inner: ArcSwapOption<ResolvedProxy>,
    gate: Mutex<()>,
    attempt: AtomicU64,
    state: RwLock<ConnectionState>,
}

impl DiscoveringProxy {
    pub fn new(
        config: DriverConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let seeds = config
            .seeds
            .iter()
            .enumerate()
            .map(|(slot, address)| {
                Arc::new(ServerInstance::new(address.clone(), slot, connector.clone()))
            })
            .collect();

        Self {
            config,
            connector,
            seeds,
            inner: ArcSwapOption::const_empty(),
            gate: Mutex::new(()),
            attempt: AtomicU64::new(0),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.load().is_some()
    }

    /// Resolves the topology, racing seed probes under `timeout`.
    ///
    /// Fast path is a single lock-free read of the inner handle. Concurrent
    /// callers collapse into one discovery race; exactly one of them runs it
    /// and the rest observe the published result. On failure the handle stays
    /// empty so a later call retries from scratch with fresh probes.
    pub async fn ensure_resolved(
        &self,
        timeout: Duration,
    ) -> Result<Arc<ResolvedProxy>> {
        if let Some(inner) = self.inner.load_full() {
            return Ok(inner);
        }

        let _gate = self.gate.lock().await;
        if let Some(inner) = self.inner.load_full() {
            return Ok(inner);
        }

        self.attempt.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let (winner, queue) = match self.race(timeout).await {
            Ok(outcome) => outcome,
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                return Err(err);
            }
        };

        let resolved = match self.promote(winner, queue).await {
            Ok(resolved) => Arc::new(resolved),
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                return Err(err);
            }
        };

        info!(topology = ?resolved.topology(), "Topology resolved");
        // Publish the fully constructed inner proxy last.
        self.inner.store(Some(resolved.clone()));
        *self.state.write() = ConnectionState::Connected;
        Ok(resolved)
    }

    /// Runs the probe race: one probe per seed, first recorded success wins.
    async fn race(
        &self,
        timeout: Duration,
    ) -> Result<(Arc<ServerInstance>, ProbeTicketQueue)> {
        let queue = ProbeRaceQueue::new();
        for seed in &self.seeds {
            let instance = seed.clone();
            queue.submit(async move {
                // Probe failures stay recorded on the instance; the job
                // completes either way so the race keeps moving.
                if let Err(err) = instance.connect().await {
                    warn!(address = %instance.address(), %err, "Seed probe failed");
                }
                instance
            });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = remaining_budget(deadline);
            if remaining.is_zero() {
                return Err(DiscoveryError::Timeout { timeout }.into());
            }

            match queue.drain(remaining).await {
                Some(instance) if instance.last_error().is_none() => {
                    // A probe outside the required replica set cannot win.
                    if let Some(expected) = &self.config.replica_set {
                        let actual = instance.set_name();
                        if actual.as_deref() != Some(expected.as_str()) {
                            let err = ConnectError::SetNameMismatch {
                                address: instance.address(),
                                expected: expected.clone(),
                                actual,
                            };
                            warn!(%err, "Rejecting probe outside required replica set");
                            instance.disconnect().await;
                            instance.fail(err);
                            continue;
                        }
                    }
                    debug!(address = %instance.address(), role = ?instance.role(), "Probe race won");
                    return Ok((instance, queue));
                }
                Some(instance) => {
                    debug!(address = %instance.address(), "Discarding failed probe");
                }
                None if queue.pending() == 0 => {
                    let failures = self
                        .seeds
                        .iter()
                        .filter_map(|seed| {
                            seed.last_error().map(|error| AddressFailure {
                                address: seed.address(),
                                error,
                            })
                        })
                        .collect();
                    return Err(DiscoveryError::AllSeedsFailed { failures }.into());
                }
                None => {
                    return Err(DiscoveryError::Timeout { timeout }.into());
                }
            }
        }
    }

    /// Classifies the race winner and constructs the concrete variant.
    ///
    /// Replica-set and sharded promotions take the full original seed list
    /// and the still-live race queue so in-flight background probes can be
    /// absorbed after promotion.
    async fn promote(
        &self,
        winner: Arc<ServerInstance>,
        queue: ProbeTicketQueue,
    ) -> Result<ResolvedProxy> {
        let attempt = self.attempt.load(Ordering::SeqCst);

        match winner.role() {
            InstanceRole::ReplicaSetMember => Ok(ResolvedProxy::ReplicaSet(
                ReplicaSetProxy::promoted(
                    self.seeds.clone(),
                    queue,
                    attempt,
                    &self.config,
                    self.connector.clone(),
                )
                .await,
            )),
            InstanceRole::ShardRouter => Ok(ResolvedProxy::Sharded(ShardedProxy::promoted(
                self.seeds.clone(),
                queue,
                attempt,
                &self.config,
            ))),
            InstanceRole::Standalone => {
                // A standalone deployment has exactly one live member; every
                // other seed is either unreachable or not part of it.
                for seed in &self.seeds {
                    if !Arc::ptr_eq(seed, &winner) {
                        seed.disconnect().await;
                    }
                }
                // Probes still in flight were abandoned, not cancelled; any
                // that lands Connected later gets disconnected too.
                let interval = self.config.discovery.absorb_interval();
                tokio::spawn(async move {
                    while queue.pending() > 0 {
                        if let Some(instance) = queue.drain(interval).await {
                            instance.disconnect().await;
                        }
                    }
                });
                Ok(ResolvedProxy::Direct(DirectProxy::promoted(
                    winner,
                    attempt,
                    self.config.connection.connect_timeout(),
                )))
            }
            role => Err(DiscoveryError::IndeterminateTopology {
                address: winner.address(),
                role,
            }
            .into()),
        }
    }
}

#[async_trait]
impl ServerProxy for DiscoveringProxy {
    async fn choose_instance(
        &self,
        read_preference: ReadPreference,
    ) -> Result<Arc<ServerInstance>> {
        let inner = self
            .ensure_resolved(self.config.discovery.discovery_timeout())
            .await?;
        inner.choose_instance(read_preference).await
    }

    async fn connect(
        &self,
        timeout: Duration,
        read_preference: ReadPreference,
    ) -> Result<()> {
        // One budget covers resolution and the inner connect together.
        let deadline = tokio::time::Instant::now() + timeout;
        let inner = self.ensure_resolved(timeout).await?;
        inner.connect(remaining_budget(deadline), read_preference).await
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(inner) = self.inner.load_full() {
            inner.disconnect().await?;
        }
        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        match self.inner.load_full() {
            Some(inner) => inner.ping().await,
            None => Err(SelectionError::ConnectionUnavailable {
                reason: "topology not resolved yet".to_string(),
            }
            .into()),
        }
    }

    async fn verify_state(&self) -> Result<()> {
        match self.inner.load_full() {
            Some(inner) => inner.verify_state().await,
            // Nothing to verify before resolution.
            None => Ok(()),
        }
    }

    fn topology(&self) -> TopologyType {
        match self.inner.load_full() {
            Some(inner) => inner.topology(),
            None => TopologyType::Unknown,
        }
    }

    fn instances(&self) -> Vec<Arc<ServerInstance>> {
        match self.inner.load_full() {
            Some(inner) => inner.instances(),
            // The static seed list, advisory only.
            None => self.seeds.clone(),
        }
    }

    fn build_info(&self) -> Option<BuildInfo> {
        self.inner.load_full().and_then(|inner| inner.build_info())
    }

    fn replica_set_name(&self) -> Option<String> {
        self.inner.load_full().and_then(|inner| inner.replica_set_name())
    }

    fn connection_attempt(&self) -> u64 {
        match self.inner.load_full() {
            Some(inner) => inner.connection_attempt(),
            None => self.attempt.load(Ordering::SeqCst),
        }
    }

    fn state(&self) -> ConnectionState {
        match self.inner.load_full() {
            Some(inner) => inner.state(),
            None => *self.state.read(),
        }
    }
}
