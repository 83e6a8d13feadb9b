use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::check_wire_compatibility;
use crate::AddressFailure;
use crate::AllAddressesFailed;
use crate::ConnectError;
use crate::BuildInfo;
use crate::ConnectionState;
use crate::Connector;
use crate::DriverConfig;
use crate::ReadPreference;
use crate::Result;
use crate::SelectionError;
use crate::ServerInstance;
use crate::ServerProxy;
use crate::TopologyType;

use super::race::ProbeTicketQueue;

/// Replica-set-aware proxy.
///
/// Owns the member list (initially the original seed instances handed over by
/// promotion) and keeps folding in newly discovered members from the
/// membership views servers report. A background absorb task consumes
/// leftover discovery probes from the still-live race queue so losing-but-
/// successful probes are not wasted.
pub struct ReplicaSetProxy {
    connect_timeout: Duration,
    required_set_name: Option<String>,
    connector: Arc<dyn Connector>,
    members: Arc<RwLock<Vec<Arc<ServerInstance>>>>,
    set_name: Arc<RwLock<Option<String>>>,
    next_slot: Arc<AtomicUsize>,
    gate: Mutex<()>,
    attempt: AtomicU64,
    state: RwLock<ConnectionState>,
    shutdown: CancellationToken,
}

impl ReplicaSetProxy {
    /// Constructs the proxy from a fresh seed list, without a prior race.
    pub fn new(
        config: &DriverConfig,
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
        Self::build(seeds, None, 0, config, connector)
    }

    /// Takes over the probed seed list and the live race queue from a
    /// discovery promotion; background probes keep feeding member discovery.
    pub(crate) async fn promoted(
        seeds: Vec<Arc<ServerInstance>>,
        queue: ProbeTicketQueue,
        attempt: u64,
        config: &DriverConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let proxy = Self::build(seeds, Some(queue), attempt, config, connector);
        // Fold in what the already-finished probes found.
        let members = proxy.members.read().clone();
        for member in &members {
            if member.state() == ConnectionState::Connected {
                proxy.note_connected_member(member).await;
            }
        }
        proxy
    }

    fn build(
        seeds: Vec<Arc<ServerInstance>>,
        queue: Option<ProbeTicketQueue>,
        attempt: u64,
        config: &DriverConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let next_slot = Arc::new(AtomicUsize::new(seeds.len()));
        let members = Arc::new(RwLock::new(seeds));
        let set_name = Arc::new(RwLock::new(None));
        let shutdown = CancellationToken::new();

        let connected = members.read().iter().any(|m| m.state() == ConnectionState::Connected);
        let proxy = Self {
            connect_timeout: config.connection.connect_timeout(),
            required_set_name: config.replica_set.clone(),
            connector,
            members,
            set_name,
            next_slot,
            gate: Mutex::new(()),
            attempt: AtomicU64::new(attempt),
            state: RwLock::new(if connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }),
            shutdown,
        };

        if let Some(queue) = queue {
            task::spawn(absorb_probes(
                queue,
                proxy.members.clone(),
                proxy.set_name.clone(),
                proxy.connector.clone(),
                proxy.next_slot.clone(),
                proxy.required_set_name.clone(),
                config.discovery.absorb_interval(),
                proxy.shutdown.clone(),
            ));
        }

        proxy
    }

    /// Updates the set name and member list from one connected member's view.
    ///
    /// A member outside the required replica set is disconnected and its
    /// view discarded.
    async fn note_connected_member(
        &self,
        member: &Arc<ServerInstance>,
    ) {
        if let Some(expected) = &self.required_set_name {
            let actual = member.set_name();
            if actual.as_deref() != Some(expected.as_str()) {
                let err = ConnectError::SetNameMismatch {
                    address: member.address(),
                    expected: expected.clone(),
                    actual,
                };
                warn!(%err, "Rejecting member outside required replica set");
                member.disconnect().await;
                member.fail(err);
                return;
            }
        }

        if let Some(name) = member.set_name() {
            let mut set_name = self.set_name.write();
            if set_name.is_none() {
                *set_name = Some(name);
            }
        }
        fold_membership_view(member, &self.members, &self.connector, &self.next_slot);
    }

    fn has_connected_member(&self) -> bool {
        self.members
            .read()
            .iter()
            .any(|m| m.state() == ConnectionState::Connected)
    }

    /// Selection over connected, non-arbiter members
    fn select(
        &self,
        read_preference: ReadPreference,
    ) -> Option<Arc<ServerInstance>> {
        let members = self.members.read();
        let connected: Vec<Arc<ServerInstance>> = members
            .iter()
            .filter(|m| m.state() == ConnectionState::Connected && !m.is_arbiter())
            .cloned()
            .collect();
        drop(members);

        let primary = connected.iter().find(|m| m.is_primary()).cloned();
        let secondaries: Vec<Arc<ServerInstance>> =
            connected.iter().filter(|m| !m.is_primary()).cloned().collect();

        match read_preference {
            ReadPreference::Primary => primary,
            ReadPreference::PrimaryPreferred => primary.or_else(|| pick_random(&secondaries)),
            ReadPreference::Secondary => pick_random(&secondaries),
            ReadPreference::SecondaryPreferred => pick_random(&secondaries).or(primary),
            ReadPreference::Nearest => connected
                .iter()
                .min_by_key(|m| m.latency().unwrap_or(Duration::MAX))
                .cloned(),
        }
    }
}

#[async_trait]
impl ServerProxy for ReplicaSetProxy {
    async fn choose_instance(
        &self,
        read_preference: ReadPreference,
    ) -> Result<Arc<ServerInstance>> {
        if !self.has_connected_member() {
            self.connect(self.connect_timeout, read_preference).await?;
        }

        let chosen = self
            .select(read_preference)
            .ok_or(SelectionError::ConnectionUnavailable {
                reason: format!("no member satisfies {:?}", read_preference),
            })?;
        check_wire_compatibility(&chosen)?;
        Ok(chosen)
    }

    async fn connect(
        &self,
        timeout: Duration,
        _read_preference: ReadPreference,
    ) -> Result<()> {
        if *self.state.read() == ConnectionState::Connected && self.has_connected_member() {
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        if *self.state.read() == ConnectionState::Connected && self.has_connected_member() {
            return Ok(());
        }

        self.attempt.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let members = self.members.read().clone();
        let mut tasks = FuturesUnordered::new();
        for member in &members {
            if member.state() == ConnectionState::Connected {
                continue;
            }
            let instance = member.clone();
            tasks.push(task::spawn(async move {
                let outcome = instance.connect().await;
                (instance, outcome)
            }));
        }

        // Bound the whole fan-out by the caller's budget; stragglers are
        // abandoned, not cancelled.
        let _ = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.next().await {
                match joined {
                    Ok((instance, Ok(()))) => self.note_connected_member(&instance).await,
                    Ok((instance, Err(err))) => {
                        debug!(address = %instance.address(), %err, "Member connect failed")
                    }
                    Err(err) => warn!("Member connect task panicked: {err}"),
                }
            }
        })
        .await;

        if self.has_connected_member() {
            *self.state.write() = ConnectionState::Connected;
            Ok(())
        } else {
            *self.state.write() = ConnectionState::Disconnected;
            let failures = members
                .iter()
                .filter_map(|m| {
                    m.last_error().map(|error| AddressFailure {
                        address: m.address(),
                        error,
                    })
                })
                .collect();
            Err(AllAddressesFailed { failures }.into())
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.shutdown.cancel();
        *self.state.write() = ConnectionState::Disconnecting;
        let members = self.members.read().clone();
        for member in &members {
            member.disconnect().await;
        }
        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        let chosen = self
            .select(ReadPreference::PrimaryPreferred)
            .ok_or(SelectionError::ConnectionUnavailable {
                reason: "no connected member to ping".to_string(),
            })?;
        Ok(chosen.ping().await?)
    }

    async fn verify_state(&self) -> Result<()> {
        if matches!(
            *self.state.read(),
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        let members = self.members.read().clone();
        for member in &members {
            // A failed verification transitions the member itself.
            if let Err(err) = member.verify_state().await {
                warn!(address = %member.address(), %err, "Member failed re-verification");
            }
        }

        if self.has_connected_member() {
            Ok(())
        } else {
            *self.state.write() = ConnectionState::Disconnected;
            Err(SelectionError::ConnectionUnavailable {
                reason: "no member survived re-verification".to_string(),
            }
            .into())
        }
    }

    fn topology(&self) -> TopologyType {
        TopologyType::ReplicaSet
    }

    fn instances(&self) -> Vec<Arc<ServerInstance>> {
        self.members.read().clone()
    }

    fn build_info(&self) -> Option<BuildInfo> {
        self.select(ReadPreference::PrimaryPreferred)
            .and_then(|m| m.build_info())
    }

    fn replica_set_name(&self) -> Option<String> {
        self.set_name.read().clone()
    }

    fn connection_attempt(&self) -> u64 {
        self.attempt.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}

impl Drop for ReplicaSetProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn pick_random(candidates: &[Arc<ServerInstance>]) -> Option<Arc<ServerInstance>> {
    candidates.choose(&mut rand::thread_rng()).cloned()
}

/// Adds unseen hosts from `member`'s membership view as Disconnected members.
fn fold_membership_view(
    member: &Arc<ServerInstance>,
    members: &Arc<RwLock<Vec<Arc<ServerInstance>>>>,
    connector: &Arc<dyn Connector>,
    next_slot: &Arc<AtomicUsize>,
) {
    for host in member.member_hosts() {
        let mut list = members.write();
        if list.iter().any(|m| m.address() == host) {
            continue;
        }
        info!(address = %host, "Discovered new replica set member");
        let slot = next_slot.fetch_add(1, Ordering::SeqCst);
        list.push(Arc::new(ServerInstance::new(host, slot, connector.clone())));
    }
}

/// Drains leftover discovery probes until the queue is exhausted or the
/// proxy shuts down, folding successful late arrivals into the member list.
#[allow(clippy::too_many_arguments)]
async fn absorb_probes(
    queue: ProbeTicketQueue,
    members: Arc<RwLock<Vec<Arc<ServerInstance>>>>,
    set_name: Arc<RwLock<Option<String>>>,
    connector: Arc<dyn Connector>,
    next_slot: Arc<AtomicUsize>,
    required_set_name: Option<String>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        if queue.pending() == 0 {
            break;
        }

        let drained = tokio::select! {
            _ = shutdown.cancelled() => break,
            drained = queue.drain(interval) => drained,
        };

        // Interval elapsed with nothing ready; poll again.
        let Some(instance) = drained else { continue };
        if instance.last_error().is_some() {
            continue;
        }

        if let Some(required) = &required_set_name {
            if instance.set_name().as_deref() != Some(required.as_str()) {
                warn!(address = %instance.address(), "Late probe belongs to a different replica set");
                instance.disconnect().await;
                continue;
            }
        }

        debug!(address = %instance.address(), "Absorbed late probe result");
        if let Some(name) = instance.set_name() {
            let mut current = set_name.write();
            if current.is_none() {
                *current = Some(name);
            }
        }
        fold_membership_view(&instance, &members, &connector, &next_slot);
    }
}
