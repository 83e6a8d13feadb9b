use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tonic::async_trait;
use tracing::debug;
use tracing::warn;

use crate::check_wire_compatibility;
use crate::AddressFailure;
use crate::AllAddressesFailed;
use crate::BuildInfo;
use crate::ConnectionState;
use crate::DriverConfig;
use crate::InstanceRole;
use crate::ReadPreference;
use crate::Result;
use crate::SelectionError;
use crate::ServerInstance;
use crate::ServerProxy;
use crate::TopologyType;

use super::race::ProbeTicketQueue;

/// Proxy over a pool of stateless query routers.
///
/// Any router can serve any request, so selection is a plain round-robin
/// over the connected routers; read preference is forwarded to the router
/// on the wire rather than influencing which router is picked.
pub struct ShardedProxy {
    connect_timeout: Duration,
    routers: Vec<Arc<ServerInstance>>,
    cursor: AtomicUsize,
    gate: Mutex<()>,
    attempt: AtomicU64,
    state: RwLock<ConnectionState>,
    shutdown: CancellationToken,
}

impl ShardedProxy {
    /// Takes over the probed seed list and the live race queue from a
    /// discovery promotion. Late probe results only need draining; router
    /// instances already carry their own state.
    pub(crate) fn promoted(
        routers: Vec<Arc<ServerInstance>>,
        queue: ProbeTicketQueue,
        attempt: u64,
        config: &DriverConfig,
    ) -> Self {
        let connected = routers.iter().any(|r| r.state() == ConnectionState::Connected);
        let shutdown = CancellationToken::new();
        task::spawn(absorb_probes(
            queue,
            config.discovery.absorb_interval(),
            shutdown.clone(),
        ));

        Self {
            connect_timeout: config.connection.connect_timeout(),
            routers,
            cursor: AtomicUsize::new(0),
            gate: Mutex::new(()),
            attempt: AtomicU64::new(attempt),
            state: RwLock::new(if connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }),
            shutdown,
        }
    }

    fn connected_routers(&self) -> Vec<Arc<ServerInstance>> {
        self.routers
            .iter()
            .filter(|r| {
                r.state() == ConnectionState::Connected && r.role() == InstanceRole::ShardRouter
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ServerProxy for ShardedProxy {
    async fn choose_instance(
        &self,
        read_preference: ReadPreference,
    ) -> Result<Arc<ServerInstance>> {
        let mut candidates = self.connected_routers();
        if candidates.is_empty() {
            self.connect(self.connect_timeout, read_preference).await?;
            candidates = self.connected_routers();
        }

        if candidates.is_empty() {
            return Err(SelectionError::ConnectionUnavailable {
                reason: "no connected query router".to_string(),
            }
            .into());
        }

        let chosen =
            candidates[self.cursor.fetch_add(1, Ordering::SeqCst) % candidates.len()].clone();
        check_wire_compatibility(&chosen)?;
        Ok(chosen)
    }

    async fn connect(
        &self,
        timeout: Duration,
        _read_preference: ReadPreference,
    ) -> Result<()> {
        if *self.state.read() == ConnectionState::Connected
            && !self.connected_routers().is_empty()
        {
            return Ok(());
        }

        let _gate = self.gate.lock().await;
        if *self.state.read() == ConnectionState::Connected
            && !self.connected_routers().is_empty()
        {
            return Ok(());
        }

        self.attempt.fetch_add(1, Ordering::SeqCst);
        *self.state.write() = ConnectionState::Connecting;

        let mut tasks = FuturesUnordered::new();
        for router in &self.routers {
            if router.state() == ConnectionState::Connected {
                continue;
            }
            let instance = router.clone();
            tasks.push(task::spawn(async move {
                let outcome = instance.connect().await;
                (instance, outcome)
            }));
        }

        let _ = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.next().await {
                match joined {
                    Ok((instance, Ok(()))) => {
                        debug!(address = %instance.address(), "Router connected")
                    }
                    Ok((instance, Err(err))) => {
                        debug!(address = %instance.address(), %err, "Router connect failed")
                    }
                    Err(err) => warn!("Router connect task panicked: {err}"),
                }
            }
        })
        .await;

        if !self.connected_routers().is_empty() {
            *self.state.write() = ConnectionState::Connected;
            Ok(())
        } else {
            *self.state.write() = ConnectionState::Disconnected;
            let failures = self
                .routers
                .iter()
                .filter_map(|r| {
                    r.last_error().map(|error| AddressFailure {
                        address: r.address(),
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
        for router in &self.routers {
            router.disconnect().await;
        }
        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        let candidates = self.connected_routers();
        let chosen = candidates.first().ok_or(SelectionError::ConnectionUnavailable {
            reason: "no connected query router to ping".to_string(),
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
        for router in &self.routers {
            if let Err(err) = router.verify_state().await {
                warn!(address = %router.address(), %err, "Router failed re-verification");
            }
        }

        if self.connected_routers().is_empty() {
            *self.state.write() = ConnectionState::Disconnected;
            Err(SelectionError::ConnectionUnavailable {
                reason: "no router survived re-verification".to_string(),
            }
            .into())
        } else {
            Ok(())
        }
    }

    fn topology(&self) -> TopologyType {
        TopologyType::Sharded
    }

    fn instances(&self) -> Vec<Arc<ServerInstance>> {
        self.routers.clone()
    }

    fn build_info(&self) -> Option<BuildInfo> {
        self.connected_routers().first().and_then(|r| r.build_info())
    }

    fn replica_set_name(&self) -> Option<String> {
        // Routers front the shards; no single set applies.
        None
    }

    fn connection_attempt(&self) -> u64 {
        self.attempt.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}

impl Drop for ShardedProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Drains leftover discovery probes so late router connections settle into
/// their instances instead of sitting buffered forever.
async fn absorb_probes(
    queue: ProbeTicketQueue,
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

        if let Some(instance) = drained {
            if instance.last_error().is_none() {
                debug!(address = %instance.address(), "Absorbed late router probe");
            }
        }
    }
}
