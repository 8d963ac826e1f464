use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{instrument, Span};
use uuid::Uuid;

use super::cluster_builder::{ClusterBuilder, ClusterInitialConfiguration};
use super::cluster_state::ClusterState;
use super::cluster_sync;
use crate::connection_pool::PooledConn;
use crate::{Address, ClusterError, ClusterStats, Connector, Server, TcpConnector};

/// What the caller intends to do with the connection it is asking for.
///
/// Writes are only ever routed to a master. Reads prefer a slave and fall
/// back to a master when no slave is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// State and coordination shared by every [`Cluster`] handle and by the
/// background synchronization passes.
///
/// All mutable topology data lives behind the single `state` lock, which is
/// never held across an `.await`. Progress is announced out-of-band on the
/// `topology_changed` watch channel so blocked acquires never poll.
pub(crate) struct ClusterShared<C: Connector> {
    state: RwLock<ClusterState<C>>,
    /// Bumped after every merge; the value itself is meaningless, only the
    /// edge matters.
    topology_changed: watch::Sender<u64>,
    connector: Arc<C>,
    sync_backoff: Duration,
}

impl<C: Connector> ClusterShared<C> {
    fn read_state(&self) -> RwLockReadGuard<'_, ClusterState<C>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ClusterState<C>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn connector(&self) -> Arc<C> {
        Arc::clone(&self.connector)
    }

    pub(crate) fn connector_ref(&self) -> &C {
        &self.connector
    }

    pub(crate) fn sync_backoff(&self) -> Duration {
        self.sync_backoff
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.topology_changed.subscribe()
    }

    pub(crate) fn notify_topology_changed(&self) {
        self.topology_changed.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    pub(crate) fn known_addresses(&self) -> Vec<Address> {
        self.read_state().known_addresses()
    }

    /// Folds a probed server into the topology and wakes blocked acquires.
    pub(crate) fn merge_server(&self, candidate: Server<C>) {
        {
            self.write_state().merge_server(candidate);
        }
        tracing::debug!("broadcasting availability of the merged server");
        self.notify_topology_changed();
    }

    /// Removes the server with this address from the topology and closes the
    /// pools involved. Blocked acquires are not woken: a removal never makes
    /// a server available.
    pub(crate) fn remove_server(&self, server: &Server<C>) {
        let removed = { self.write_state().remove_server(server.address()) };
        server.close();
        if let Some(removed) = removed {
            removed.close();
        }
    }

    pub(crate) fn acquire_reference(&self) {
        self.write_state().references += 1;
    }

    /// Drops one logical reference. The last one tears the cluster down.
    ///
    /// # Panics
    ///
    /// Panics when called with `references == 0`; that means a release was
    /// not paired with an acquire and the accounting can no longer be
    /// trusted.
    pub(crate) fn release_reference(&self) {
        let mut state = self.write_state();
        if state.references == 0 {
            panic!("cluster reference released with references == 0");
        }
        state.references -= 1;
        if state.references == 0 {
            tracing::info!("last cluster reference released, closing all servers");
            state.close_all_servers();
        }
    }

    /// Claims the right to run a synchronization pass.
    ///
    /// Returns false when a pass is already running or the cluster has been
    /// torn down, in which case the caller must not sync.
    pub(crate) fn begin_pass(&self) -> bool {
        let mut state = self.write_state();
        if state.syncing || state.references == 0 {
            return false;
        }
        // Hold a reference for the duration of the pass.
        state.references += 1;
        state.syncing = true;
        true
    }

    /// Publishes the outcome of a finished pass and releases its reference.
    ///
    /// Returns true when the pass ended without a single master, which means
    /// the caller should back off and sync again.
    pub(crate) fn finish_pass(&self) -> bool {
        let no_masters;
        {
            let mut state = self.write_state();
            state.syncing = false;
            tracing::info!(
                "synchronization completed: {} master(s) and {} slave(s) alive",
                state.masters.len(),
                state.slaves.len()
            );
            state.republish_dynamic_seeds();
            no_masters = state.masters.is_empty();
        }
        if no_masters {
            tracing::info!("no masters found, will synchronize again shortly");
            // Wake blocked acquires so the ones with a deadline can notice it.
            self.notify_topology_changed();
        }
        self.release_reference();
        no_masters
    }

    /// Picks a server eligible for the given access mode, or None when the
    /// topology has nothing suitable yet.
    fn select(&self, mode: AccessMode) -> Option<Server<C>> {
        let state = self.read_state();
        tracing::debug!(
            "cluster has {} known master(s) and {} known slave(s)",
            state.masters.len(),
            state.slaves.len()
        );
        let picked = match mode {
            AccessMode::Write => state.masters.choose_random(),
            AccessMode::Read => state.slaves.choose_random().or_else(|| state.masters.choose_random()),
        };
        picked.cloned()
    }
}

/// A live handle on a FerroDB cluster topology.
///
/// Building a `Cluster` spawns a background synchronization task that probes
/// the seed addresses, discovers their peers, and keeps a server set
/// partitioned into masters and slaves. [`Cluster::acquire`] routes
/// connection requests against that picture and blocks, up to an optional
/// deadline, while the picture is still empty.
///
/// Handles are cheap to clone and share one topology. The background work
/// and every pooled connection are shut down when the last handle is
/// dropped.
pub struct Cluster<C: Connector = TcpConnector> {
    shared: Arc<ClusterShared<C>>,
}

impl Cluster<TcpConnector> {
    /// Entry point for configuring a cluster over TCP.
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::new()
    }
}

impl<C: Connector> Cluster<C> {
    pub(crate) fn new(configuration: ClusterInitialConfiguration, connector: C) -> Self {
        let (topology_changed, _) = watch::channel(0u64);
        let shared = Arc::new(ClusterShared {
            state: RwLock::new(ClusterState::new(configuration.seeds)),
            topology_changed,
            connector: Arc::new(connector),
            sync_backoff: configuration.sync_backoff,
        });
        cluster_sync::spawn_sync(&shared);
        Self { shared }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<ClusterShared<C>> {
        &self.shared
    }

    /// Hands out a pooled connection to a server eligible for `mode`.
    ///
    /// When no eligible server is known yet, the call waits for the
    /// synchronization task to make progress instead of failing fast. With
    /// `timeout` set, waiting ends in [`ClusterError::NoReachableServers`]
    /// once the deadline passes; without one the call waits indefinitely.
    ///
    /// A server that accepts no new connections is removed from the topology
    /// on the spot and a resynchronization is kicked off before the next
    /// candidate is tried.
    #[instrument(level = "debug", name = "Acquire Connection", skip(self), fields(correlation_id))]
    pub async fn acquire(
        &self,
        mode: AccessMode,
        timeout: Option<Duration>,
    ) -> Result<PooledConn<C>, ClusterError> {
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        // The deadline is fixed up front; retries after a failed server do
        // not extend it.
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        let mut topology_changed = self.shared.subscribe();
        loop {
            // Mark the current epoch as seen before looking at the state. A
            // merge landing after this point shows up in `changed`, so a
            // wakeup can never be missed.
            topology_changed.borrow_and_update();
            let server = match self.shared.select(mode) {
                Some(server) => server,
                None => {
                    tracing::debug!("no server eligible for {:?} yet, waiting for the topology", mode);
                    let changed = topology_changed.changed();
                    let outcome = match deadline {
                        Some(deadline) => match tokio::time::timeout_at(deadline, changed).await {
                            Ok(outcome) => outcome,
                            Err(_) => return Err(ClusterError::NoReachableServers),
                        },
                        None => changed.await,
                    };
                    if outcome.is_err() {
                        // The watch sender is gone, the topology was torn down.
                        return Err(ClusterError::NoReachableServers);
                    }
                    continue;
                }
            };
            match server.pool().acquire().await {
                Ok(connection) => return Ok(connection),
                Err(error) => {
                    tracing::info!(
                        "connecting to `{}` failed, resynchronizing: {}",
                        server.address(),
                        error
                    );
                    self.shared.remove_server(&server);
                    cluster_sync::spawn_sync(&self.shared);
                }
            }
        }
    }

    /// Every address the cluster would probe on its next synchronization
    /// pass: user seeds, dynamically discovered seeds, and live servers,
    /// deduplicated in that order.
    pub fn known_addresses(&self) -> Vec<Address> {
        self.shared.known_addresses()
    }

    /// A consistent snapshot of the topology counters.
    pub fn stats(&self) -> ClusterStats {
        let state = self.shared.read_state();
        ClusterStats {
            servers: state.all_servers.len(),
            masters: state.masters.len(),
            slaves: state.slaves.len(),
            unclassified: state.all_servers.len() - state.masters.len() - state.slaves.len(),
            idle_connections: state
                .all_servers
                .iter()
                .map(|server| server.pool().idle_connections())
                .sum(),
            syncing: state.syncing,
            references: state.references,
        }
    }
}

impl<C: Connector> Clone for Cluster<C> {
    fn clone(&self) -> Self {
        self.shared.acquire_reference();
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> Drop for Cluster<C> {
    fn drop(&mut self) {
        self.shared.release_reference();
    }
}

impl<C: Connector> std::fmt::Debug for Cluster<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster").field("stats", &self.stats()).finish()
    }
}
