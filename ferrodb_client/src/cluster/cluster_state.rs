use std::collections::HashSet;

use crate::server_set::ServerSet;
use crate::{Address, Connector, Role, Server};

/// Everything the cluster knows about the servers it talks to, guarded by a
/// single lock in [`super::cluster_handle::ClusterShared`].
///
/// `masters` and `slaves` are projections of `all_servers`: a server appears
/// in at most one of them, and only once its role is known. Servers that
/// answered the handshake but claimed neither role stay in `all_servers`
/// alone, so discovery can still walk their peer lists.
pub(crate) struct ClusterState<C: Connector> {
    /// Seed addresses supplied at build time. Never rewritten.
    pub(crate) user_seeds: Vec<Address>,
    /// Addresses learned from earlier synchronization passes.
    pub(crate) dynamic_seeds: Vec<Address>,
    pub(crate) all_servers: ServerSet<C>,
    pub(crate) masters: ServerSet<C>,
    pub(crate) slaves: ServerSet<C>,
    /// True while a synchronization pass is running.
    pub(crate) syncing: bool,
    /// Logical handle count. The cluster tears down when it reaches zero.
    pub(crate) references: usize,
}

impl<C: Connector> ClusterState<C> {
    pub(crate) fn new(user_seeds: Vec<Address>) -> Self {
        Self {
            user_seeds,
            dynamic_seeds: Vec::new(),
            all_servers: ServerSet::new(),
            masters: ServerSet::new(),
            slaves: ServerSet::new(),
            syncing: false,
            references: 1,
        }
    }

    /// Folds a freshly probed server into the topology.
    ///
    /// If the address is new the candidate is adopted as-is. If a server with
    /// the same address is already tracked, the existing handle is kept so
    /// its pooled connections survive, the partitions are fixed up when the
    /// role changed, and the candidate's connections are donated to the
    /// surviving pool.
    pub(crate) fn merge_server(&mut self, candidate: Server<C>) {
        let previous = self.all_servers.search(candidate.address()).cloned();
        match previous {
            None => {
                match candidate.role() {
                    Role::Master => {
                        tracing::debug!("adding `{}` to the cluster as a master", candidate.address());
                        self.masters.add(candidate.clone());
                    }
                    Role::Slave => {
                        tracing::debug!("adding `{}` to the cluster as a slave", candidate.address());
                        self.slaves.add(candidate.clone());
                    }
                    Role::Unclassified => {
                        tracing::debug!(
                            "adding `{}` to the cluster, role not yet known",
                            candidate.address()
                        );
                    }
                }
                self.all_servers.add(candidate);
            }
            Some(previous) => {
                if previous.role() != candidate.role() {
                    tracing::info!("server `{}` is now a {}", previous.address(), candidate.role());
                    self.masters.remove(previous.address());
                    self.slaves.remove(previous.address());
                    match candidate.role() {
                        Role::Master => self.masters.add(previous.clone()),
                        Role::Slave => self.slaves.add(previous.clone()),
                        Role::Unclassified => {}
                    }
                    previous.set_role(candidate.role());
                }
                previous.pool().absorb(candidate.pool());
            }
        }
    }

    /// Drops a server from the topology and from both role partitions.
    ///
    /// Removing an address that is not tracked is a logged no-op, so stale
    /// removal requests racing with a resynchronization are harmless.
    pub(crate) fn remove_server(&mut self, address: &Address) -> Option<Server<C>> {
        self.masters.remove(address);
        self.slaves.remove(address);
        let removed = self.all_servers.remove(address);
        match &removed {
            Some(server) => tracing::info!("removing server `{}` from the cluster", server.address()),
            None => tracing::debug!("server `{}` is not in the cluster, nothing to remove", address),
        }
        removed
    }

    /// Every address worth probing: user seeds, then dynamic seeds, then the
    /// servers currently tracked, first occurrence wins.
    pub(crate) fn known_addresses(&self) -> Vec<Address> {
        let capacity = self.user_seeds.len() + self.dynamic_seeds.len() + self.all_servers.len();
        let mut seen = HashSet::with_capacity(capacity);
        let mut known = Vec::with_capacity(capacity);
        for address in self
            .user_seeds
            .iter()
            .chain(self.dynamic_seeds.iter())
            .chain(self.all_servers.iter().map(|server| server.address()))
        {
            if seen.insert(address.clone()) {
                known.push(address.clone());
            }
        }
        known
    }

    /// Replaces the dynamic seeds with the addresses discovered by the pass
    /// that just finished. When the pass found nothing the previous seeds are
    /// kept, they are the best lead for the next attempt.
    pub(crate) fn republish_dynamic_seeds(&mut self) {
        if self.all_servers.is_empty() {
            return;
        }
        self.dynamic_seeds = self.all_servers.addresses();
        tracing::debug!("new dynamic seeds: {:?}", self.dynamic_seeds);
    }

    pub(crate) fn close_all_servers(&self) {
        for server in self.all_servers.iter() {
            server.close();
        }
    }
}
