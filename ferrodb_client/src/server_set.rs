use rand::seq::IteratorRandom;

use crate::{Address, Connector, Server};

/// Ordered collection of server handles, keyed by configured address.
///
/// Sized for a handful of servers, so lookups are linear scans. Insertion
/// order is preserved; snapshots and iteration reflect it.
pub(crate) struct ServerSet<C: Connector> {
    servers: Vec<Server<C>>,
}

impl<C: Connector> Default for ServerSet<C> {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
        }
    }
}

impl<C: Connector> ServerSet<C> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.servers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Appends a handle. The caller is responsible for not inserting a
    /// duplicate address; [`search`](Self::search) first.
    pub(crate) fn add(&mut self, server: Server<C>) {
        self.servers.push(server);
    }

    pub(crate) fn remove(&mut self, address: &Address) -> Option<Server<C>> {
        let index = self
            .servers
            .iter()
            .position(|server| server.address() == address)?;
        Some(self.servers.remove(index))
    }

    pub(crate) fn search(&self, address: &Address) -> Option<&Server<C>> {
        self.servers
            .iter()
            .find(|server| server.address() == address)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Server<C>> {
        self.servers.iter()
    }

    /// Picks a uniformly random member, if any.
    pub(crate) fn choose_random(&self) -> Option<&Server<C>> {
        self.servers.iter().choose(&mut rand::thread_rng())
    }

    pub(crate) fn addresses(&self) -> Vec<Address> {
        self.servers
            .iter()
            .map(|server| server.address().clone())
            .collect()
    }
}

impl<C: Connector> std::fmt::Debug for ServerSet<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.servers.iter()).finish()
    }
}
