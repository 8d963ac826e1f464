use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::{Address, ConnectionPool, Connector, TcpConnector};

/// What a server last reported itself to be.
///
/// A server that claims to be neither a master nor a secondary (an arbiter,
/// a node mid-election) stays [`Role::Unclassified`]: it is kept in the
/// topology so its peer list still feeds discovery, but it is never eligible
/// for routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
    Unclassified,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
            Role::Unclassified => write!(f, "unclassified"),
        }
    }
}

impl Role {
    fn as_u8(self) -> u8 {
        match self {
            Role::Master => 0,
            Role::Slave => 1,
            Role::Unclassified => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Role::Master,
            1 => Role::Slave,
            _ => Role::Unclassified,
        }
    }
}

/// Handle to one known server.
///
/// Identity is the configured address; the resolved address is what discovery
/// deduplicates on, so a server reachable through several aliases gets one
/// handle. Clones share state; that is how the same handle sits in
/// `all_servers` and a role partition at once.
pub struct Server<C: Connector = TcpConnector> {
    inner: Arc<ServerInner<C>>,
}

struct ServerInner<C: Connector> {
    address: Address,
    resolved_address: Address,
    role: AtomicU8,
    pool: ConnectionPool<C>,
}

impl<C: Connector> Clone for Server<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.inner.address)
            .field("resolved_address", &self.inner.resolved_address)
            .field("role", &self.role())
            .finish()
    }
}

impl<C: Connector> Server<C> {
    pub(crate) fn new(address: Address, resolved_address: Address, connector: Arc<C>) -> Self {
        let pool = ConnectionPool::new(connector, resolved_address.clone());
        Self {
            inner: Arc::new(ServerInner {
                address,
                resolved_address,
                role: AtomicU8::new(Role::Unclassified.as_u8()),
                pool,
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn resolved_address(&self) -> &Address {
        &self.inner.resolved_address
    }

    pub fn role(&self) -> Role {
        Role::from_u8(self.inner.role.load(Ordering::Relaxed))
    }

    /// Role writes happen on unmerged candidates or under the cluster's
    /// exclusive lock as part of a merge.
    pub(crate) fn set_role(&self, role: Role) {
        self.inner.role.store(role.as_u8(), Ordering::Relaxed);
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.inner.pool
    }

    /// Closes the server's connection pool. Called on removal and teardown.
    pub(crate) fn close(&self) {
        self.inner.pool.close();
    }
}
