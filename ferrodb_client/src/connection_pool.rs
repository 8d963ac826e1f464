use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{Address, Connection, Connector, ConnectorError};

/// Idle connections kept per server; anything returned beyond this is dropped.
const MAX_IDLE_CONNECTIONS: usize = 4;

/// Per-server connection pool.
///
/// Checkout pops an idle connection if a live one exists and dials otherwise.
/// Connections come back through [`PooledConn`]'s drop. Closing the pool is
/// final: idle connections are dropped on the spot and outstanding ones are
/// dropped when their guard goes out of scope.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

struct PoolInner<C: Connector> {
    connector: Arc<C>,
    address: Address,
    state: Mutex<PoolState<C::Conn>>,
}

struct PoolState<T> {
    idle: Vec<T>,
    generation: u64,
    closed: bool,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub(crate) fn new(connector: Arc<C>, address: Address) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                address,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    generation: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Checks out a connection, dialing a fresh one if no live idle
    /// connection is available.
    pub async fn acquire(&self) -> Result<PooledConn<C>, ConnectorError> {
        let generation;
        {
            let mut state = self.inner.lock_state();
            if state.closed {
                return Err(ConnectorError::PoolClosed);
            }
            generation = state.generation;
            while let Some(conn) = state.idle.pop() {
                if conn.is_alive() {
                    return Ok(PooledConn {
                        conn: Some(conn),
                        generation,
                        pool: Arc::clone(&self.inner),
                    });
                }
                tracing::debug!(
                    "discarding dead idle connection to `{}`",
                    self.inner.address
                );
            }
        }

        // Dial without holding the lock; the pool may close in the meantime.
        let conn = self.inner.connector.connect(&self.inner.address).await?;

        let state = self.inner.lock_state();
        if state.closed {
            return Err(ConnectorError::PoolClosed);
        }
        Ok(PooledConn {
            conn: Some(conn),
            generation: state.generation,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Closes the pool, dropping every idle connection.
    ///
    /// Outstanding [`PooledConn`]s stay usable but are dropped instead of
    /// returned. Closing twice is a no-op.
    pub fn close(&self) {
        let drained = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            state.generation = state.generation.wrapping_add(1);
            std::mem::take(&mut state.idle)
        };
        tracing::debug!(
            "closed connection pool for `{}`, dropping {} idle connection(s)",
            self.inner.address,
            drained.len()
        );
    }

    /// Moves another pool's idle connections into this one, up to the idle
    /// cap. Used when a freshly probed handle is merged into an existing one
    /// so the probe's connection is not wasted.
    pub(crate) fn absorb(&self, other: &ConnectionPool<C>) {
        let mut donated = {
            let mut other_state = other.inner.lock_state();
            std::mem::take(&mut other_state.idle)
        };
        let mut state = self.inner.lock_state();
        if state.closed {
            return;
        }
        while state.idle.len() < MAX_IDLE_CONNECTIONS {
            match donated.pop() {
                Some(conn) => state.idle.push(conn),
                None => break,
            }
        }
    }

    pub fn idle_connections(&self) -> usize {
        self.inner.lock_state().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }
}

impl<C: Connector> PoolInner<C> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<C::Conn>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out connection that returns itself to its pool on drop.
pub struct PooledConn<C: Connector> {
    conn: Option<C::Conn>,
    generation: u64,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> PooledConn<C> {
    fn conn(&self) -> &C::Conn {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection accessed after return"),
        }
    }

    fn conn_mut(&mut self) -> &mut C::Conn {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection accessed after return"),
        }
    }
}

impl<C: Connector> Deref for PooledConn<C> {
    type Target = C::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn()
    }
}

impl<C: Connector> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn_mut()
    }
}

impl<C: Connector> fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("address", &self.pool.address)
            .finish()
    }
}

impl<C: Connector> Drop for PooledConn<C> {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        let mut state = self.pool.lock_state();
        if state.closed
            || state.generation != self.generation
            || state.idle.len() >= MAX_IDLE_CONNECTIONS
        {
            return;
        }
        state.idle.push(conn);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::assert_ok;

    use crate::test_support::MockConnector;
    use crate::{Address, ConnectionPool, ConnectorError};

    fn pool_for(mock: &MockConnector, addr: &str) -> ConnectionPool<MockConnector> {
        let address: Address = addr.parse().unwrap();
        ConnectionPool::new(Arc::new(mock.clone()), address)
    }

    #[tokio::test]
    async fn acquire_dials_when_no_idle_connection_exists() {
        // Arrange
        let mock = MockConnector::new();
        mock.script_master("a:7171", &[]);
        let pool = pool_for(&mock, "a:7171");

        // Act
        let conn = assert_ok!(pool.acquire().await);

        // Assert
        assert_eq!(mock.connect_count("a:7171"), 1);
        drop(conn);
    }

    #[tokio::test]
    async fn returned_connection_is_reused() {
        // Arrange
        let mock = MockConnector::new();
        mock.script_master("a:7171", &[]);
        let pool = pool_for(&mock, "a:7171");

        // Act
        let first = assert_ok!(pool.acquire().await);
        drop(first);
        let second = assert_ok!(pool.acquire().await);

        // Assert
        assert_eq!(mock.connect_count("a:7171"), 1);
        drop(second);
        assert_eq!(pool.idle_connections(), 1);
    }

    #[tokio::test]
    async fn dead_idle_connections_are_discarded_at_checkout() {
        // Arrange
        let mock = MockConnector::new();
        mock.script_master("a:7171", &[]);
        let pool = pool_for(&mock, "a:7171");
        drop(assert_ok!(pool.acquire().await));

        // Act: kill the parked connection, then check out again.
        mock.kill_connections("a:7171");
        let conn = assert_ok!(pool.acquire().await);

        // Assert: the dead idle connection was not handed out.
        assert_eq!(mock.connect_count("a:7171"), 2);
        drop(conn);
    }

    #[tokio::test]
    async fn close_drops_idle_connections_and_rejects_acquire() {
        // Arrange
        let mock = MockConnector::new();
        mock.script_master("a:7171", &[]);
        let pool = pool_for(&mock, "a:7171");
        drop(assert_ok!(pool.acquire().await));
        assert_eq!(pool.idle_connections(), 1);

        // Act
        pool.close();

        // Assert
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(mock.open_connections(), 0);
        assert!(matches!(
            pool.acquire().await,
            Err(ConnectorError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn connection_out_during_close_is_dropped_not_returned() {
        // Arrange
        let mock = MockConnector::new();
        mock.script_master("a:7171", &[]);
        let pool = pool_for(&mock, "a:7171");
        let conn = assert_ok!(pool.acquire().await);

        // Act
        pool.close();
        drop(conn);

        // Assert
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(mock.open_connections(), 0);
    }

    #[tokio::test]
    async fn absorb_moves_idle_connections_between_pools() {
        // Arrange
        let mock = MockConnector::new();
        mock.script_master("a:7171", &[]);
        let established = pool_for(&mock, "a:7171");
        let transient = pool_for(&mock, "a:7171");
        drop(assert_ok!(transient.acquire().await));
        assert_eq!(transient.idle_connections(), 1);

        // Act
        established.absorb(&transient);

        // Assert
        assert_eq!(established.idle_connections(), 1);
        assert_eq!(transient.idle_connections(), 0);
        assert_eq!(mock.connect_count("a:7171"), 1);
    }
}
