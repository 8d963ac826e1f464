use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{Address, Connection, Connector, ConnectorError, HelloReply};

/// Scripted in-memory transport for driving the cluster in tests.
///
/// Servers are declared up front with the `script_*` methods, keyed by the
/// address the connector is asked to dial. Scripts may be swapped while a
/// cluster is running; live connections answer the handshake with whatever
/// is scripted at that moment, which is how tests stage failovers.
#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    scripts: Mutex<HashMap<Address, HelloReply>>,
    aliases: Mutex<HashMap<Address, Address>>,
    fail_connects: Mutex<HashMap<Address, usize>>,
    connect_counts: Mutex<HashMap<Address, usize>>,
    hello_counts: Mutex<HashMap<Address, usize>>,
    live_flags: Mutex<HashMap<Address, Vec<Arc<AtomicBool>>>>,
    open_connections: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn parse(raw: &str) -> Address {
        raw.parse().expect("mock addresses must parse")
    }

    fn script(&self, addr: &str, reply: HelloReply) {
        self.state.scripts.lock().unwrap().insert(Self::parse(addr), reply);
    }

    pub(crate) fn script_master(&self, addr: &str, peers: &[&str]) {
        self.script(
            addr,
            HelloReply {
                is_master: true,
                hosts: peers.iter().map(ToString::to_string).collect(),
                ..HelloReply::default()
            },
        );
    }

    pub(crate) fn script_slave(&self, addr: &str, peers: &[&str]) {
        self.script(
            addr,
            HelloReply {
                secondary: true,
                hosts: peers.iter().map(ToString::to_string).collect(),
                ..HelloReply::default()
            },
        );
    }

    pub(crate) fn script_unclassified(&self, addr: &str, peers: &[&str]) {
        self.script(
            addr,
            HelloReply {
                hosts: peers.iter().map(ToString::to_string).collect(),
                ..HelloReply::default()
            },
        );
    }

    /// Makes `from` resolve to `to`, the way two hostnames can point at one
    /// physical server.
    pub(crate) fn alias(&self, from: &str, to: &str) {
        self.state
            .aliases
            .lock()
            .unwrap()
            .insert(Self::parse(from), Self::parse(to));
    }

    /// Refuses the next `count` dials to this address, then lets dials
    /// through again.
    pub(crate) fn fail_next_connects(&self, addr: &str, count: usize) {
        self.state.fail_connects.lock().unwrap().insert(Self::parse(addr), count);
    }

    /// Marks every currently open connection to this address as dead.
    /// Connections dialed afterwards start out alive again.
    pub(crate) fn kill_connections(&self, addr: &str) {
        let flags = self.state.live_flags.lock().unwrap();
        if let Some(flags) = flags.get(&Self::parse(addr)) {
            for flag in flags {
                flag.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Dial attempts against this address, refused ones included.
    pub(crate) fn connect_count(&self, addr: &str) -> usize {
        self.state
            .connect_counts
            .lock()
            .unwrap()
            .get(&Self::parse(addr))
            .copied()
            .unwrap_or(0)
    }

    /// Handshakes answered by this address.
    pub(crate) fn hello_count(&self, addr: &str) -> usize {
        self.state
            .hello_counts
            .lock()
            .unwrap()
            .get(&Self::parse(addr))
            .copied()
            .unwrap_or(0)
    }

    /// Connections currently held somewhere, parked in a pool or checked out.
    pub(crate) fn open_connections(&self) -> usize {
        self.state.open_connections.load(Ordering::SeqCst)
    }
}

fn refused(address: &Address) -> ConnectorError {
    ConnectorError::Io {
        address: address.clone(),
        source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"),
    }
}

impl Connector for MockConnector {
    type Conn = MockConnection;

    async fn resolve(&self, address: &Address) -> Result<Address, ConnectorError> {
        let aliases = self.state.aliases.lock().unwrap();
        Ok(aliases.get(address).cloned().unwrap_or_else(|| address.clone()))
    }

    async fn connect(&self, address: &Address) -> Result<MockConnection, ConnectorError> {
        *self
            .state
            .connect_counts
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_insert(0) += 1;

        {
            let mut fails = self.state.fail_connects.lock().unwrap();
            if let Some(remaining) = fails.get_mut(address) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(refused(address));
                }
            }
        }

        if !self.state.scripts.lock().unwrap().contains_key(address) {
            return Err(refused(address));
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.state
            .live_flags
            .lock()
            .unwrap()
            .entry(address.clone())
            .or_default()
            .push(Arc::clone(&alive));
        self.state.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            address: address.clone(),
            alive,
        })
    }
}

pub(crate) struct MockConnection {
    state: Arc<MockState>,
    address: Address,
    alive: Arc<AtomicBool>,
}

impl MockConnection {
    pub(crate) fn address(&self) -> &Address {
        &self.address
    }
}

impl Connection for MockConnection {
    async fn hello(&mut self) -> Result<HelloReply, ConnectorError> {
        *self
            .state
            .hello_counts
            .lock()
            .unwrap()
            .entry(self.address.clone())
            .or_insert(0) += 1;
        let scripts = self.state.scripts.lock().unwrap();
        match scripts.get(&self.address) {
            Some(reply) => Ok(reply.clone()),
            None => Err(ConnectorError::Io {
                address: self.address.clone(),
                source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "server went away"),
            }),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
///
/// Under a paused clock the sleeps auto-advance, so waiting costs no wall
/// time while background tasks still get to run.
pub(crate) async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}
