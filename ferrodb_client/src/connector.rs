use std::future::Future;

use serde::Deserialize;

use crate::{error_chain_fmt, Address};

/// Opens connections to FerroDB servers.
///
/// The cluster is generic over this trait so that the discovery and routing
/// logic can be driven by any transport. [`TcpConnector`](crate::TcpConnector)
/// is the production implementation; tests script a connector of their own.
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// Resolves a configured address to its canonical form.
    ///
    /// Two configured aliases of the same physical server must resolve to the
    /// same canonical address; discovery deduplicates on the result.
    fn resolve(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<Address, ConnectorError>> + Send;

    /// Opens a fresh connection to the given (already resolved) address.
    fn connect(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<Self::Conn, ConnectorError>> + Send;
}

/// A single open channel to one server.
///
/// Closing is dropping. The only command the topology core ever issues is the
/// `hello` probe; everything else the driver runs over a connection lives in
/// higher layers.
pub trait Connection: Send + 'static {
    /// Runs the `hello` administrative command and decodes its reply.
    fn hello(&mut self) -> impl Future<Output = Result<HelloReply, ConnectorError>> + Send;

    /// Best-effort liveness check for idle connections.
    ///
    /// Must not block; a `false` gets the connection dropped instead of
    /// handed out again.
    fn is_alive(&self) -> bool;
}

/// Decoded reply to the `hello` probe command.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelloReply {
    pub is_master: bool,
    pub secondary: bool,
    pub primary: Option<String>,
    pub hosts: Vec<String>,
    pub passives: Vec<String>,
}

impl HelloReply {
    /// Peer addresses in the order discovery should visit them: the reported
    /// primary first, then active members, then passive members.
    ///
    /// Entries that do not parse as addresses are logged and skipped.
    pub fn peers(&self) -> Vec<Address> {
        let mut peers = Vec::with_capacity(1 + self.hosts.len() + self.passives.len());
        let raw = self
            .primary
            .iter()
            .chain(self.hosts.iter())
            .chain(self.passives.iter());
        for entry in raw {
            match entry.parse::<Address>() {
                Ok(address) => peers.push(address),
                Err(error) => {
                    tracing::warn!("discarding unparseable peer address `{}`: {}", entry, error);
                }
            }
        }
        peers
    }
}

#[derive(thiserror::Error)]
pub enum ConnectorError {
    #[error("could not resolve `{address}`")]
    Resolve {
        address: Address,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o failure talking to `{address}`")]
    Io {
        address: Address,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed hello reply from `{address}`")]
    Protocol {
        address: Address,
        #[source]
        source: serde_json::Error,
    },
    #[error("timed out waiting for `{address}`")]
    Timeout { address: Address },
    #[error("connection pool is closed")]
    PoolClosed,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
