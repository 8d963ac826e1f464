use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::{Address, Connection, Connector, ConnectorError, HelloReply};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Production [`Connector`]: plain TCP, with the `hello` probe exchanged as
/// one newline-terminated JSON request and one newline-terminated JSON reply.
///
/// The document wire protocol proper is spoken by higher layers over the
/// same connections; this type only knows the administrative probe.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    connect_timeout: Duration,
    probe_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }
}

impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn resolve(&self, address: &Address) -> Result<Address, ConnectorError> {
        let mut resolved = lookup_host((address.host(), address.port()))
            .await
            .map_err(|source| ConnectorError::Resolve {
                address: address.clone(),
                source,
            })?;
        match resolved.next() {
            Some(canonical) => Ok(Address::new(canonical.ip().to_string(), canonical.port())),
            None => Err(ConnectorError::Resolve {
                address: address.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "resolver returned no addresses",
                ),
            }),
        }
    }

    async fn connect(&self, address: &Address) -> Result<TcpConnection, ConnectorError> {
        let stream = timeout(
            self.connect_timeout,
            TcpStream::connect((address.host(), address.port())),
        )
        .await
        .map_err(|_| ConnectorError::Timeout {
            address: address.clone(),
        })?
        .map_err(|source| ConnectorError::Io {
            address: address.clone(),
            source,
        })?;
        stream.set_nodelay(true).map_err(|source| ConnectorError::Io {
            address: address.clone(),
            source,
        })?;
        tracing::debug!("opened connection to `{}`", address);
        Ok(TcpConnection {
            address: address.clone(),
            stream: BufReader::new(stream),
            probe_timeout: self.probe_timeout,
        })
    }
}

/// One open TCP channel to a server.
pub struct TcpConnection {
    address: Address,
    stream: BufReader<TcpStream>,
    probe_timeout: Duration,
}

impl TcpConnection {
    /// The resolved address this connection was dialed to.
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("address", &self.address)
            .finish()
    }
}

impl Connection for TcpConnection {
    async fn hello(&mut self) -> Result<HelloReply, ConnectorError> {
        let mut request = serde_json::json!({ "hello": 1 }).to_string();
        request.push('\n');

        let exchange = async {
            self.stream.write_all(request.as_bytes()).await?;
            self.stream.flush().await?;
            let mut line = String::new();
            let read = self.stream.read_line(&mut line).await?;
            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before hello reply",
                ));
            }
            Ok(line)
        };

        let line = timeout(self.probe_timeout, exchange)
            .await
            .map_err(|_| ConnectorError::Timeout {
                address: self.address.clone(),
            })?
            .map_err(|source| ConnectorError::Io {
                address: self.address.clone(),
                source,
            })?;

        serde_json::from_str(line.trim_end()).map_err(|source| ConnectorError::Protocol {
            address: self.address.clone(),
            source,
        })
    }

    fn is_alive(&self) -> bool {
        let mut probe = [0u8; 1];
        match self.stream.get_ref().try_read(&mut probe) {
            // Peer closed the connection.
            Ok(0) => false,
            // Data nobody asked for; the stream is desynced.
            Ok(_) => false,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }
}
