use std::time::Duration;

use tracing::instrument;
use url::Url;

use crate::address::DEFAULT_PORT;
use crate::tcp_connector::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROBE_TIMEOUT};
use crate::{Address, AddressParseError, Cluster, ClusterError, Connector, TcpConnector};

/// How long the synchronization task waits before retrying when a pass ends
/// with no master in sight.
pub const DEFAULT_SYNC_BACKOFF: Duration = Duration::from_millis(500);

/// Seed URIs may spell out this scheme, as in `ferrodb://db1:7171`.
const SEED_SCHEME: &str = "ferrodb";

/// Configures and creates a [`Cluster`].
///
/// # Example
///
/// ```no_run
/// use ferrodb_client::ClusterBuilder;
///
/// # async fn example() -> Result<(), ferrodb_client::ClusterError> {
/// let cluster = ClusterBuilder::new()
///     .set_seeds(&["db1.example.com", "ferrodb://db2.example.com:7172"])
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ClusterBuilder {
    seeds: Vec<String>,
    sync_backoff: Duration,
    connect_timeout: Duration,
    probe_timeout: Duration,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            sync_backoff: DEFAULT_SYNC_BACKOFF,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the addresses used to find the cluster. Accepted forms are
    /// `host`, `host:port`, and `ferrodb://host:port`.
    pub fn set_seeds<T>(mut self, seeds: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        self.seeds = seeds.iter().map(|seed| seed.as_ref().to_string()).collect();
        self
    }

    pub fn set_sync_backoff(mut self, backoff: Duration) -> Self {
        self.sync_backoff = backoff;
        self
    }

    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn set_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Validates the configuration and brings up a cluster over TCP.
    ///
    /// This spawns the background synchronization task, so it must be called
    /// within a tokio runtime.
    pub fn build(&self) -> Result<Cluster, ClusterError> {
        let connector = TcpConnector::new()
            .with_connect_timeout(self.connect_timeout)
            .with_probe_timeout(self.probe_timeout);
        self.build_with_connector(connector)
    }

    /// Same as [`ClusterBuilder::build`], but over a caller-supplied
    /// transport.
    #[instrument(level = "debug", name = "Build Cluster", skip(self, connector))]
    pub fn build_with_connector<C>(&self, connector: C) -> Result<Cluster<C>, ClusterError>
    where
        C: Connector,
    {
        if self.seeds.is_empty() {
            tracing::error!("no seed addresses were supplied and a cluster can't be found without at least one");
            return Err(ClusterError::MissingSeedsError);
        }
        let seeds = validate_seeds(&self.seeds)?;
        let initial_configuration = ClusterInitialConfiguration {
            seeds,
            sync_backoff: self.sync_backoff,
        };
        tracing::trace!("initial configuration: {:?}", &initial_configuration);
        Ok(Cluster::new(initial_configuration, connector))
    }
}

/// Everything the cluster constructor needs that came out of the builder.
#[derive(Debug)]
pub(crate) struct ClusterInitialConfiguration {
    pub(crate) seeds: Vec<Address>,
    pub(crate) sync_backoff: Duration,
}

#[instrument(level = "debug", name = "Validate Seeds")]
fn validate_seeds(seeds: &[String]) -> Result<Vec<Address>, ClusterError> {
    let mut addresses = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let address = parse_seed(seed).map_err(|source| ClusterError::InvalidSeedError {
            seed: seed.clone(),
            source,
        })?;
        addresses.push(address);
    }
    Ok(addresses)
}

fn parse_seed(seed: &str) -> Result<Address, AddressParseError> {
    if seed.contains("://") {
        let url = Url::parse(seed).map_err(|_| AddressParseError::Malformed(seed.to_string()))?;
        if url.scheme() != SEED_SCHEME {
            return Err(AddressParseError::UnsupportedScheme(url.scheme().to_string()));
        }
        let host = url.host_str().ok_or(AddressParseError::EmptyHost)?;
        // Url brackets IPv6 hosts; Address stores them bare.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = url.port().unwrap_or(DEFAULT_PORT);
        return Ok(Address::new(host, port));
    }
    seed.parse()
}
