use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{instrument, Span};
use uuid::Uuid;

use super::cluster_handle::ClusterShared;
use crate::{Address, Connection, Connector, ConnectorError, Role, Server};

/// Kicks off a synchronization run on its own task.
///
/// Safe to call from anywhere at any time: the run bows out immediately if
/// another one is already in flight or the cluster is gone.
pub(crate) fn spawn_sync<C: Connector>(shared: &Arc<ClusterShared<C>>) {
    let shared = Arc::clone(shared);
    tokio::spawn(run_sync(shared));
}

async fn run_sync<C: Connector>(shared: Arc<ClusterShared<C>>) {
    loop {
        tracing::info!("starting full topology synchronization");
        let known = shared.known_addresses();
        if !shared.begin_pass() {
            tracing::debug!("a synchronization pass is already running, nothing to do");
            return;
        }
        run_pass(&shared, known).await;
        if !shared.finish_pass() {
            return;
        }
        // No master was found. Give the cluster a moment and try again;
        // writes are blocked until a master shows up.
        tokio::time::sleep(shared.sync_backoff()).await;
    }
}

#[instrument(level = "debug", name = "Topology Synchronization Pass", skip(shared), fields(correlation_id))]
async fn run_pass<C: Connector>(shared: &Arc<ClusterShared<C>>, known: Vec<Address>) {
    Span::current().record("correlation_id", Uuid::new_v4().to_string());
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let (branch, mut quiesced) = mpsc::channel::<()>(1);
    for address in known {
        spawn_probe(Arc::clone(shared), address, Arc::clone(&seen), branch.clone());
    }
    drop(branch);
    // Nothing is ever sent on the channel. It closes once the last probe
    // drops its sender, which is exactly when the recursive fan-out below
    // has died out.
    while quiesced.recv().await.is_some() {}
}

/// Probes one address on its own task and fans out to every peer it reports.
///
/// Each probe clones `branch` for its children before its own clone is
/// dropped, so the pass's receiver cannot close while any branch of the
/// recursion is still alive.
fn spawn_probe<C: Connector>(
    shared: Arc<ClusterShared<C>>,
    address: Address,
    seen: Arc<Mutex<HashSet<Address>>>,
    branch: mpsc::Sender<()>,
) {
    tokio::spawn(async move {
        let resolved = match shared.connector_ref().resolve(&address).await {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::warn!("failed to start synchronization of `{}`: {}", address, error);
                return;
            }
        };

        {
            let mut seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
            if !seen.insert(resolved.clone()) {
                tracing::debug!(
                    "`{}` resolves to `{}`, which was already probed in this pass",
                    address,
                    resolved
                );
                return;
            }
        }

        let server = Server::new(address, resolved, shared.connector());
        match probe_server(&shared, &server).await {
            Ok(peers) => {
                for peer in peers {
                    spawn_probe(Arc::clone(&shared), peer, Arc::clone(&seen), branch.clone());
                }
            }
            Err(error) => {
                tracing::warn!("synchronization of `{}` failed: {}", server.address(), error);
                shared.remove_server(&server);
            }
        }
    });
}

/// Runs the handshake against one server, classifies it, merges it into the
/// topology, and reports the peer addresses it advertised.
#[instrument(level = "debug", name = "Probe Server", skip_all, fields(address = %server.address()))]
async fn probe_server<C: Connector>(
    shared: &ClusterShared<C>,
    server: &Server<C>,
) -> Result<Vec<Address>, ConnectorError> {
    tracing::debug!("processing `{}`", server.address());

    let mut connection = server.pool().acquire().await?;
    let reply = connection.hello().await?;

    let role = if reply.is_master {
        tracing::debug!("`{}` is a master", server.address());
        Role::Master
    } else if reply.secondary {
        tracing::debug!("`{}` is a slave", server.address());
        Role::Slave
    } else {
        tracing::info!("`{}` is neither a master nor a slave", server.address());
        Role::Unclassified
    };
    server.set_role(role);
    let peers = reply.peers();

    // Park the probe connection before merging so it is already reusable
    // through the merged handle.
    drop(connection);
    shared.merge_server(server.clone());

    tracing::debug!("`{}` knows about the following peers: {:?}", server.address(), peers);
    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{wait_until, MockConnector};
    use crate::{AccessMode, ClusterBuilder};
    use std::time::Duration;

    fn address(raw: &str) -> Address {
        raw.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn seeds_resolving_to_the_same_server_are_probed_once() {
        // Arrange: two hostnames, one actual server behind them.
        let connector = MockConnector::new();
        connector.script_master("10.0.0.9:7171", &[]);
        connector.alias("db1:7171", "10.0.0.9:7171");
        connector.alias("db2:7171", "10.0.0.9:7171");

        // Act
        let cluster = ClusterBuilder::new()
            .set_seeds(&["db1:7171", "db2:7171"])
            .build_with_connector(connector.clone())
            .unwrap();
        wait_until(|| {
            let stats = cluster.stats();
            stats.servers == 1 && !stats.syncing
        })
        .await;

        // Assert
        assert_eq!(connector.hello_count("10.0.0.9:7171"), 1);
        assert_eq!(cluster.stats().masters, 1);
        assert_eq!(
            cluster.known_addresses(),
            vec![address("db1:7171"), address("db2:7171")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_servers_still_contribute_their_peers() {
        // Arrange: the seed answers the handshake but claims no role; the
        // master is only reachable through its peer list.
        let connector = MockConnector::new();
        connector.script_unclassified("a:7171", &["b:7171"]);
        connector.script_master("b:7171", &["a:7171", "b:7171"]);

        // Act
        let cluster = ClusterBuilder::new()
            .set_seeds(&["a:7171"])
            .build_with_connector(connector)
            .unwrap();
        wait_until(|| {
            let stats = cluster.stats();
            stats.masters == 1 && !stats.syncing
        })
        .await;

        // Assert
        let stats = cluster.stats();
        assert_eq!(stats.servers, 2);
        assert_eq!(stats.unclassified, 1);
        assert_eq!(stats.slaves, 0);
        // Reads fall back to the master; the unclassified seed is never picked.
        let connection = cluster.acquire(AccessMode::Read, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(connection.address(), &address("b:7171"));
    }

    #[tokio::test(start_paused = true)]
    async fn a_failed_pass_keeps_the_dynamic_seeds_for_the_next_attempt() {
        // Arrange: discover a healthy two-server topology first.
        let connector = MockConnector::new();
        connector.script_master("a:7171", &["b:7171"]);
        connector.script_slave("b:7171", &["a:7171", "b:7171"]);
        let cluster = ClusterBuilder::new()
            .set_seeds(&["a:7171"])
            .build_with_connector(connector.clone())
            .unwrap();
        wait_until(|| {
            let stats = cluster.stats();
            stats.masters == 1 && stats.slaves == 1
        })
        .await;

        // Act: every server goes dark and a resynchronization runs.
        connector.kill_connections("a:7171");
        connector.kill_connections("b:7171");
        connector.fail_next_connects("a:7171", 50);
        connector.fail_next_connects("b:7171", 50);
        spawn_sync(cluster.shared());
        wait_until(|| cluster.stats().servers == 0).await;

        // Assert: `b` was never a user seed, yet it is still worth probing.
        assert_eq!(
            cluster.known_addresses(),
            vec![address("a:7171"), address("b:7171")]
        );
    }
}
