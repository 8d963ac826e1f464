/*!
ferrodb_client is the topology layer of a client library for the FerroDB
replicated database.

A [`Cluster`] starts from a handful of seed addresses and keeps a live
picture of the deployment behind them: a background task probes every known
address, walks the peer lists the servers advertise, and partitions the
result into masters and slaves. [`Cluster::acquire`] routes connection
requests against that picture, sending writes to a master and reads to a
slave when one exists, and blocks while no suitable server is known instead
of failing fast.

Connections are pooled per server and handed out as [`PooledConn`] guards
that return themselves on drop. The transport is pluggable through the
[`Connector`] trait; [`TcpConnector`] speaks the line protocol over TCP and
is what [`ClusterBuilder::build`] wires in.

# Example

```no_run
use ferrodb_client::{AccessMode, ClusterBuilder, Connection};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cluster = ClusterBuilder::new()
        .set_seeds(&["db1.example.com", "ferrodb://db2.example.com:7172"])
        .build()?;

    let timeout = Some(std::time::Duration::from_secs(10));
    let mut connection = cluster.acquire(AccessMode::Write, timeout).await?;
    let reply = connection.hello().await?;
    println!("connected; the server reports master = {}", reply.is_master);
    Ok(())
}
```

When the last [`Cluster`] handle is dropped, the background work stops and
every pooled connection is closed.
*/

mod address;
mod cluster;
mod connection_pool;
mod connector;
mod server;
mod server_set;
mod stats;
mod tcp_connector;

#[cfg(test)]
pub(crate) mod test_support;

pub use address::*;
pub use cluster::*;
pub use connection_pool::*;
pub use connector::*;
pub use server::*;
pub use stats::*;
pub use tcp_connector::*;

pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
