use std::time::Duration;

use ferrodb_client::{AccessMode, ClusterBuilder};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::subscriber::set_global_default;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Brings up two fake FerroDB servers on loopback, one master and one slave,
/// lets the cluster discover them from a single seed, and routes a write and
/// a read.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();

    let master_listener = TcpListener::bind("127.0.0.1:0").await?;
    let slave_listener = TcpListener::bind("127.0.0.1:0").await?;
    let master_addr = master_listener.local_addr()?;
    let slave_addr = slave_listener.local_addr()?;
    let hosts = vec![master_addr.to_string(), slave_addr.to_string()];

    serve(
        master_listener,
        serde_json::json!({
            "isMaster": true,
            "primary": master_addr.to_string(),
            "hosts": hosts,
        }),
    );
    serve(
        slave_listener,
        serde_json::json!({
            "secondary": true,
            "primary": master_addr.to_string(),
            "hosts": hosts,
        }),
    );

    let cluster = ClusterBuilder::new().set_seeds(&[master_addr.to_string()]).build()?;
    let timeout = Some(Duration::from_secs(10));

    let write_connection = cluster.acquire(AccessMode::Write, timeout).await?;
    println!("writes go to {}", write_connection.address());
    drop(write_connection);

    // The slave is discovered through the master's peer list; give the
    // synchronization a moment to merge it before asking for a read.
    while cluster.stats().slaves == 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let read_connection = cluster.acquire(AccessMode::Read, timeout).await?;
    println!("reads go to {}", read_connection.address());
    drop(read_connection);

    println!("known addresses: {:?}", cluster.known_addresses());
    println!("{:#?}", cluster.stats());

    Ok(())
}

/// Accepts connections forever and answers every request line with the same
/// hello reply.
fn serve(listener: TcpListener, reply: serde_json::Value) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(stream, reply.clone()));
                }
                Err(_) => break,
            }
        }
    });
}

async fn serve_connection(stream: TcpStream, reply: serde_json::Value) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(_request)) = lines.next_line().await {
        let mut payload = reply.to_string();
        payload.push('\n');
        if writer.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}

fn setup_tracing() {
    // Redirect all `log`'s events to the subscriber
    LogTracer::init().expect("Failed to set logger");
    // Set up tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatting_layer = BunyanFormattingLayer::new("ferrodb-demo".into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    set_global_default(subscriber).expect("Failed to set subscriber");
}
