//! Fan-out operations: stats, version and flush across every active server

use memshard::{ClientConfig, ShardedClient};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ClientConfig::new(["127.0.0.1:11211", "127.0.0.1:11212"]);
    let client = ShardedClient::connect(config)?;
    tokio::time::timeout(Duration::from_secs(5), client.wait_connected()).await?;

    // per-server results, keyed by host:port; disconnected servers are absent
    for (server, version) in client.version().await {
        println!("{} -> {:?}", server, version);
    }

    for (server, stats) in client.stats(None).await {
        match stats {
            Ok(stats) => println!("{}: {} stat entries", server, stats.len()),
            Err(e) => println!("{}: stats failed: {}", server, e),
        }
    }

    // one outcome per active server, in slot order
    let flushed = client.flush_all().await;
    println!("flushed {} servers", flushed.len());

    client.disconnect();
    Ok(())
}
