//! Basic usage: connect to a pool of servers and shard keys across them
//!
//! Run against live memcached instances:
//! ```bash
//! cargo run --example basic
//! ```

use memshard::{ClientConfig, ShardedClient};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // bare hostnames get the default memcached port (11211)
    let config = ClientConfig::new(["127.0.0.1:11211", "127.0.0.1:11212"])
        .with_connect_timeout(Duration::from_secs(2));
    let client = ShardedClient::connect(config)?;

    // wait for the fleet to come up (bound it: a dead server waits forever)
    tokio::time::timeout(Duration::from_secs(5), client.wait_connected()).await?;
    println!("connected to {} servers", client.active_count());

    client.set("user:1", b"John Doe", 0, 0).await?;
    let value = client.get("user:1").await?;
    println!("user:1 = {:?}", value);

    // packed values: serialize + compress structured data transparently
    let profile = std::collections::HashMap::from([("name", "John"), ("city", "Lisbon")]);
    client.set_packed("user:1:profile", &profile, true).await?;
    let back: Option<std::collections::HashMap<String, String>> =
        client.get_packed("user:1:profile", true).await?;
    println!("profile = {:?}", back);

    client.disconnect();
    Ok(())
}
