//! # memshard
//!
//! Sharded memcached client: a set of independent cache servers presented as
//! one logical cache.
//!
//! ## Features
//!
//! - 🧭 **Consistent key routing**: deterministic key-to-server mapping over
//!   the currently active connection set
//! - 🔌 **Auto-reconnect**: one supervised, persistent connection per server
//!   with jittered exponential backoff; a dead server never breaks
//!   operations on the others
//! - 📡 **Fan-out operations**: `flush_all`, `stats` and `version` hit every
//!   active server concurrently and aggregate per-server outcomes
//! - 📦 **Packed values**: optional MessagePack + LZ4 codec on top of raw
//!   byte values
//! - 🔄 **Async/Await**: built on Tokio; pipelined in-order request/response
//!   per connection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use memshard::{ClientConfig, ShardedClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // bare hostnames get the default memcached port
//!     let config = ClientConfig::new(["cache01", "cache02:11311"]);
//!     let client = ShardedClient::connect(config)?;
//!     client.wait_connected().await;
//!
//!     client.set("user:1", b"John Doe", 0, 0).await?;
//!     let value = client.get("user:1").await?;
//!     println!("Value: {:?}", value);
//!
//!     client.disconnect();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod fanout;
pub mod pool;
pub mod proto;
pub mod ring;

pub use client::ShardedClient;
pub use config::{ClientConfig, DEFAULT_PORT, Endpoint};
pub use connection::Connection;
pub use error::{CodecError, MemshardError, Result};
pub use pool::ConnectionSlot;
pub use proto::{CachedValue, StoreResult};
