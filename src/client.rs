//! Sharded client - key routing and fan-out orchestration
//!
//! The client owns one [`ConnectionSlot`] per configured server, in caller
//! order, and holds no key/value state of its own. Single-key operations
//! snapshot the currently active connections, pick one with the routing
//! fold, and delegate. Fan-out operations go to every active connection
//! concurrently and aggregate per-server outcomes without ever failing as a
//! whole.

use crate::codec;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{MemshardError, Result};
use crate::fanout;
use crate::pool::{ConnectionSlot, ReconnectPolicy};
use crate::proto::{CachedValue, StoreResult};
use crate::ring;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A set of independent cache servers presented as one logical cache
pub struct ShardedClient {
    config: ClientConfig,
    slots: Vec<Arc<ConnectionSlot>>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShardedClient {
    /// Build a client for the configured servers and begin connecting
    /// (unless the configuration defers it).
    ///
    /// Fails with [`MemshardError::InvalidEndpoint`] on the first server
    /// specification that is neither a hostname nor a `host:port` pair.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let slots = config
            .endpoints()?
            .into_iter()
            .map(ConnectionSlot::new)
            .collect();
        let client = Self {
            slots,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            config,
        };
        if !client.config.defer_connect {
            client.start();
        }
        Ok(client)
    }

    /// Start connection attempts for every slot. Idempotent; a no-op after
    /// the first call.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(servers = self.slots.len(), "starting connection slots");
        let policy = ReconnectPolicy::from(&self.config);
        let mut tasks = self.tasks.lock();
        for slot in &self.slots {
            tasks.push(slot.spawn(policy.clone()));
        }
    }

    /// Wait until every configured server has connected at least once.
    /// A server that never comes up keeps this pending; wrap in a timeout
    /// when that matters.
    pub async fn wait_connected(&self) {
        for slot in &self.slots {
            slot.wait_ready().await;
        }
    }

    /// Stop all reconnect loops, then close every open connection.
    /// Operations in flight fail with a connection-closed condition; no
    /// graceful protocol teardown is attempted beyond transport close.
    pub fn disconnect(&self) {
        info!("disconnecting from all servers");
        for slot in &self.slots {
            slot.stop();
        }
    }

    /// The configured slots, in caller order
    pub fn slots(&self) -> &[Arc<ConnectionSlot>] {
        &self.slots
    }

    /// Number of servers currently connected
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_connected()).count()
    }

    /// Snapshot of the currently active connections, in slot order
    fn active_connections(&self) -> Vec<Connection> {
        self.slots.iter().filter_map(|s| s.connection()).collect()
    }

    /// Pick the connection owning `key` among the active set
    fn route(&self, key: &str) -> Result<Connection> {
        let mut active = self.active_connections();
        debug!(key, active = active.len(), "routing");
        if active.is_empty() {
            return Err(MemshardError::NoServerAvailable);
        }
        let idx = ring::shard_index(key.as_bytes(), active.len());
        Ok(active.swap_remove(idx))
    }

    // ---- single-key operations ----

    /// Fetch a value. `None` means the key is not present.
    pub async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        self.route(key)?.get(key).await
    }

    /// Fetch a value along with its cas token
    pub async fn get_with_cas(&self, key: &str) -> Result<Option<CachedValue>> {
        self.route(key)?.get_with_cas(key).await
    }

    /// Fetch several keys in one round trip, routed by the first key
    pub async fn get_multiple(&self, keys: &[&str]) -> Result<HashMap<String, CachedValue>> {
        let Some(first) = keys.first() else {
            if self.active_connections().is_empty() {
                return Err(MemshardError::NoServerAvailable);
            }
            return Ok(HashMap::new());
        };
        self.route(first)?.get_multiple(keys).await
    }

    pub async fn set(
        &self,
        key: &str,
        value: impl AsRef<[u8]>,
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        self.route(key)?.set(key, value.as_ref(), flags, exptime).await
    }

    pub async fn add(
        &self,
        key: &str,
        value: impl AsRef<[u8]>,
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        self.route(key)?.add(key, value.as_ref(), flags, exptime).await
    }

    pub async fn replace(
        &self,
        key: &str,
        value: impl AsRef<[u8]>,
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        self.route(key)?.replace(key, value.as_ref(), flags, exptime).await
    }

    pub async fn append(&self, key: &str, value: impl AsRef<[u8]>) -> Result<StoreResult> {
        self.route(key)?.append(key, value.as_ref()).await
    }

    pub async fn prepend(&self, key: &str, value: impl AsRef<[u8]>) -> Result<StoreResult> {
        self.route(key)?.prepend(key, value.as_ref()).await
    }

    /// Compare-and-swap against a cas token from [`get_with_cas`](Self::get_with_cas)
    pub async fn check_and_set(
        &self,
        key: &str,
        value: impl AsRef<[u8]>,
        cas: u64,
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        self.route(key)?
            .check_and_set(key, value.as_ref(), cas, flags, exptime)
            .await
    }

    /// Delete a key. Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.route(key)?.delete(key).await
    }

    /// Increment a counter. `None` means the key does not exist.
    pub async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>> {
        self.route(key)?.increment(key, delta).await
    }

    /// Decrement a counter. `None` means the key does not exist.
    pub async fn decrement(&self, key: &str, delta: u64) -> Result<Option<u64>> {
        self.route(key)?.decrement(key, delta).await
    }

    // ---- packed value operations ----

    /// Serialize (and optionally compress) a value, then `set` it
    pub async fn set_packed<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        compress: bool,
    ) -> Result<StoreResult> {
        let data = codec::encode(value, compress)?;
        self.set(key, data, 0, 0).await
    }

    /// Serialize (and optionally compress) a value, then `add` it
    pub async fn add_packed<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        compress: bool,
    ) -> Result<StoreResult> {
        let data = codec::encode(value, compress)?;
        self.add(key, data, 0, 0).await
    }

    /// Fetch and decode a packed value. A miss stays `None`, untouched by
    /// the codec; `decompress` must match the flag used on the write side.
    pub async fn get_packed<T: DeserializeOwned>(
        &self,
        key: &str,
        decompress: bool,
    ) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(codec::decode(&value.data, decompress)?)),
            None => Ok(None),
        }
    }

    // ---- fan-out operations ----

    /// Flush every active server. Returns one outcome per active server in
    /// slot order; with zero active servers the result is empty, not an
    /// error.
    pub async fn flush_all(&self) -> Vec<Result<()>> {
        let active = self.active_connections();
        info!(servers = active.len(), "flushing all servers");
        fanout::join_ordered(
            active
                .into_iter()
                .map(|conn| async move { conn.flush_all().await }),
        )
        .await
    }

    /// Collect statistics from every active server, keyed by `host:port`.
    /// Servers not currently connected are absent from the map.
    pub async fn stats(
        &self,
        arg: Option<&str>,
    ) -> HashMap<String, Result<HashMap<String, String>>> {
        let arg = arg.map(str::to_string);
        let pairs: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| {
                slot.connection()
                    .map(|conn| (slot.endpoint().to_string(), conn))
            })
            .map(|(identity, conn)| {
                let arg = arg.clone();
                (identity, async move { conn.stats(arg.as_deref()).await })
            })
            .collect();
        debug!(servers = pairs.len(), "collecting stats");
        fanout::join_keyed(pairs).await
    }

    /// Collect the version string of every active server, keyed by
    /// `host:port`. Servers not currently connected are absent from the map.
    pub async fn version(&self) -> HashMap<String, Result<String>> {
        let pairs: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| {
                slot.connection()
                    .map(|conn| (slot.endpoint().to_string(), conn))
            })
            .map(|(identity, conn)| (identity, async move { conn.version().await }))
            .collect();
        debug!(servers = pairs.len(), "collecting versions");
        fanout::join_keyed(pairs).await
    }
}

impl Drop for ShardedClient {
    fn drop(&mut self) {
        for slot in &self.slots {
            slot.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_client() -> ShardedClient {
        // deferred: slots exist but nothing ever connects
        let config = ClientConfig::new(["one:123", "two:456"]).deferred();
        ShardedClient::connect(config).unwrap()
    }

    #[test]
    fn test_invalid_endpoint_fails_construction() {
        let config = ClientConfig::new(["ok:1", "bad:port"]);
        assert!(matches!(
            ShardedClient::connect(config),
            Err(MemshardError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_slot_order_matches_config() {
        let client = idle_client();
        let names: Vec<String> = client.slots().iter().map(|s| s.endpoint().to_string()).collect();
        assert_eq!(names, vec!["one:123", "two:456"]);
    }

    #[tokio::test]
    async fn test_single_key_ops_fail_without_servers() {
        let client = idle_client();
        assert!(matches!(
            client.get("foo").await,
            Err(MemshardError::NoServerAvailable)
        ));
        assert!(matches!(
            client.set("foo", b"bar", 0, 0).await,
            Err(MemshardError::NoServerAvailable)
        ));
        assert!(matches!(
            client.get_multiple(&[]).await,
            Err(MemshardError::NoServerAvailable)
        ));
        assert!(matches!(
            client.increment("n", 1).await,
            Err(MemshardError::NoServerAvailable)
        ));
    }

    #[tokio::test]
    async fn test_fan_out_is_empty_without_servers() {
        let client = idle_client();
        assert!(client.flush_all().await.is_empty());
        assert!(client.stats(None).await.is_empty());
        assert!(client.version().await.is_empty());
        assert_eq!(client.active_count(), 0);
    }

    #[tokio::test]
    async fn test_packed_set_fails_without_servers() {
        let client = idle_client();
        let value = std::collections::HashMap::from([("foo", "bar")]);
        assert!(matches!(
            client.set_packed("k", &value, true).await,
            Err(MemshardError::NoServerAvailable)
        ));
    }
}
