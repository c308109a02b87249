//! Connection slots - one supervised connection lifecycle per server
//!
//! A slot owns the full Disconnected -> Connecting -> Connected ->
//! Disconnected cycle for a single endpoint. A spawned supervisor task keeps
//! exactly one live connection at a time, republishing the handle after every
//! successful connect and scheduling jittered exponential-backoff retries
//! after every loss. Connection failures never surface to callers directly;
//! they only shrink the active set the router sees.

use crate::config::{ClientConfig, Endpoint};
use crate::connection::Connection;
use parking_lot::RwLock;
use rand::RngExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reconnect behavior shared by every slot of a client
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    pub connect_timeout: Duration,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            initial_delay: Duration::from_millis(config.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            backoff_factor: config.reconnect_backoff_factor,
        }
    }
}

/// Per-server connection slot
pub struct ConnectionSlot {
    endpoint: Endpoint,

    /// Live connection handle, present only while Connected
    conn: RwLock<Option<Connection>>,

    /// Resolved peer address, filled once the first connection completes
    peer: RwLock<Option<SocketAddr>>,

    connected: AtomicBool,
    stopping: AtomicBool,

    /// Interrupts backoff sleeps and live connections on stop
    stop: Notify,

    /// Fires once, on the first successful connect
    ready: watch::Sender<bool>,
}

impl ConnectionSlot {
    pub(crate) fn new(endpoint: Endpoint) -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            endpoint,
            conn: RwLock::new(None),
            peer: RwLock::new(None),
            connected: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            stop: Notify::new(),
            ready,
        })
    }

    /// The endpoint this slot was configured with
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether this slot currently holds a live connection
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Resolved address of the peer, once a connection has completed
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.read()
    }

    /// Borrow the live connection handle, if any
    pub(crate) fn connection(&self) -> Option<Connection> {
        self.conn.read().clone()
    }

    /// Wait until this slot has connected at least once
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // the sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Stop retrying and close any live transport. In-flight operations on
    /// this slot fail with a connection-closed condition.
    pub(crate) fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.stop.notify_waiters();
    }

    /// Start this slot's supervisor task
    pub(crate) fn spawn(self: &Arc<Self>, policy: ReconnectPolicy) -> JoinHandle<()> {
        let slot = Arc::clone(self);
        tokio::spawn(slot.run(policy))
    }

    async fn run(self: Arc<Self>, policy: ReconnectPolicy) {
        let mut delay = policy.initial_delay;
        loop {
            if self.stopping.load(Ordering::Acquire) {
                break;
            }

            match Connection::open(&self.endpoint, policy.connect_timeout).await {
                Ok((conn, mut io_task)) => {
                    info!(endpoint = %self.endpoint, peer = %conn.peer(), "connected");
                    *self.peer.write() = Some(conn.peer());
                    *self.conn.write() = Some(conn);
                    self.connected.store(true, Ordering::Release);
                    // backoff resets on every successful connect
                    delay = policy.initial_delay;
                    self.ready.send_replace(true);

                    let stopped = tokio::select! {
                        _ = &mut io_task => false,
                        _ = self.stop.notified() => true,
                    };
                    self.connected.store(false, Ordering::Release);
                    *self.conn.write() = None;
                    if stopped {
                        io_task.abort();
                        break;
                    }
                    warn!(endpoint = %self.endpoint, "connection lost");
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "connect failed");
                }
            }

            if self.stopping.load(Ordering::Acquire) {
                break;
            }
            let pause = jittered(delay);
            debug!(
                endpoint = %self.endpoint,
                delay_ms = pause.as_millis() as u64,
                "scheduling reconnect"
            );
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = self.stop.notified() => break,
            }
            delay = delay.mul_f64(policy.backoff_factor).min(policy.max_delay);
        }
        debug!(endpoint = %self.endpoint, "slot supervisor stopped");
    }
}

/// Spread retries out so a fleet-wide outage does not reconnect in lockstep
fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::rng().random_range(0.0..0.12);
    delay.mul_f64(factor)
}
