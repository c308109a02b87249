//! Per-server connection actor
//!
//! Each open socket is driven by two tasks: a writer draining a command
//! channel and a reader parsing responses. The writer queues the response
//! expectation *before* any byte hits the wire, so the reader always matches
//! replies to requests in issuance order - request/response pipelining
//! without per-operation locking.
//!
//! When the socket dies (EOF, I/O error, protocol desync) both tasks wind
//! down and every queued or in-flight operation observes
//! [`MemshardError::ConnectionClosed`] through its dropped reply channel.
//! Nothing hangs and nothing escapes to other connections.

use crate::config::Endpoint;
use crate::error::{MemshardError, Result};
use crate::proto::{self, CachedValue, Response, ResponseShape, StoreResult, StoreVerb};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Command {
    frame: Vec<u8>,
    shape: ResponseShape,
    reply: oneshot::Sender<Result<Response>>,
}

type Expectation = (ResponseShape, oneshot::Sender<Result<Response>>);

/// Cheap-clone handle to one live server connection.
///
/// Every supported cache operation is a named method here; the sharded
/// client borrows a handle per operation and never owns the socket.
#[derive(Clone)]
pub struct Connection {
    tx: mpsc::UnboundedSender<Command>,
    peer: SocketAddr,
}

impl Connection {
    /// Establish a connection and spawn its I/O tasks. Returns the handle
    /// plus the reader task handle, which completes when the connection dies.
    pub(crate) async fn open(
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<(Self, JoinHandle<()>)> {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| {
                MemshardError::Io(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
            })??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (rd, wr) = stream.into_split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (exp_tx, exp_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(wr, cmd_rx, exp_tx));
        let io_task = tokio::spawn(read_loop(BufReader::new(rd), exp_rx));

        Ok((Self { tx: cmd_tx, peer }, io_task))
    }

    /// Resolved address of the peer this handle talks to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    async fn roundtrip(&self, frame: Vec<u8>, shape: ResponseShape) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command {
                frame,
                shape,
                reply: reply_tx,
            })
            .map_err(|_| MemshardError::ConnectionClosed)?;
        reply_rx.await.map_err(|_| MemshardError::ConnectionClosed)?
    }

    fn shape_mismatch(resp: Response) -> MemshardError {
        MemshardError::Protocol(format!("response shape mismatch: {:?}", resp))
    }

    async fn store(
        &self,
        verb: StoreVerb,
        key: &str,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        proto::validate_key(key)?;
        let frame = proto::store_command(verb, key, flags, exptime, value);
        match self.roundtrip(frame, ResponseShape::Store).await? {
            Response::Store(result) => Ok(result),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Fetch a single value. `None` means the key is not present.
    pub async fn get(&self, key: &str) -> Result<Option<CachedValue>> {
        proto::validate_key(key)?;
        let frame = proto::retrieval_command(&[key], false);
        match self.roundtrip(frame, ResponseShape::Values).await? {
            Response::Values(mut values) => Ok(values.pop().map(|(_, v)| v)),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Fetch a single value along with its cas token (for `check_and_set`)
    pub async fn get_with_cas(&self, key: &str) -> Result<Option<CachedValue>> {
        proto::validate_key(key)?;
        let frame = proto::retrieval_command(&[key], true);
        match self.roundtrip(frame, ResponseShape::Values).await? {
            Response::Values(mut values) => Ok(values.pop().map(|(_, v)| v)),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Fetch several keys in one round trip. Missing keys are simply absent
    /// from the result map.
    pub async fn get_multiple(&self, keys: &[&str]) -> Result<HashMap<String, CachedValue>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        for key in keys {
            proto::validate_key(key)?;
        }
        let frame = proto::retrieval_command(keys, false);
        match self.roundtrip(frame, ResponseShape::Values).await? {
            Response::Values(values) => Ok(values.into_iter().collect()),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        self.store(StoreVerb::Set, key, value, flags, exptime).await
    }

    pub async fn add(
        &self,
        key: &str,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        self.store(StoreVerb::Add, key, value, flags, exptime).await
    }

    pub async fn replace(
        &self,
        key: &str,
        value: &[u8],
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        self.store(StoreVerb::Replace, key, value, flags, exptime).await
    }

    pub async fn append(&self, key: &str, value: &[u8]) -> Result<StoreResult> {
        self.store(StoreVerb::Append, key, value, 0, 0).await
    }

    pub async fn prepend(&self, key: &str, value: &[u8]) -> Result<StoreResult> {
        self.store(StoreVerb::Prepend, key, value, 0, 0).await
    }

    /// Compare-and-swap against a cas token previously fetched with
    /// [`get_with_cas`](Self::get_with_cas)
    pub async fn check_and_set(
        &self,
        key: &str,
        value: &[u8],
        cas: u64,
        flags: u32,
        exptime: u32,
    ) -> Result<StoreResult> {
        proto::validate_key(key)?;
        let frame = proto::cas_command(key, flags, exptime, cas, value);
        match self.roundtrip(frame, ResponseShape::Store).await? {
            Response::Store(result) => Ok(result),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Delete a key. Returns whether the key existed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        proto::validate_key(key)?;
        match self.roundtrip(proto::delete_command(key), ResponseShape::Delete).await? {
            Response::Deleted(existed) => Ok(existed),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Increment a counter. `None` means the key does not exist.
    pub async fn increment(&self, key: &str, delta: u64) -> Result<Option<u64>> {
        proto::validate_key(key)?;
        let frame = proto::counter_command(true, key, delta);
        match self.roundtrip(frame, ResponseShape::Counter).await? {
            Response::Counter(value) => Ok(value),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Decrement a counter. `None` means the key does not exist.
    pub async fn decrement(&self, key: &str, delta: u64) -> Result<Option<u64>> {
        proto::validate_key(key)?;
        let frame = proto::counter_command(false, key, delta);
        match self.roundtrip(frame, ResponseShape::Counter).await? {
            Response::Counter(value) => Ok(value),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Drop every item stored on this server
    pub async fn flush_all(&self) -> Result<()> {
        match self.roundtrip(proto::flush_command(), ResponseShape::Flush).await? {
            Response::Flushed => Ok(()),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Fetch this server's statistics
    pub async fn stats(&self, arg: Option<&str>) -> Result<HashMap<String, String>> {
        match self.roundtrip(proto::stats_command(arg), ResponseShape::Stats).await? {
            Response::Stats(stats) => Ok(stats),
            other => Err(Self::shape_mismatch(other)),
        }
    }

    /// Fetch this server's version string
    pub async fn version(&self) -> Result<String> {
        match self.roundtrip(proto::version_command(), ResponseShape::Version).await? {
            Response::Version(version) => Ok(version),
            other => Err(Self::shape_mismatch(other)),
        }
    }
}

async fn write_loop(
    mut wr: OwnedWriteHalf,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    exp_tx: mpsc::UnboundedSender<Expectation>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        // queue the expectation before any byte hits the wire so the reader
        // matches responses in issuance order
        if exp_tx.send((cmd.shape, cmd.reply)).is_err() {
            break;
        }
        if let Err(e) = wr.write_all(&cmd.frame).await {
            debug!(error = %e, "write failed");
            break;
        }
    }
    // dropping the write half shuts down the outbound side
}

enum IdleEvent {
    PeerClosed,
    Unsolicited,
    Failed(io::Error),
}

/// Watch the socket between requests so a server-initiated close is noticed
/// immediately instead of on the next use.
async fn idle_probe<R: AsyncBufRead + Unpin>(rd: &mut R) -> IdleEvent {
    match rd.fill_buf().await {
        Ok(buf) if buf.is_empty() => IdleEvent::PeerClosed,
        Ok(_) => IdleEvent::Unsolicited,
        Err(e) => IdleEvent::Failed(e),
    }
}

async fn read_loop(
    mut rd: BufReader<OwnedReadHalf>,
    mut exp_rx: mpsc::UnboundedReceiver<Expectation>,
) {
    loop {
        let next = tokio::select! {
            biased;
            exp = exp_rx.recv() => exp,
            event = idle_probe(&mut rd) => {
                match event {
                    IdleEvent::PeerClosed => debug!("server closed the connection"),
                    IdleEvent::Unsolicited => warn!("unsolicited data from server"),
                    IdleEvent::Failed(e) => debug!(error = %e, "read failed while idle"),
                }
                None
            }
        };
        let Some((shape, reply)) = next else { break };

        match proto::read_response(&mut rd, shape).await {
            Ok(resp) => {
                let _ = reply.send(Ok(resp));
            }
            Err(err) => {
                let fatal = err.is_fatal();
                let _ = reply.send(Err(err));
                if fatal {
                    break;
                }
            }
        }
    }
    // remaining expectations drop here; their reply channels close and every
    // waiting caller observes ConnectionClosed
}
