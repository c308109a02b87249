//! Common test utilities - an in-process cache server speaking the
//! memcached ASCII protocol over a real TCP socket.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Keys starting with this prefix make the fake server drop the connection
/// instead of replying - used to exercise connection-loss handling.
#[allow(dead_code)]
pub const DROP_PREFIX: &str = "boom";

/// Per-server canned responses
pub struct FakeOptions {
    pub stats: Vec<(String, String)>,
    pub version: String,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            stats: vec![("uptime".to_string(), "1".to_string())],
            version: "1.6.0-fake".to_string(),
        }
    }
}

impl FakeOptions {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self {
            stats: Vec::new(),
            version: "1.6.0-fake".to_string(),
        }
    }

    #[allow(dead_code)]
    pub fn with_stat(mut self, name: &str, value: &str) -> Self {
        self.stats.push((name.to_string(), value.to_string()));
        self
    }

    #[allow(dead_code)]
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }
}

type Store = Arc<Mutex<HashMap<String, (u32, Vec<u8>)>>>;

/// A fake memcached instance bound to an ephemeral local port.
/// Every received command line is logged for delivery assertions.
pub struct FakeServer {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<String>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeServer {
    #[allow(dead_code)]
    pub async fn start() -> Self {
        Self::start_with(FakeOptions::default()).await
    }

    pub async fn start_with(options: FakeOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let store: Store = Arc::new(Mutex::new(HashMap::new()));
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let options = Arc::new(options);

        let accept_log = Arc::clone(&log);
        let accept_tasks = Arc::clone(&tasks);
        let accept = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let conn = tokio::spawn(serve(
                    socket,
                    Arc::clone(&store),
                    Arc::clone(&accept_log),
                    Arc::clone(&options),
                ));
                accept_tasks.lock().push(conn);
            }
        });
        tasks.lock().push(accept);

        Self { addr, log, tasks }
    }

    /// The `host:port` specification clients connect to
    pub fn endpoint(&self) -> String {
        format!("127.0.0.1:{}", self.addr.port())
    }

    /// Every command line this server has received, in arrival order
    #[allow(dead_code)]
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Whether any received command starts with `prefix`
    #[allow(dead_code)]
    pub fn saw_command(&self, prefix: &str) -> bool {
        self.log.lock().iter().any(|c| c.starts_with(prefix))
    }

    /// Tear the server down: stop accepting and sever every open connection
    #[allow(dead_code)]
    pub fn abort(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn serve(stream: TcpStream, store: Store, log: Arc<Mutex<Vec<String>>>, options: Arc<FakeOptions>) {
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    let mut line = String::new();

    loop {
        line.clear();
        match rd.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        log.lock().push(trimmed.clone());

        let mut parts = trimmed.split(' ');
        let verb = parts.next().unwrap_or("");
        let reply: Vec<u8> = match verb {
            "get" | "gets" => {
                let with_cas = verb == "gets";
                let keys: Vec<&str> = parts.collect();
                if keys.iter().any(|k| k.starts_with(DROP_PREFIX)) {
                    return; // simulate a mid-flight connection loss
                }
                let mut out = Vec::new();
                for key in keys {
                    let entry = store.lock().get(key).cloned();
                    if let Some((flags, data)) = entry {
                        let header = if with_cas {
                            format!("VALUE {} {} {} 1\r\n", key, flags, data.len())
                        } else {
                            format!("VALUE {} {} {}\r\n", key, flags, data.len())
                        };
                        out.extend_from_slice(header.as_bytes());
                        out.extend_from_slice(&data);
                        out.extend_from_slice(b"\r\n");
                    }
                }
                out.extend_from_slice(b"END\r\n");
                out
            }
            "set" | "add" | "replace" | "append" | "prepend" | "cas" => {
                let key = parts.next().unwrap_or("").to_string();
                let flags: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let _exptime = parts.next();
                let len: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let cas: Option<u64> = parts.next().and_then(|s| s.parse().ok());

                let mut data = vec![0u8; len + 2];
                if rd.read_exact(&mut data).await.is_err() {
                    return;
                }
                data.truncate(len);
                if key.starts_with(DROP_PREFIX) {
                    return;
                }

                let outcome = {
                    let mut store = store.lock();
                    match verb {
                        "set" => {
                            store.insert(key, (flags, data));
                            "STORED"
                        }
                        "add" => {
                            if store.contains_key(&key) {
                                "NOT_STORED"
                            } else {
                                store.insert(key, (flags, data));
                                "STORED"
                            }
                        }
                        "replace" => {
                            if store.contains_key(&key) {
                                store.insert(key, (flags, data));
                                "STORED"
                            } else {
                                "NOT_STORED"
                            }
                        }
                        "append" => match store.get_mut(&key) {
                            Some((_, existing)) => {
                                existing.extend_from_slice(&data);
                                "STORED"
                            }
                            None => "NOT_STORED",
                        },
                        "prepend" => match store.get_mut(&key) {
                            Some((_, existing)) => {
                                let mut joined = data;
                                joined.extend_from_slice(existing);
                                *existing = joined;
                                "STORED"
                            }
                            None => "NOT_STORED",
                        },
                        "cas" => {
                            // the fake always serves cas token 1
                            if !store.contains_key(&key) {
                                "NOT_FOUND"
                            } else if cas == Some(1) {
                                store.insert(key, (flags, data));
                                "STORED"
                            } else {
                                "EXISTS"
                            }
                        }
                        _ => unreachable!(),
                    }
                };
                format!("{}\r\n", outcome).into_bytes()
            }
            "delete" => {
                let key = parts.next().unwrap_or("");
                let existed = store.lock().remove(key).is_some();
                if existed {
                    b"DELETED\r\n".to_vec()
                } else {
                    b"NOT_FOUND\r\n".to_vec()
                }
            }
            "incr" | "decr" => {
                let key = parts.next().unwrap_or("").to_string();
                let delta: u64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                let mut store = store.lock();
                match store.get_mut(&key) {
                    Some((_, data)) => {
                        let current: u64 = std::str::from_utf8(data)
                            .ok()
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0);
                        let updated = if verb == "incr" {
                            current.wrapping_add(delta)
                        } else {
                            current.saturating_sub(delta)
                        };
                        *data = updated.to_string().into_bytes();
                        format!("{}\r\n", updated).into_bytes()
                    }
                    None => b"NOT_FOUND\r\n".to_vec(),
                }
            }
            "flush_all" => {
                store.lock().clear();
                b"OK\r\n".to_vec()
            }
            "stats" => {
                let mut out = Vec::new();
                for (name, value) in &options.stats {
                    out.extend_from_slice(format!("STAT {} {}\r\n", name, value).as_bytes());
                }
                out.extend_from_slice(b"END\r\n");
                out
            }
            "version" => format!("VERSION {}\r\n", options.version).into_bytes(),
            _ => b"ERROR\r\n".to_vec(),
        };

        if wr.write_all(&reply).await.is_err() {
            return;
        }
    }
}
