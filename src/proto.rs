//! Memcached ASCII protocol - command framing and response parsing
//!
//! Commands are textual lines; storage payloads are length-prefixed byte
//! blocks. Builders here produce byte-exact command frames; the parser
//! consumes exactly one response per expectation so a connection's
//! request/response stream stays aligned under pipelining.

use crate::error::{MemshardError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Maximum key length accepted by memcached
pub const MAX_KEY_LENGTH: usize = 250;

/// Storage command verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

impl StoreVerb {
    fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Append => "append",
            Self::Prepend => "prepend",
        }
    }
}

/// Outcome of a storage command. "Not stored" and friends are part of the
/// normal result shape, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreResult {
    /// Value was stored
    Stored,
    /// Storage condition not met (`add` on existing key, `replace`/`append`/`prepend` on missing key)
    NotStored,
    /// `cas` lost the race: the value was modified since it was fetched
    Exists,
    /// `cas` or storage target does not exist
    NotFound,
}

/// A value fetched from a server: opaque client flags, the optional cas
/// token (populated by `gets`-style retrievals) and the raw data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub flags: u32,
    pub cas: Option<u64>,
    pub data: Bytes,
}

/// Which response framing to expect for an issued command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseShape {
    Store,
    Delete,
    Counter,
    Values,
    Stats,
    Version,
    Flush,
}

/// One parsed response
#[derive(Debug)]
pub(crate) enum Response {
    Store(StoreResult),
    Deleted(bool),
    Counter(Option<u64>),
    Values(Vec<(String, CachedValue)>),
    Stats(HashMap<String, String>),
    Version(String),
    Flushed,
}

/// Reject keys memcached cannot carry: empty, oversized, or containing
/// whitespace/control bytes that would break line framing.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(MemshardError::Client("empty key".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(MemshardError::Client(format!(
            "key exceeds {} bytes: {}",
            MAX_KEY_LENGTH,
            key.len()
        )));
    }
    if key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(MemshardError::Client(format!(
            "key contains whitespace or control bytes: {:?}",
            key
        )));
    }
    Ok(())
}

pub(crate) fn store_command(
    verb: StoreVerb,
    key: &str,
    flags: u32,
    exptime: u32,
    data: &[u8],
) -> Vec<u8> {
    let header = format!("{} {} {} {} {}\r\n", verb.as_str(), key, flags, exptime, data.len());
    frame(header, data)
}

pub(crate) fn cas_command(key: &str, flags: u32, exptime: u32, cas: u64, data: &[u8]) -> Vec<u8> {
    let header = format!("cas {} {} {} {} {}\r\n", key, flags, exptime, data.len(), cas);
    frame(header, data)
}

fn frame(header: String, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header.len() + data.len() + 2);
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    buf
}

pub(crate) fn retrieval_command(keys: &[&str], with_cas: bool) -> Vec<u8> {
    let verb = if with_cas { "gets" } else { "get" };
    let mut line = String::with_capacity(verb.len() + keys.iter().map(|k| k.len() + 1).sum::<usize>() + 2);
    line.push_str(verb);
    for key in keys {
        line.push(' ');
        line.push_str(key);
    }
    line.push_str("\r\n");
    line.into_bytes()
}

pub(crate) fn delete_command(key: &str) -> Vec<u8> {
    format!("delete {}\r\n", key).into_bytes()
}

pub(crate) fn counter_command(increment: bool, key: &str, delta: u64) -> Vec<u8> {
    let verb = if increment { "incr" } else { "decr" };
    format!("{} {} {}\r\n", verb, key, delta).into_bytes()
}

pub(crate) fn stats_command(arg: Option<&str>) -> Vec<u8> {
    match arg {
        Some(arg) => format!("stats {}\r\n", arg).into_bytes(),
        None => b"stats\r\n".to_vec(),
    }
}

pub(crate) fn version_command() -> Vec<u8> {
    b"version\r\n".to_vec()
}

pub(crate) fn flush_command() -> Vec<u8> {
    b"flush_all\r\n".to_vec()
}

/// Read one `\r\n`-terminated line. EOF before any byte means the peer
/// closed the connection.
async fn read_line<R: AsyncBufRead + Unpin>(rd: &mut R) -> Result<String> {
    let mut buf = Vec::new();
    let n = rd.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(MemshardError::ConnectionClosed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map_err(|_| MemshardError::Protocol("response line is not valid UTF-8".to_string()))
}

/// Map protocol-level error lines onto the error taxonomy
fn control_error(line: &str) -> Option<MemshardError> {
    if line == "ERROR" {
        return Some(MemshardError::Protocol(
            "server did not recognize the command".to_string(),
        ));
    }
    if let Some(msg) = line.strip_prefix("CLIENT_ERROR") {
        return Some(MemshardError::Client(msg.trim_start().to_string()));
    }
    if let Some(msg) = line.strip_prefix("SERVER_ERROR") {
        return Some(MemshardError::Server(msg.trim_start().to_string()));
    }
    None
}

fn unexpected(line: &str) -> MemshardError {
    MemshardError::Protocol(format!("unexpected response line: {:?}", line))
}

/// Parse exactly one response of the given shape
pub(crate) async fn read_response<R: AsyncBufRead + Unpin>(
    rd: &mut R,
    shape: ResponseShape,
) -> Result<Response> {
    match shape {
        ResponseShape::Store => {
            let line = read_line(rd).await?;
            if let Some(err) = control_error(&line) {
                return Err(err);
            }
            let result = match line.as_str() {
                "STORED" => StoreResult::Stored,
                "NOT_STORED" => StoreResult::NotStored,
                "EXISTS" => StoreResult::Exists,
                "NOT_FOUND" => StoreResult::NotFound,
                _ => return Err(unexpected(&line)),
            };
            Ok(Response::Store(result))
        }
        ResponseShape::Delete => {
            let line = read_line(rd).await?;
            if let Some(err) = control_error(&line) {
                return Err(err);
            }
            match line.as_str() {
                "DELETED" => Ok(Response::Deleted(true)),
                "NOT_FOUND" => Ok(Response::Deleted(false)),
                _ => Err(unexpected(&line)),
            }
        }
        ResponseShape::Counter => {
            let line = read_line(rd).await?;
            if let Some(err) = control_error(&line) {
                return Err(err);
            }
            if line == "NOT_FOUND" {
                return Ok(Response::Counter(None));
            }
            let value = line
                .parse::<u64>()
                .map_err(|_| unexpected(&line))?;
            Ok(Response::Counter(Some(value)))
        }
        ResponseShape::Values => {
            let mut values = Vec::new();
            loop {
                let line = read_line(rd).await?;
                if let Some(err) = control_error(&line) {
                    return Err(err);
                }
                if line == "END" {
                    return Ok(Response::Values(values));
                }
                let (key, value) = read_value_block(rd, &line).await?;
                values.push((key, value));
            }
        }
        ResponseShape::Stats => {
            let mut stats = HashMap::new();
            loop {
                let line = read_line(rd).await?;
                if let Some(err) = control_error(&line) {
                    return Err(err);
                }
                if line == "END" {
                    return Ok(Response::Stats(stats));
                }
                let body = line.strip_prefix("STAT ").ok_or_else(|| unexpected(&line))?;
                let (name, value) = body
                    .split_once(' ')
                    .map(|(n, v)| (n.to_string(), v.to_string()))
                    .unwrap_or_else(|| (body.to_string(), String::new()));
                stats.insert(name, value);
            }
        }
        ResponseShape::Version => {
            let line = read_line(rd).await?;
            if let Some(err) = control_error(&line) {
                return Err(err);
            }
            let version = line.strip_prefix("VERSION ").ok_or_else(|| unexpected(&line))?;
            Ok(Response::Version(version.to_string()))
        }
        ResponseShape::Flush => {
            let line = read_line(rd).await?;
            if let Some(err) = control_error(&line) {
                return Err(err);
            }
            match line.as_str() {
                "OK" => Ok(Response::Flushed),
                _ => Err(unexpected(&line)),
            }
        }
    }
}

/// Parse a `VALUE <key> <flags> <bytes> [<cas>]` header line and consume the
/// data block plus its trailing `\r\n`.
async fn read_value_block<R: AsyncBufRead + Unpin>(
    rd: &mut R,
    header: &str,
) -> Result<(String, CachedValue)> {
    let body = header.strip_prefix("VALUE ").ok_or_else(|| unexpected(header))?;
    let mut parts = body.split(' ');
    let key = parts.next().ok_or_else(|| unexpected(header))?.to_string();
    let flags = parts
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| unexpected(header))?;
    let len = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| unexpected(header))?;
    let cas = match parts.next() {
        Some(s) => Some(s.parse::<u64>().map_err(|_| unexpected(header))?),
        None => None,
    };

    let mut data = vec![0u8; len];
    rd.read_exact(&mut data).await?;
    let mut crlf = [0u8; 2];
    rd.read_exact(&mut crlf).await?;
    if &crlf != b"\r\n" {
        return Err(MemshardError::Protocol(
            "value block not terminated by CRLF".to_string(),
        ));
    }

    Ok((
        key,
        CachedValue {
            flags,
            cas,
            data: Bytes::from(data),
        },
    ))
}
