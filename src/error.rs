//! Error types for the memshard client

use thiserror::Error;

/// Result type alias for memshard operations
pub type Result<T> = std::result::Result<T, MemshardError>;

/// Top-level error type for memshard operations
#[derive(Error, Debug)]
pub enum MemshardError {
    /// Routing was attempted while no server connection is active
    #[error("no connected servers available")]
    NoServerAvailable,

    /// A server specification was neither a hostname nor a host:port pair
    #[error("invalid server endpoint: {0}")]
    InvalidEndpoint(String),

    /// Configuration rejected before any connection attempt
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Encoding or decoding a packed value failed
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The connection carrying this operation closed before a response arrived
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer sent something that is not valid protocol framing
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported `SERVER_ERROR`
    #[error("server error: {0}")]
    Server(String),

    /// The server reported `CLIENT_ERROR` (malformed request)
    #[error("client error: {0}")]
    Client(String),

    /// Transport-level I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemshardError {
    /// Whether this error leaves the connection's request/response stream
    /// unusable. Fatal errors tear the connection down; non-fatal ones are
    /// per-request outcomes on a still-consistent stream.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::Protocol(_) | Self::Io(_)
        )
    }
}

/// Errors from the value codec (serialize + compress layer)
#[derive(Error, Debug)]
pub enum CodecError {
    /// Value could not be serialized to MessagePack
    #[error("serialization failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    /// Bytes did not deserialize to the requested type
    #[error("deserialization failed: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    /// Compression pass failed
    #[error("compression failed: {0}")]
    Compress(std::io::Error),

    /// Decompression pass failed (wrong flag or corrupt input)
    #[error("decompression failed: {0}")]
    Decompress(std::io::Error),
}
