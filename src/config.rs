//! Client configuration and server endpoint parsing

use crate::error::{MemshardError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default memcached port, applied to bare hostnames
pub const DEFAULT_PORT: u16 = 11211;

/// An immutable (host, port) pair identifying one configured cache server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from an explicit host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a server specification: either a bare hostname (default port
    /// applied) or an explicit `host:port` pair.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(MemshardError::InvalidEndpoint(spec.to_string()));
        }
        match spec.rsplit_once(':') {
            None => Ok(Self::new(spec, DEFAULT_PORT)),
            Some((host, port)) => {
                if host.is_empty() || host.contains(':') {
                    return Err(MemshardError::InvalidEndpoint(spec.to_string()));
                }
                let port = port
                    .parse::<u16>()
                    .map_err(|_| MemshardError::InvalidEndpoint(spec.to_string()))?;
                Ok(Self::new(host, port))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = MemshardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<(&str, u16)> for Endpoint {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<(String, u16)> for Endpoint {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}

/// Sharded client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Ordered server specifications, each either `host` or `host:port`.
    /// Order is significant: it fixes slot order for fan-out results.
    pub servers: Vec<String>,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// First reconnect delay after a failed attempt or lost connection
    pub reconnect_initial_delay_ms: u64,

    /// Upper bound on the reconnect delay
    pub reconnect_max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt
    pub reconnect_backoff_factor: f64,

    /// When set, slots are created but connection attempts do not start
    /// until `ShardedClient::start` is called
    pub defer_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            connect_timeout_ms: 5_000,
            reconnect_initial_delay_ms: 100,
            reconnect_max_delay_ms: 30_000,
            reconnect_backoff_factor: 1.6,
            defer_connect: false,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given server specifications
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set the TCP connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the initial reconnect delay
    pub fn with_reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the maximum reconnect delay
    pub fn with_reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Defer connection attempts until `start` is called explicitly
    pub fn deferred(mut self) -> Self {
        self.defer_connect = true;
        self
    }

    /// Parse every server specification, in caller order.
    /// Fails on the first malformed entry.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>> {
        self.servers.iter().map(|s| Endpoint::parse(s)).collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.endpoints()?;
        if self.reconnect_backoff_factor < 1.0 {
            return Err(MemshardError::InvalidConfig(format!(
                "backoff factor must be >= 1.0, got {}",
                self.reconnect_backoff_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_host() {
        let ep = Endpoint::parse("cache01.internal").unwrap();
        assert_eq!(ep.host, "cache01.internal");
        assert_eq!(ep.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_host_port() {
        let ep = Endpoint::parse("10.0.0.2:11322").unwrap();
        assert_eq!(ep.host, "10.0.0.2");
        assert_eq!(ep.port, 11322);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Endpoint::parse("").is_err());
        assert!(Endpoint::parse("host:notaport").is_err());
        assert!(Endpoint::parse(":11211").is_err());
        assert!(Endpoint::parse("a:b:11211").is_err());
        assert!(Endpoint::parse("host:99999").is_err());
    }

    #[test]
    fn test_display_is_identity_key() {
        let ep = Endpoint::new("one", 123);
        assert_eq!(ep.to_string(), "one:123");
    }

    #[test]
    fn test_config_endpoints_order_preserved() {
        let config = ClientConfig::new(["b:1", "a:2", "c"]);
        let eps = config.endpoints().unwrap();
        assert_eq!(eps[0], Endpoint::new("b", 1));
        assert_eq!(eps[1], Endpoint::new("a", 2));
        assert_eq!(eps[2], Endpoint::new("c", DEFAULT_PORT));
    }

    #[test]
    fn test_config_fails_on_first_bad_entry() {
        let config = ClientConfig::new(["ok:1", "bad:port"]);
        assert!(matches!(
            config.endpoints(),
            Err(MemshardError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new(["localhost"])
            .with_connect_timeout(Duration::from_secs(1))
            .with_reconnect_initial_delay(Duration::from_millis(50))
            .deferred();
        assert_eq!(config.connect_timeout_ms, 1_000);
        assert_eq!(config.reconnect_initial_delay_ms, 50);
        assert!(config.defer_connect);
        assert!(config.validate().is_ok());
    }
}
