//! IST configuration.
//!
//! [`IstConfig`] holds the address parameters under the same names the rest
//! of the replicator uses for them, so it can be filled from a generic
//! key/value option string or deserialized from a config file section.
//! [`TransferConfig`] holds session timing and limits.

use std::time::Duration;

use serde::Deserialize;

use crate::IstError;

/// Explicit receive address, `[scheme://]host[:port]`.
pub const RECV_ADDR: &str = "ist.recv_addr";

/// Explicit bind address, `[scheme://]host[:port]`.
pub const RECV_BIND: &str = "ist.recv_bind";

/// Host this node is reachable on by the rest of the cluster.
pub const BASE_HOST: &str = "base_host";

/// Group communication port; IST defaults to the port after it.
pub const BASE_PORT: &str = "base_port";

/// TLS private key; its presence switches the default scheme to `ssl`.
pub const SSL_KEY: &str = "socket.ssl_key";

/// Address parameters consumed by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IstConfig {
    /// See [`RECV_ADDR`]
    #[serde(rename = "ist.recv_addr")]
    pub recv_addr: Option<String>,
    /// See [`RECV_BIND`]
    #[serde(rename = "ist.recv_bind")]
    pub recv_bind: Option<String>,
    /// See [`BASE_HOST`]
    pub base_host: Option<String>,
    /// See [`BASE_PORT`]
    pub base_port: Option<u16>,
    /// See [`SSL_KEY`]
    #[serde(rename = "socket.ssl_key")]
    pub ssl_key: Option<String>,
}

impl IstConfig {
    /// Set a parameter by name.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), IstError> {
        let value = value.into();
        match key {
            RECV_ADDR => self.recv_addr = Some(value),
            RECV_BIND => self.recv_bind = Some(value),
            BASE_HOST => self.base_host = Some(value),
            BASE_PORT => {
                let port = value.trim().parse::<u16>().map_err(|e| {
                    IstError::InvalidConfiguration(format!("{BASE_PORT} '{value}': {e}"))
                })?;
                self.base_port = Some(port);
            },
            SSL_KEY => self.ssl_key = Some(value),
            _ => return Err(IstError::InvalidConfiguration(format!("unknown parameter '{key}'"))),
        }
        Ok(())
    }

    /// Read a parameter by name. `Ok(None)` means known but unset.
    pub fn get(&self, key: &str) -> Result<Option<String>, IstError> {
        let value = match key {
            RECV_ADDR => self.recv_addr.clone(),
            RECV_BIND => self.recv_bind.clone(),
            BASE_HOST => self.base_host.clone(),
            BASE_PORT => self.base_port.map(|p| p.to_string()),
            SSL_KEY => self.ssl_key.clone(),
            _ => return Err(IstError::InvalidConfiguration(format!("unknown parameter '{key}'"))),
        };
        Ok(value)
    }

    /// Whether a TLS key is configured.
    pub fn tls_key_present(&self) -> bool {
        non_empty(self.ssl_key.as_deref()).is_some()
    }
}

/// Treat blank values like unset ones.
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Session timing and limits.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Time allowed for connect plus handshake on either side
    pub handshake_timeout: Duration,
    /// Time the sender waits, after the handshake, for the receiver's
    /// owner to call `ready`. The cache range stays locked meanwhile.
    pub ready_timeout: Duration,
    /// Time the sender waits for the receiver to close after EOF
    pub drain_timeout: Duration,
    /// Largest payload accepted from the peer
    pub max_payload_size: u64,
    /// Entries fetched from the cache per batch
    pub fetch_batch: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            ready_timeout: Duration::from_secs(60 * 60),
            drain_timeout: Duration::from_secs(10),
            max_payload_size: 1 << 30,
            fetch_batch: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_by_name() {
        let mut config = IstConfig::default();
        config.set(RECV_ADDR, "tcp://10.0.0.1").unwrap();
        config.set(BASE_PORT, "4567").unwrap();

        assert_eq!(config.get(RECV_ADDR).unwrap().as_deref(), Some("tcp://10.0.0.1"));
        assert_eq!(config.get(BASE_PORT).unwrap().as_deref(), Some("4567"));
        assert_eq!(config.get(RECV_BIND).unwrap(), None);
    }

    #[test]
    fn unknown_key_is_invalid() {
        let mut config = IstConfig::default();
        assert!(matches!(config.set("ist.bogus", "x"), Err(IstError::InvalidConfiguration(_))));
        assert!(matches!(config.get("ist.bogus"), Err(IstError::InvalidConfiguration(_))));
    }

    #[test]
    fn bad_port_is_invalid() {
        let mut config = IstConfig::default();
        assert!(matches!(config.set(BASE_PORT, "70000"), Err(IstError::InvalidConfiguration(_))));
    }

    #[test]
    fn blank_ssl_key_does_not_count() {
        let mut config = IstConfig::default();
        assert!(!config.tls_key_present());
        config.set(SSL_KEY, "  ").unwrap();
        assert!(!config.tls_key_present());
        config.set(SSL_KEY, "/etc/mysql/key.pem").unwrap();
        assert!(config.tls_key_present());
    }
}
