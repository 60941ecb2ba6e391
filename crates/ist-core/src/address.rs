//! Receive and bind address resolution.
//!
//! Addresses have the form `[scheme://]host[:port]` where scheme is `tcp` or
//! `ssl`. A scheme or port written in the configured value always wins;
//! otherwise the scheme is inferred from TLS configuration and the port
//! defaults to `base_port + 1`, or [`DEFAULT_PORT`] when no base port is set.

use std::{fmt, str::FromStr};

use ist_proto::DEFAULT_PORT;

use crate::{
    IstError,
    config::{IstConfig, RECV_ADDR, RECV_BIND, non_empty},
};

/// Transport scheme of an IST address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP
    Tcp,
    /// TLS over TCP
    Ssl,
}

impl Scheme {
    /// Scheme as written in an address.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ssl => "ssl",
        }
    }

    /// Whether the transport must be encrypted.
    pub fn is_secure(self) -> bool {
        self == Self::Ssl
    }

    fn inferred(secure: bool) -> Self {
        if secure { Self::Ssl } else { Self::Tcp }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = IstError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "ssl" => Ok(Self::Ssl),
            other => Err(IstError::InvalidConfiguration(format!("unknown scheme '{other}'"))),
        }
    }
}

/// Fully resolved IST endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IstAddress {
    /// Transport scheme
    pub scheme: Scheme,
    /// Host name or IP literal, without IPv6 brackets
    pub host: String,
    /// TCP port; 0 asks the listener for an ephemeral port
    pub port: u16,
}

impl IstAddress {
    /// Create an address.
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self { scheme, host: host.into(), port }
    }

    /// Same address with another port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port` form accepted by socket APIs.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for IstAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

impl FromStr for IstAddress {
    type Err = IstError;

    /// Parse with plain-TCP and default-port fallbacks.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let partial = PartialAddress::parse(s)?;
        Ok(Self {
            scheme: partial.scheme.unwrap_or(Scheme::Tcp),
            host: partial.host,
            port: partial.port.unwrap_or(DEFAULT_PORT),
        })
    }
}

/// An address as written in configuration, before defaults apply.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PartialAddress {
    scheme: Option<Scheme>,
    host: String,
    port: Option<u16>,
}

impl PartialAddress {
    fn parse(raw: &str) -> Result<Self, IstError> {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.parse::<Scheme>()?), rest),
            None => (None, raw),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(|| {
                IstError::InvalidConfiguration(format!("unterminated IPv6 literal in '{raw}'"))
            })?;
            match after {
                "" => (host, None),
                _ => {
                    let port = after.strip_prefix(':').ok_or_else(|| {
                        IstError::InvalidConfiguration(format!("malformed address '{raw}'"))
                    })?;
                    (host, Some(port))
                },
            }
        } else if rest.matches(':').count() == 1 {
            let (host, port) = rest.split_once(':').unwrap_or((rest, ""));
            (host, Some(port))
        } else {
            // Bare host, or an IPv6 literal without brackets (and thus no port).
            (rest, None)
        };

        if host.is_empty() {
            return Err(IstError::InvalidConfiguration(format!("missing host in '{raw}'")));
        }

        let port = port
            .map(|p| {
                p.parse::<u16>().map_err(|e| {
                    IstError::InvalidConfiguration(format!("bad port '{p}' in '{raw}': {e}"))
                })
            })
            .transpose()?;

        Ok(Self { scheme, host: host.to_string(), port })
    }
}

fn default_port(config: &IstConfig) -> Result<u16, IstError> {
    match config.base_port {
        Some(base) => base.checked_add(1).ok_or_else(|| {
            IstError::InvalidConfiguration(format!("base_port {base} leaves no room for IST"))
        }),
        None => Ok(DEFAULT_PORT),
    }
}

/// Resolve the address the receiver advertises to donors.
///
/// Uses `ist.recv_addr` when set, else `base_host`. Fails with
/// [`IstError::InvalidConfiguration`] when neither is configured.
pub fn determine_receive_address(
    config: &IstConfig,
    use_ssl_default: bool,
) -> Result<IstAddress, IstError> {
    let raw = non_empty(config.recv_addr.as_deref())
        .or_else(|| non_empty(config.base_host.as_deref()))
        .ok_or_else(|| {
            IstError::InvalidConfiguration(format!(
                "could not determine IST receive address: '{RECV_ADDR}' not set"
            ))
        })?;

    let partial = PartialAddress::parse(raw)?;
    let secure = use_ssl_default || config.tls_key_present();
    let port = match partial.port {
        Some(port) => port,
        None => default_port(config)?,
    };

    let scheme = partial.scheme.unwrap_or(Scheme::inferred(secure));
    Ok(IstAddress { scheme, host: partial.host, port })
}

/// Resolve the address the receiver binds its listener to.
///
/// Returns [`IstError::AddressNotSet`] when `ist.recv_bind` is absent, in
/// which case callers bind to the receive address. A missing port falls back
/// to the receive address's port.
pub fn determine_bind_address(
    config: &IstConfig,
    use_ssl_default: bool,
) -> Result<IstAddress, IstError> {
    let raw = non_empty(config.recv_bind.as_deref()).ok_or(IstError::AddressNotSet(RECV_BIND))?;
    let partial = PartialAddress::parse(raw)?;
    let secure = use_ssl_default || config.tls_key_present();

    let port = match partial.port {
        Some(port) => port,
        None => match determine_receive_address(config, use_ssl_default) {
            Ok(recv) => recv.port,
            Err(_) => default_port(config)?,
        },
    };

    let scheme = partial.scheme.unwrap_or(Scheme::inferred(secure));
    Ok(IstAddress { scheme, host: partial.host, port })
}

/// Host the node is known by: `base_host`, or the receive address host when
/// only `ist.recv_addr` is configured.
pub fn effective_base_host(config: &IstConfig) -> Option<String> {
    if let Some(host) = non_empty(config.base_host.as_deref()) {
        return Some(host.to_string());
    }
    let raw = non_empty(config.recv_addr.as_deref())?;
    PartialAddress::parse(raw).ok().map(|p| p.host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BASE_HOST, BASE_PORT, SSL_KEY};

    fn config(pairs: &[(&str, &str)]) -> IstConfig {
        let mut config = IstConfig::default();
        for (key, value) in pairs {
            config.set(key, *value).unwrap();
        }
        config
    }

    fn recv(pairs: &[(&str, &str)]) -> String {
        determine_receive_address(&config(pairs), false).unwrap().to_string()
    }

    #[test]
    fn nothing_configured_is_invalid_configuration() {
        let err = determine_receive_address(&IstConfig::default(), false).unwrap_err();
        assert!(matches!(err, IstError::InvalidConfiguration(_)));
    }

    #[test]
    fn base_host_gets_default_port() {
        assert_eq!(recv(&[(BASE_HOST, "127.0.0.1")]), "tcp://127.0.0.1:4568");
    }

    #[test]
    fn bare_ip() {
        assert_eq!(recv(&[(RECV_ADDR, "127.0.0.1")]), "tcp://127.0.0.1:4568");
    }

    #[test]
    fn ip_and_port() {
        assert_eq!(recv(&[(RECV_ADDR, "127.0.0.1:10001")]), "tcp://127.0.0.1:10001");
    }

    #[test]
    fn scheme_and_ip() {
        assert_eq!(recv(&[(RECV_ADDR, "tcp://127.0.0.1")]), "tcp://127.0.0.1:4568");
    }

    #[test]
    fn scheme_ip_and_port() {
        assert_eq!(recv(&[(RECV_ADDR, "tcp://127.0.0.1:10002")]), "tcp://127.0.0.1:10002");
    }

    #[test]
    fn ssl_key_infers_secure_scheme() {
        assert_eq!(
            recv(&[(SSL_KEY, "key"), (RECV_ADDR, "127.0.0.1")]),
            "ssl://127.0.0.1:4568"
        );
    }

    #[test]
    fn explicit_scheme_beats_inference() {
        assert_eq!(
            recv(&[(SSL_KEY, "key"), (RECV_ADDR, "tcp://127.0.0.1")]),
            "tcp://127.0.0.1:4568"
        );
        assert_eq!(recv(&[(RECV_ADDR, "ssl://127.0.0.1")]), "ssl://127.0.0.1:4568");
    }

    #[test]
    fn ssl_default_flag_infers_secure_scheme() {
        let addr = determine_receive_address(&config(&[(RECV_ADDR, "db1")]), true).unwrap();
        assert_eq!(addr.to_string(), "ssl://db1:4568");
    }

    #[test]
    fn base_port_shifts_default() {
        assert_eq!(
            recv(&[(BASE_HOST, "10.0.0.5"), (BASE_PORT, "5000")]),
            "tcp://10.0.0.5:5001"
        );
        assert_eq!(
            recv(&[(RECV_ADDR, "10.0.0.5:7000"), (BASE_PORT, "5000")]),
            "tcp://10.0.0.5:7000"
        );
    }

    #[test]
    fn recv_addr_wins_over_base_host() {
        assert_eq!(
            recv(&[(BASE_HOST, "10.0.0.1"), (RECV_ADDR, "10.0.0.2")]),
            "tcp://10.0.0.2:4568"
        );
    }

    #[test]
    fn ipv6_literals() {
        assert_eq!(recv(&[(RECV_ADDR, "[::1]:9000")]), "tcp://[::1]:9000");
        assert_eq!(recv(&[(RECV_ADDR, "ssl://[fe80::1]")]), "ssl://[fe80::1]:4568");
        assert_eq!(recv(&[(RECV_ADDR, "::1")]), "tcp://[::1]:4568");
    }

    #[test]
    fn malformed_values_are_invalid_configuration() {
        for bad in ["udp://127.0.0.1", "tcp://", "127.0.0.1:notaport", "[::1", ":4568"] {
            let err = determine_receive_address(&config(&[(RECV_ADDR, bad)]), false).unwrap_err();
            assert!(matches!(err, IstError::InvalidConfiguration(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn bind_not_set_is_distinct() {
        let err =
            determine_bind_address(&config(&[(RECV_ADDR, "127.0.0.1")]), false).unwrap_err();
        assert!(matches!(err, IstError::AddressNotSet(RECV_BIND)));
    }

    #[test]
    fn bind_inherits_receive_port() {
        let cfg = config(&[(RECV_ADDR, "192.168.1.10:4444"), (RECV_BIND, "0.0.0.0")]);
        assert_eq!(determine_bind_address(&cfg, false).unwrap().to_string(), "tcp://0.0.0.0:4444");

        let cfg = config(&[(RECV_BIND, "0.0.0.0:5555")]);
        assert_eq!(determine_bind_address(&cfg, false).unwrap().to_string(), "tcp://0.0.0.0:5555");
    }

    #[test]
    fn effective_base_host_falls_back_to_recv_addr() {
        let recv_only = config(&[(RECV_ADDR, "ssl://db2:4000")]);
        assert_eq!(effective_base_host(&recv_only).as_deref(), Some("db2"));
        assert_eq!(
            effective_base_host(&config(&[(BASE_HOST, "db1"), (RECV_ADDR, "db2")])).as_deref(),
            Some("db1")
        );
        assert_eq!(effective_base_host(&IstConfig::default()), None);
    }

    #[test]
    fn address_from_str_applies_defaults() {
        let addr: IstAddress = "peer".parse().unwrap();
        assert_eq!(addr, IstAddress::new(Scheme::Tcp, "peer", DEFAULT_PORT));
        assert_eq!(addr.with_port(0).authority(), "peer:0");
    }
}
