//! Simulated TCP transport for IST tests.
//!
//! Wraps `turmoil::net` so sender and receiver sessions run unchanged over
//! a deterministic network with controllable latency and partitions. Host
//! names in addresses are turmoil host names.

use std::io;

use async_trait::async_trait;
use ist_core::{IstAddress, Transport, TransportListener};
use tracing::debug;
use turmoil::net::{TcpListener, TcpStream};

/// [`Transport`] over the turmoil network.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimTransport;

/// Listener of [`SimTransport`].
pub struct SimListener {
    inner: TcpListener,
}

impl std::fmt::Debug for SimListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimListener").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Stream = TcpStream;
    type Listener = SimListener;

    async fn bind(&self, addr: &IstAddress) -> io::Result<SimListener> {
        let authority = addr.authority();
        let inner = TcpListener::bind(authority.as_str()).await?;
        Ok(SimListener { inner })
    }

    async fn connect(&self, addr: &IstAddress) -> io::Result<TcpStream> {
        let authority = addr.authority();
        TcpStream::connect(authority.as_str()).await
    }
}

#[async_trait]
impl TransportListener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = self.inner.accept().await?;
        debug!(%peer, "simulated connection accepted");
        Ok((stream, peer.to_string()))
    }

    fn local_port(&self) -> io::Result<u16> {
        self.inner.local_addr().map(|addr| addr.port())
    }
}
