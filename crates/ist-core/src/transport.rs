//! Transport abstraction for IST connections.
//!
//! A session needs one bidirectional byte stream. Production uses tokio TCP,
//! tests use Turmoil (simulated TCP) through the same trait.

use std::io;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

use crate::address::IstAddress;

/// Opens and accepts IST connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Bidirectional byte stream of one connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Listener returned by [`Self::bind`].
    type Listener: TransportListener<Stream = Self::Stream>;

    /// Start listening on `addr`. Port 0 asks for an ephemeral port.
    async fn bind(&self, addr: &IstAddress) -> io::Result<Self::Listener>;

    /// Connect to a listening receiver.
    async fn connect(&self, addr: &IstAddress) -> io::Result<Self::Stream>;
}

/// A bound listener.
#[async_trait]
pub trait TransportListener: Send + Sync + 'static {
    /// Stream type of accepted connections.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection. Returns the stream and a peer
    /// description for logging.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// Port the listener is bound to.
    fn local_port(&self) -> io::Result<u16>;
}

/// Plain TCP transport. `ssl` addresses are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// Listener of [`TcpTransport`].
#[derive(Debug)]
pub struct TcpTransportListener {
    inner: TcpListener,
}

fn plain_only(addr: &IstAddress) -> io::Result<()> {
    if addr.scheme.is_secure() {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{addr}: TLS transport not available"),
        ));
    }
    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;
    type Listener = TcpTransportListener;

    async fn bind(&self, addr: &IstAddress) -> io::Result<TcpTransportListener> {
        plain_only(addr)?;
        let inner = TcpListener::bind(addr.authority()).await?;
        Ok(TcpTransportListener { inner })
    }

    async fn connect(&self, addr: &IstAddress) -> io::Result<TcpStream> {
        plain_only(addr)?;
        let stream = TcpStream::connect(addr.authority()).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl TransportListener for TcpTransportListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer.to_string()))
    }

    fn local_port(&self) -> io::Result<u16> {
        self.inner.local_addr().map(|addr| addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Scheme;

    #[tokio::test]
    async fn ssl_is_refused() {
        let addr = IstAddress::new(Scheme::Ssl, "127.0.0.1", 0);
        let err = TcpTransport.bind(&addr).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        let err = TcpTransport.connect(&addr).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn ephemeral_port_is_reported() {
        let listener =
            TcpTransport.bind(&IstAddress::new(Scheme::Tcp, "127.0.0.1", 0)).await.unwrap();
        assert_ne!(listener.local_port().unwrap(), 0);
    }
}
