//! TCP and TLS client transport.
//!
//! The session layer opens connections through a [`Transport`] capability so
//! that tests can point it at a local mock server and deployments can swap
//! plain TCP for TLS.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Unified stream type that can be either plain TCP or TLS
pub enum IoStream {
    /// Plain TCP stream
    Plain(TcpStream),
    /// TLS client stream
    #[cfg(feature = "tls")]
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl AsyncRead for IoStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            IoStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for IoStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            IoStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            IoStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        match self.get_mut() {
            IoStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            IoStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

impl IoStream {
    /// Get the peer address of the underlying stream
    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            IoStream::Plain(stream) => stream.peer_addr(),
            #[cfg(feature = "tls")]
            IoStream::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }
}

/// Capability to open a byte stream to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a fresh connection. Called once at session start and once per
    /// resumption attempt.
    async fn connect(&self) -> std::io::Result<IoStream>;
}

/// Plain TCP transport.
pub struct TcpTransport {
    addr: SocketAddr,
}

impl TcpTransport {
    /// Transport connecting to the given address.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> std::io::Result<IoStream> {
        let stream = TcpStream::connect(self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(IoStream::Plain(stream))
    }
}

// TLS-specific functionality
#[cfg(feature = "tls")]
/// TLS client transport for encrypted sessions.
pub mod tls {
    use super::*;
    use anyhow::{Context as AnyhowContext, Result};
    use rustls::pki_types::{CertificateDer, ServerName};
    use rustls::{ClientConfig, RootCertStore};
    use std::sync::Arc;
    use tokio_rustls::TlsConnector;
    use tracing::debug;

    /// Create a TLS client configuration trusting the given CA bundle.
    pub fn make_client_config(ca_pem: &str) -> Result<ClientConfig> {
        // Install default crypto provider if not already set
        let _ = rustls::crypto::ring::default_provider().install_default();

        let mut roots = RootCertStore::empty();
        let ca_results: Result<Vec<_>, _> = rustls_pemfile::certs(&mut ca_pem.as_bytes()).collect();
        let ca_certs = ca_results.context("Failed to parse CA certificates")?;

        if ca_certs.is_empty() {
            anyhow::bail!("No CA certificates found");
        }

        for ca_cert in ca_certs {
            roots
                .add(CertificateDer::from(ca_cert))
                .context("Failed to add CA certificate to root store")?;
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(config)
    }

    /// TLS transport over TCP.
    pub struct TlsTransport {
        addr: SocketAddr,
        sni: String,
        connector: TlsConnector,
    }

    impl TlsTransport {
        /// Transport connecting to `addr` and validating the server
        /// certificate against `sni`.
        pub fn new(addr: SocketAddr, sni: impl Into<String>, config: ClientConfig) -> Self {
            Self {
                addr,
                sni: sni.into(),
                connector: TlsConnector::from(Arc::new(config)),
            }
        }
    }

    #[async_trait]
    impl Transport for TlsTransport {
        async fn connect(&self) -> std::io::Result<IoStream> {
            let tcp = TcpStream::connect(self.addr).await?;
            tcp.set_nodelay(true)?;

            let server_name = ServerName::try_from(self.sni.clone())
                .map_err(|_| std::io::Error::other(format!("invalid server name: {}", self.sni)))?;

            debug!("Connecting via TLS to {} (SNI: {})", self.addr, self.sni);
            let tls_stream = self.connector.connect(server_name, tcp).await?;
            Ok(IoStream::Tls(tls_stream))
        }
    }
}
