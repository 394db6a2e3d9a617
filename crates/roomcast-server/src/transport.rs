//! Quinn-based QUIC transport.
//!
//! Each connection carries exactly two long-lived unidirectional streams: the
//! client opens one for everything it sends, the server opens one for
//! everything it delivers. A single stream per direction is what gives
//! per-connection ordering; QUIC preserves order within a stream only.
//!
//! TLS is supplied either from PEM files or from a freshly generated
//! self-signed certificate. ALPN is pinned to [`ALPN_PROTOCOL`].

use std::{net::SocketAddr, sync::Arc};

use quinn::{Endpoint, RecvStream, SendStream, ServerConfig};
use roomcast_proto::ALPN_PROTOCOL;

use crate::error::ServerError;

/// QUIC endpoint accepting roomcast connections.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a new QUIC transport.
    ///
    /// If `cert_path` and `key_path` are both provided they are used for TLS.
    /// Otherwise a self-signed certificate is generated.
    pub fn bind(
        address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => generate_self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!(%addr, "QUIC transport bound");

        Ok(Self { endpoint })
    }

    /// Wait for the next connection to finish its QUIC handshake.
    ///
    /// `None` once the endpoint is closed. A failed handshake is an error and
    /// leaves the endpoint usable.
    pub async fn accept(&self) -> Option<Result<QuinnConnection, ServerError>> {
        let incoming = self.endpoint.accept().await?;

        Some(
            incoming
                .await
                .map(|connection| QuinnConnection { connection })
                .map_err(|e| ServerError::Transport(format!("handshake failed: {e}"))),
        )
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// An established QUIC connection.
///
/// Clones share the underlying connection.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Wait for the client's frame stream.
    pub async fn accept_uni(&self) -> Result<RecvStream, ServerError> {
        self.connection
            .accept_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_uni failed: {e}")))
    }

    /// Open the delivery stream. The peer sees it once the first byte is
    /// written.
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        self.connection
            .open_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("open_uni failed: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection immediately. Unsent stream data is discarded.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }
}

impl std::fmt::Debug for QuinnConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuinnConnection").field("remote", &self.remote_addr()).finish()
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig, ServerError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;

    let key_pem = std::fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config(format!("no private key found in '{key_path}'")))?;

    quic_config(certs, key)
}

fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_der = cert.cert.der().clone();
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    tracing::warn!("using self-signed certificate, not for production use");

    quic_config(vec![cert_der], key.into())
}

fn quic_config(
    certs: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<ServerConfig, ServerError> {
    let mut tls_config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}
