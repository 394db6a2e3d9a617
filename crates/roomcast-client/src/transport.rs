//! QUIC transport for the client.
//!
//! [`connect`] returns a [`Connection`]: two channels bridged onto the QUIC
//! connection by background tasks. Frames go out on one unidirectional stream
//! opened by the client and come back on one opened by the server, so order
//! holds in both directions. Server pings are answered by the reader task, so a
//! client that only listens stays admitted.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use quinn::{ClientConfig, Endpoint, ReadExactError, RecvStream, SendStream};
use roomcast_proto::{ALPN_PROTOCOL, Frame, FrameHeader, Hello, Opcode};
use thiserror::Error;
use tokio::{sync::mpsc, task::AbortHandle};

use crate::{ClientEvent, Requests, error::ClientError};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// The server answered the handshake with something other than a welcome.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// A live connection to a roomcast server.
pub struct Connection {
    to_server: mpsc::Sender<Frame>,
    from_server: mpsc::Receiver<Frame>,
    requests: Requests,
    tasks: Vec<AbortHandle>,
    _endpoint: Endpoint,
}

/// Connect to a roomcast server without performing the handshake.
pub async fn connect(server_addr: &str) -> Result<Connection, TransportError> {
    let addr: SocketAddr = server_addr
        .parse()
        .map_err(|e| TransportError::Connection(format!("invalid address: {e}")))?;

    let local: SocketAddr = if addr.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };

    let mut endpoint = Endpoint::client(local)
        .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(insecure_client_config()?);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    let send = connection
        .open_uni()
        .await
        .map_err(|e| TransportError::Stream(format!("open_uni failed: {e}")))?;

    let (to_server_tx, to_server_rx) = mpsc::channel::<Frame>(64);
    let (from_server_tx, from_server_rx) = mpsc::channel::<Frame>(256);

    let writer = tokio::spawn(write_frames(send, to_server_rx));
    let reader = tokio::spawn(read_frames(connection, from_server_tx, to_server_tx.clone()));

    Ok(Connection {
        to_server: to_server_tx,
        from_server: from_server_rx,
        requests: Requests::new(),
        tasks: vec![writer.abort_handle(), reader.abort_handle()],
        _endpoint: endpoint,
    })
}

/// Connect and complete the handshake.
///
/// Returns the connection together with the welcome the server sent.
pub async fn connect_as(
    server_addr: &str,
    hello: Hello,
) -> Result<(Connection, ClientEvent), TransportError> {
    let mut connection = connect(server_addr).await?;
    let welcome = connection.handshake(hello).await?;
    Ok((connection, welcome))
}

impl Connection {
    /// Request builder shared by everything sent on this connection.
    pub fn requests(&mut self) -> &mut Requests {
        &mut self.requests
    }

    /// Send `Hello` and wait for the server's verdict.
    ///
    /// Returns [`ClientEvent::Welcome`] on admission.
    pub async fn handshake(&mut self, hello: Hello) -> Result<ClientEvent, TransportError> {
        let frame = self.requests.hello(hello)?;
        self.send(frame).await?;

        match self.next_event().await? {
            welcome @ ClientEvent::Welcome { .. } => Ok(welcome),
            ClientEvent::Error { code, message, .. } => {
                Err(ClientError::Refused { code, message }.into())
            },
            other => Err(TransportError::Stream(format!("unexpected reply to hello: {other:?}"))),
        }
    }

    /// Queue a frame for the server.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.to_server
            .send(frame)
            .await
            .map_err(|_| TransportError::Stream("connection task ended".to_string()))
    }

    /// Next raw frame from the server. `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.recv().await
    }

    /// Next classified event from the server.
    pub async fn next_event(&mut self) -> Result<ClientEvent, TransportError> {
        let frame = self
            .recv()
            .await
            .ok_or_else(|| ClientError::Closed("server stream ended".to_string()))?;
        Ok(ClientEvent::from_frame(&frame)?)
    }

    /// Like [`Connection::next_event`], giving up after `timeout`.
    pub async fn next_event_within(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ClientEvent>, TransportError> {
        match tokio::time::timeout(timeout, self.next_event()).await {
            Ok(event) => event.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Stop the background tasks. The QUIC connection closes with them.
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn write_frames(mut send: SendStream, mut to_server: mpsc::Receiver<Frame>) {
    while let Some(frame) = to_server.recv().await {
        let buf = match frame.to_vec() {
            Ok(buf) => buf,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unencodable frame");
                continue;
            },
        };

        if let Err(e) = send.write_all(&buf).await {
            tracing::debug!(error = %e, "send stream failed");
            return;
        }
    }

    let _ = send.finish();
}

async fn read_frames(
    connection: quinn::Connection,
    from_server: mpsc::Sender<Frame>,
    to_server: mpsc::Sender<Frame>,
) {
    let recv = match connection.accept_uni().await {
        Ok(recv) => recv,
        Err(e) => {
            tracing::debug!(error = %e, "server stream never opened");
            return;
        },
    };

    if let Err(e) = forward_frames(recv, &from_server, &to_server).await {
        tracing::debug!(error = %e, "server stream ended");
    }
}

async fn forward_frames(
    mut recv: RecvStream,
    from_server: &mpsc::Sender<Frame>,
    to_server: &mpsc::Sender<Frame>,
) -> Result<(), TransportError> {
    let mut buf = BytesMut::with_capacity(FrameHeader::SIZE + 1024);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);

        match recv.read_exact(&mut buf[..]).await {
            Ok(()) => {},
            Err(ReadExactError::FinishedEarly(0)) => return Ok(()),
            Err(e) => return Err(TransportError::Stream(format!("header read failed: {e}"))),
        }

        let payload_size = FrameHeader::from_bytes(&buf)
            .map_err(|e| TransportError::Client(e.into()))?
            .payload_size() as usize;

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            recv.read_exact(&mut buf[FrameHeader::SIZE..])
                .await
                .map_err(|e| TransportError::Stream(format!("payload read failed: {e}")))?;
        }

        let frame = Frame::decode(&buf).map_err(|e| TransportError::Client(e.into()))?;

        if frame.header.opcode_enum() == Some(Opcode::Ping) {
            let pong = Frame::new(FrameHeader::new(Opcode::Pong), Vec::new());
            if to_server.send(pong).await.is_err() {
                return Ok(());
            }
        }

        if from_server.send(frame).await.is_err() {
            return Ok(());
        }
    }
}

/// Client config that accepts any server certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn insecure_client_config() -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut crypto = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::Connection(format!("invalid TLS config: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("QUIC config error: {e}")))?;

    let mut config = ClientConfig::new(Arc::new(quic));

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Duration::from_secs(30).try_into().ok());
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate.
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
