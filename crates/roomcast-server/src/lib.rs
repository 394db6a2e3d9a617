//! Roomcast production server.
//!
//! Wraps the Sans-IO [`ServerDriver`] from [`roomcast_core`] with a QUIC
//! transport, a tokio runtime and the system clock.
//!
//! # Architecture
//!
//! The driver sits behind a single `tokio::sync::Mutex`. Each connection task
//! feeds it events, takes the resulting actions, releases the lock and only
//! then executes them. Fan-out goes through [`OutboxTable`]: every recipient
//! has a bounded queue and a writer task, so sending never waits on a peer.
//!
//! # Components
//!
//! - [`Server`]: accept loop, per-connection tasks, tick task
//! - [`QuinnTransport`]: QUIC endpoint via Quinn
//! - [`OutboxTable`]: per-connection outbound queues
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod outbox;
mod system_env;
mod transport;

use std::{collections::VecDeque, net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
pub use error::ServerError;
pub use outbox::{Outbox, OutboxTable, Outgoing};
use quinn::{ReadExactError, RecvStream};
use roomcast_core::{
    AdmissionError, Authenticator, ConnectionId, Environment, LogLevel, Outbound, Router,
    ServerAction, ServerDriver, ServerEvent, TokenIdentity,
};
pub use roomcast_core::{DisconnectPolicy, DriverConfig};
use roomcast_proto::{ErrorPayload, Frame, FrameHeader, Opcode, Payload, ProtocolError};
pub use system_env::SystemEnv;
use tokio::sync::{Mutex, RwLock};
pub use transport::{QuinnConnection, QuinnTransport};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Frames a connection may have queued before deliveries to it drop
    pub outbound_buffer: usize,
    /// Upper bound on one authenticator call
    pub admission_timeout: Duration,
    /// Period of the driver tick (timeouts, heartbeats)
    pub tick_interval: Duration,
    /// Driver configuration (timeouts, limits, admission)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            outbound_buffer: 256,
            admission_timeout: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            driver: DriverConfig::default(),
        }
    }
}

/// State shared by every task of a running server.
struct Shared {
    driver: Mutex<ServerDriver<SystemEnv>>,
    outboxes: RwLock<OutboxTable>,
    authenticator: Arc<dyn Authenticator>,
    env: SystemEnv,
    outbound_buffer: usize,
    admission_timeout: Duration,
}

/// Production roomcast server.
pub struct Server {
    transport: QuinnTransport,
    driver: ServerDriver<SystemEnv>,
    authenticator: Arc<dyn Authenticator>,
    env: SystemEnv,
    outbound_buffer: usize,
    admission_timeout: Duration,
    tick_interval: Duration,
}

impl Server {
    /// Create and bind a new server.
    ///
    /// Gated namespaces are verified with [`TokenIdentity`] unless
    /// [`Server::with_authenticator`] installs something else.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env, config.driver);

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self {
            transport,
            driver,
            authenticator: Arc::new(TokenIdentity),
            env,
            outbound_buffer: config.outbound_buffer,
            admission_timeout: config.admission_timeout,
            tick_interval: config.tick_interval,
        })
    }

    /// Replace the authenticator used for gated namespaces.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Accept connections until the endpoint closes.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "roomcast server starting");

        let shared = Arc::new(Shared {
            driver: Mutex::new(self.driver),
            outboxes: RwLock::new(OutboxTable::new()),
            authenticator: self.authenticator,
            env: self.env,
            outbound_buffer: self.outbound_buffer,
            admission_timeout: self.admission_timeout,
        });

        let ticker = tokio::spawn(run_ticker(Arc::clone(&shared), self.tick_interval));

        while let Some(accepted) = self.transport.accept().await {
            match accepted {
                Ok(conn) => {
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, shared).await {
                            tracing::warn!(error = %e, "connection task failed");
                        }
                    });
                },
                Err(e) => {
                    tracing::debug!(error = %e, "accept failed");
                },
            }
        }

        ticker.abort();
        Ok(())
    }
}

async fn run_ticker(shared: Arc<Shared>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        drive(&shared, ServerEvent::Tick).await;
    }
}

/// Own one connection from accept to cleanup.
async fn handle_connection(conn: QuinnConnection, shared: Arc<Shared>) -> Result<(), ServerError> {
    let send = conn.open_uni().await?;
    let (outbox, rx) = Outbox::channel(shared.outbound_buffer);

    let connection_id = {
        let mut outboxes = shared.outboxes.write().await;
        loop {
            let candidate = shared.env.random_u64();
            if outboxes.insert(candidate, outbox.clone(), conn.clone()) {
                break candidate;
            }
        }
    };

    tracing::debug!(connection_id, remote = %conn.remote_addr(), "new connection");
    tokio::spawn(outbox::run_writer(connection_id, conn.clone(), send, rx));

    drive(&shared, ServerEvent::ConnectionAccepted { connection_id }).await;

    let reason = match conn.accept_uni().await {
        Ok(recv) => read_frames(connection_id, recv, &shared).await,
        Err(e) => e.to_string(),
    };

    shared.outboxes.write().await.remove(connection_id);
    drive(&shared, ServerEvent::ConnectionClosed { connection_id, reason }).await;

    Ok(())
}

/// Read frames off the client's stream until it ends. Returns why it ended.
async fn read_frames(connection_id: ConnectionId, mut recv: RecvStream, shared: &Shared) -> String {
    let mut buf = BytesMut::with_capacity(FrameHeader::SIZE + 1024);

    loop {
        buf.clear();
        buf.resize(FrameHeader::SIZE, 0);

        match recv.read_exact(&mut buf[..]).await {
            Ok(()) => {},
            Err(ReadExactError::FinishedEarly(0)) => return "stream finished".to_string(),
            Err(e) => return e.to_string(),
        }

        let payload_size = match FrameHeader::from_bytes(&buf) {
            Ok(header) => header.payload_size() as usize,
            Err(e) => {
                let error = ServerError::Protocol(e);
                tracing::warn!(connection_id, %error, "unreadable frame header");
                shared.outboxes.read().await.close(connection_id, "protocol error");
                return error.to_string();
            },
        };

        if payload_size > 0 {
            buf.resize(FrameHeader::SIZE + payload_size, 0);
            if let Err(e) = recv.read_exact(&mut buf[FrameHeader::SIZE..]).await {
                return format!("payload read failed: {e}");
            }
        }

        let frame = match Frame::decode(&buf) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection_id, error = %e, "frame decode failed");
                match invalid_frame_reply(&buf, &e) {
                    Ok(reply) => {
                        let outboxes = shared.outboxes.read().await;
                        if let Err(e) = outboxes.try_send(connection_id, &reply) {
                            tracing::debug!(connection_id, error = %e, "error reply dropped");
                        }
                    },
                    Err(e) => tracing::warn!(connection_id, error = %e, "error reply failed"),
                }
                continue;
            },
        };

        drive(shared, ServerEvent::FrameReceived { connection_id, frame }).await;
    }
}

/// `INVALID_PAYLOAD` error for a frame that could not be decoded, echoing its
/// request id when the header is readable.
fn invalid_frame_reply(buf: &[u8], error: &ProtocolError) -> Result<Frame, ProtocolError> {
    let mut header = FrameHeader::new(Opcode::Error);
    if let Ok(received) = FrameHeader::from_bytes(buf) {
        header.set_request_id(received.request_id());
    }
    Payload::Error(ErrorPayload::invalid_payload(error.to_string())).into_frame(header)
}

/// Feed one event to the driver and execute everything that follows from it.
///
/// Admission results are fed back through the same queue, so one call runs an
/// event to completion without recursion.
async fn drive(shared: &Shared, event: ServerEvent) {
    let mut queue = VecDeque::from([event]);

    while let Some(event) = queue.pop_front() {
        let actions = {
            let mut driver = shared.driver.lock().await;
            match driver.process_event(event) {
                Ok(actions) => actions,
                Err(e) => {
                    let error = ServerError::from(e);
                    tracing::warn!(%error, "event rejected by driver");
                    continue;
                },
            }
        };

        for action in actions {
            if let Some(follow_up) = execute(shared, action).await {
                queue.push_back(follow_up);
            }
        }
    }
}

/// Execute one action. Runs without the driver lock held.
async fn execute(
    shared: &Shared,
    action: ServerAction<<SystemEnv as Environment>::Instant>,
) -> Option<ServerEvent> {
    match action {
        ServerAction::SendToConnection { connection_id, frame } => {
            if let Err(e) = shared.outboxes.read().await.try_send(connection_id, &frame) {
                tracing::debug!(connection_id, error = %e, "direct reply dropped");
            }
            None
        },

        ServerAction::Deliver(dispatch) => {
            let report = Router::dispatch(&dispatch, &*shared.outboxes.read().await);

            if report.skipped > 0 {
                tracing::debug!(
                    audience = ?dispatch.audience,
                    skipped = report.skipped,
                    "recipients departed before delivery"
                );
            }
            for failure in &report.failures {
                tracing::warn!(audience = ?dispatch.audience, error = %failure, "delivery dropped");
            }
            None
        },

        ServerAction::Authenticate { connection_id, namespace, token } => {
            tracing::debug!(connection_id, %namespace, "running authenticator");

            let verdict = shared.authenticator.authenticate(&token);
            let result = tokio::time::timeout(shared.admission_timeout, verdict)
                .await
                .unwrap_or(Err(AdmissionError::Timeout));

            Some(ServerEvent::AdmissionResolved { connection_id, result })
        },

        ServerAction::CloseConnection { connection_id, reason } => {
            tracing::debug!(connection_id, %reason, "closing connection");
            shared.outboxes.read().await.close(connection_id, &reason);
            None
        },

        ServerAction::Log { level, message, .. } => {
            match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            }
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undecodable_frame_gets_invalid_payload_reply() {
        let mut header = FrameHeader::new(Opcode::GlobalMessage);
        header.set_request_id(9);
        let mut buf = Frame::new(header, b"hello".to_vec()).to_vec().unwrap();
        buf.truncate(FrameHeader::SIZE + 2);
        let error = Frame::decode(&buf).unwrap_err();

        let reply = invalid_frame_reply(&buf, &error).unwrap();

        assert_eq!(reply.header.request_id(), 9);
        match Payload::from_frame(&reply).unwrap() {
            Payload::Error(payload) => assert_eq!(payload.code, ErrorPayload::INVALID_PAYLOAD),
            other => panic!("expected error payload, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_header_reply_has_no_request_id() {
        let error = ProtocolError::InvalidMagic;

        let reply = invalid_frame_reply(&[0u8; 4], &error).unwrap();

        assert_eq!(reply.header.request_id(), 0);
        assert_eq!(reply.header.opcode_enum(), Some(Opcode::Error));
    }
}
