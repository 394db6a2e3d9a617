//! Server driver.
//!
//! Ties together the per-connection [`Session`] state machines, admission and
//! the [`Lifecycle`] membership state. The driver is Sans-IO: the runtime
//! feeds it [`ServerEvent`]s and executes the [`ServerAction`]s it returns.
//! Fan-out is returned as [`ServerAction::Deliver`] with the recipients
//! already resolved, so the runtime can release its lock on the driver before
//! touching any socket.

use std::collections::HashMap;

use roomcast_proto::{
    ErrorPayload, Frame, FrameHeader, HelloReply, JoinAck, MemberDeparted, Opcode, Payload,
    ProtocolError, RoomId, RoomMessage, payloads::session::Hello,
};

use crate::{
    ConnectionId,
    auth::{AdmissionError, AdmissionPolicy},
    env::Environment,
    error::{CoreError, SessionError},
    lifecycle::Lifecycle,
    registry::ConnectionInfo,
    router::Dispatch,
    session::{Session, SessionAction, SessionConfig, SessionState},
};

/// What remaining room members hear when a connection drops without leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisconnectPolicy {
    /// Send each remaining member a server-authored `MemberDeparted`
    #[default]
    Announce,
    /// Clean up membership without telling anyone
    Silent,
}

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Session timeouts and heartbeat
    pub session: SessionConfig,
    /// Maximum concurrent connections, admitted or not
    pub max_connections: usize,
    /// Namespaces that require a token
    pub admission: AdmissionPolicy,
    /// Implicit-disconnect announcement policy
    pub disconnect_policy: DisconnectPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_connections: 10_000,
            admission: AdmissionPolicy::default(),
            disconnect_policy: DisconnectPolicy::default(),
        }
    }
}

/// Events the runtime feeds to the driver.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Transport accepted a connection
    ConnectionAccepted {
        /// Transport-assigned id
        connection_id: ConnectionId,
    },

    /// A complete frame arrived
    FrameReceived {
        /// Sender
        connection_id: ConnectionId,
        /// The frame
        frame: Frame,
    },

    /// Result of a [`ServerAction::Authenticate`]
    AdmissionResolved {
        /// Connection being admitted
        connection_id: ConnectionId,
        /// Identity vouched for, or why not
        result: Result<String, AdmissionError>,
    },

    /// Transport reported the connection gone. Exactly once per connection.
    ConnectionClosed {
        /// Closed connection
        connection_id: ConnectionId,
        /// Why
        reason: String,
    },

    /// Periodic timeout and heartbeat check
    Tick,
}

/// Actions the runtime executes.
#[derive(Debug, Clone)]
pub enum ServerAction<I> {
    /// Send one frame to one connection
    SendToConnection {
        /// Target
        connection_id: ConnectionId,
        /// Frame to send
        frame: Frame,
    },

    /// Fan a frame out to a resolved recipient set
    Deliver(Dispatch),

    /// Run the authenticator and report back with
    /// [`ServerEvent::AdmissionResolved`]
    Authenticate {
        /// Connection being admitted
        connection_id: ConnectionId,
        /// Namespace requested
        namespace: String,
        /// Credential presented
        token: String,
    },

    /// Close a connection
    CloseConnection {
        /// Target
        connection_id: ConnectionId,
        /// Reason sent to the peer
        reason: String,
    },

    /// Log a message
    Log {
        /// Level
        level: LogLevel,
        /// Message
        message: String,
        /// When it happened
        timestamp: I,
    },
}

/// Log levels for [`ServerAction::Log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Declared identity held while the authenticator runs.
#[derive(Debug)]
struct PendingAdmission {
    identity: String,
    namespace: String,
    request_id: u32,
}

type Actions<E> = Vec<ServerAction<<E as Environment>::Instant>>;

/// Action-based server driver.
pub struct ServerDriver<E>
where
    E: Environment,
{
    sessions: HashMap<ConnectionId, Session<E::Instant>>,
    pending: HashMap<ConnectionId, PendingAdmission>,
    lifecycle: Lifecycle,
    env: E,
    config: DriverConfig,
}

impl<E> ServerDriver<E>
where
    E: Environment,
{
    /// Create a driver with no connections.
    pub fn new(env: E, config: DriverConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            pending: HashMap::new(),
            lifecycle: Lifecycle::new(),
            env,
            config,
        }
    }

    /// Process one event.
    ///
    /// Errors are scoped to the event's connection; the driver stays usable.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Actions<E>, CoreError> {
        match event {
            ServerEvent::ConnectionAccepted { connection_id } => {
                self.handle_connection_accepted(connection_id)
            },
            ServerEvent::FrameReceived { connection_id, frame } => {
                self.handle_frame_received(connection_id, &frame)
            },
            ServerEvent::AdmissionResolved { connection_id, result } => {
                self.handle_admission_resolved(connection_id, result)
            },
            ServerEvent::ConnectionClosed { connection_id, reason } => {
                self.handle_connection_closed(connection_id, &reason)
            },
            ServerEvent::Tick => Ok(self.handle_tick()),
        }
    }

    /// Membership state, read-only.
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Connections accepted and not yet closed, admitted or not.
    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session state of a connection. `None` if unknown.
    pub fn session_state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.sessions.get(&connection_id).map(Session::state)
    }

    /// Driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn handle_connection_accepted(
        &mut self,
        connection_id: ConnectionId,
    ) -> Result<Actions<E>, CoreError> {
        let now = self.env.now();

        if self.sessions.contains_key(&connection_id) {
            return Err(CoreError::DuplicateConnection(connection_id));
        }

        if self.sessions.len() >= self.config.max_connections {
            return Ok(vec![
                reply(connection_id, ErrorPayload::server_full(self.config.max_connections), 0)?,
                ServerAction::CloseConnection {
                    connection_id,
                    reason: "server full".to_string(),
                },
                log(
                    LogLevel::Warn,
                    format!("connection {connection_id} refused: server full"),
                    now,
                ),
            ]);
        }

        self.sessions.insert(connection_id, Session::new(now, self.config.session.clone()));

        Ok(vec![log(LogLevel::Debug, format!("connection {connection_id} accepted"), now)])
    }

    fn handle_frame_received(
        &mut self,
        connection_id: ConnectionId,
        frame: &Frame,
    ) -> Result<Actions<E>, CoreError> {
        let now = self.env.now();
        let request_id = frame.header.request_id();

        let session = self
            .sessions
            .get_mut(&connection_id)
            .ok_or(CoreError::UnknownConnection(connection_id))?;
        session.touch(now);
        let active = session.is_active();

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                let error = match e {
                    ProtocolError::UnknownOpcode(_) => {
                        ErrorPayload::protocol_violation(e.to_string())
                    },
                    _ => ErrorPayload::invalid_payload(e.to_string()),
                };
                return reject(connection_id, error, request_id, now);
            },
        };

        match payload {
            Payload::Hello(hello) => self.handle_hello(connection_id, hello, request_id),

            Payload::Ping | Payload::Pong | Payload::Goodbye(_) => {
                match session.handle_control(&payload, now) {
                    Ok(session_actions) => {
                        Ok(convert_session_actions(connection_id, session_actions))
                    },
                    Err(e) if !active => reject(
                        connection_id,
                        ErrorPayload::not_admitted(payload.opcode()),
                        request_id,
                        now,
                    )
                    .map(|mut actions| {
                        actions.push(log(LogLevel::Debug, e.to_string(), now));
                        actions
                    }),
                    Err(e) => reject(
                        connection_id,
                        ErrorPayload::protocol_violation(e.to_string()),
                        request_id,
                        now,
                    ),
                }
            },

            Payload::Error(error) => {
                session.close();
                Ok(vec![
                    log(
                        LogLevel::Warn,
                        format!(
                            "connection {connection_id} reported error {:#06x}: {}",
                            error.code, error.message
                        ),
                        now,
                    ),
                    ServerAction::CloseConnection {
                        connection_id,
                        reason: "peer error".to_string(),
                    },
                ])
            },

            Payload::GlobalMessage(_)
            | Payload::JoinRoom(_)
            | Payload::RoomMessage(_)
            | Payload::LeaveRoom(_)
                if !active =>
            {
                reject(connection_id, ErrorPayload::not_admitted(payload.opcode()), request_id, now)
            },

            Payload::GlobalMessage(body) => {
                let frame = Frame::new(FrameHeader::new(Opcode::GlobalMessage), body);
                let dispatch = self.lifecycle.router().global(connection_id, frame);
                Ok(vec![ServerAction::Deliver(dispatch)])
            },

            Payload::RoomMessage(message) => {
                let frame =
                    Frame::new(FrameHeader::new(Opcode::RoomMessage), frame.payload.clone());
                let dispatch =
                    self.lifecycle.router().room(&message.room_id, Some(connection_id), frame);
                Ok(vec![ServerAction::Deliver(dispatch)])
            },

            Payload::JoinRoom(join) => {
                let announcement = announcement_frame(&join.room_id, join.announcement)?;
                let dispatch =
                    self.lifecycle.join_room(connection_id, &join.room_id, announcement)?;
                let members = self.lifecycle.directory().member_count(join.room_id.as_str());

                Ok(vec![
                    ServerAction::Deliver(dispatch),
                    reply(
                        connection_id,
                        Payload::JoinAck(JoinAck {
                            room_id: join.room_id.clone(),
                            members: u32::try_from(members).unwrap_or(u32::MAX),
                        }),
                        request_id,
                    )?,
                    log(
                        LogLevel::Debug,
                        format!(
                            "connection {connection_id} joined room {} ({members} members)",
                            join.room_id
                        ),
                        now,
                    ),
                ])
            },

            Payload::LeaveRoom(leave) => {
                let announcement = announcement_frame(&leave.room_id, leave.announcement)?;
                match self.lifecycle.leave_room(connection_id, &leave.room_id, announcement) {
                    Some(dispatch) => Ok(vec![
                        ServerAction::Deliver(dispatch),
                        log(
                            LogLevel::Debug,
                            format!("connection {connection_id} left room {}", leave.room_id),
                            now,
                        ),
                    ]),
                    None => Ok(vec![log(
                        LogLevel::Debug,
                        format!(
                            "connection {connection_id} left room {} without joining",
                            leave.room_id
                        ),
                        now,
                    )]),
                }
            },

            Payload::HelloReply(_) | Payload::JoinAck(_) | Payload::MemberDeparted(_) => reject(
                connection_id,
                ErrorPayload::protocol_violation(format!(
                    "{:?} is server-to-client only",
                    payload.opcode()
                )),
                request_id,
                now,
            ),
        }
    }

    fn handle_hello(
        &mut self,
        connection_id: ConnectionId,
        hello: Hello,
        request_id: u32,
    ) -> Result<Actions<E>, CoreError> {
        let now = self.env.now();
        let session = self
            .sessions
            .get_mut(&connection_id)
            .ok_or(CoreError::UnknownConnection(connection_id))?;

        match session.accept_hello(hello.version) {
            Ok(()) => {},
            Err(e @ SessionError::UnsupportedVersion(_)) => {
                session.close();
                let error = ErrorPayload::protocol_violation(e.to_string());
                let mut actions = reject(connection_id, error, request_id, now)?;
                actions.push(ServerAction::CloseConnection { connection_id, reason: e.to_string() });
                return Ok(actions);
            },
            Err(e) => {
                let error = ErrorPayload::protocol_violation(e.to_string());
                return reject(connection_id, error, request_id, now);
            },
        }

        if !self.config.admission.requires_token(&hello.namespace) {
            let info = ConnectionInfo::new(hello.identity, hello.namespace);
            return self.admit(connection_id, info, request_id);
        }

        let Some(token) = hello.token.filter(|t| !t.is_empty()) else {
            let missing = AdmissionError::MissingToken(hello.namespace);
            return self.refuse(connection_id, &missing, request_id);
        };

        session.begin_authentication(now)?;
        let namespace = hello.namespace.clone();
        self.pending.insert(connection_id, PendingAdmission {
            identity: hello.identity,
            namespace: hello.namespace,
            request_id,
        });

        Ok(vec![
            log(
                LogLevel::Debug,
                format!("connection {connection_id} authenticating for {namespace}"),
                now,
            ),
            ServerAction::Authenticate { connection_id, namespace, token },
        ])
    }

    fn handle_admission_resolved(
        &mut self,
        connection_id: ConnectionId,
        result: Result<String, AdmissionError>,
    ) -> Result<Actions<E>, CoreError> {
        let now = self.env.now();

        let authenticating = self
            .sessions
            .get(&connection_id)
            .is_some_and(|s| s.state() == SessionState::Authenticating);
        let pending = self.pending.remove(&connection_id);

        let Some(pending) = pending.filter(|_| authenticating) else {
            return Ok(vec![log(
                LogLevel::Debug,
                format!("stale admission result for connection {connection_id}"),
                now,
            )]);
        };

        match result {
            Ok(principal) => {
                let info = ConnectionInfo::new(pending.identity, pending.namespace)
                    .with_principal(principal);
                self.admit(connection_id, info, pending.request_id)
            },
            Err(e) => self.refuse(connection_id, &e, pending.request_id),
        }
    }

    fn admit(
        &mut self,
        connection_id: ConnectionId,
        info: ConnectionInfo,
        request_id: u32,
    ) -> Result<Actions<E>, CoreError> {
        let now = self.env.now();
        let namespace = info.namespace.clone();

        let handle = match self.lifecycle.register(connection_id, info) {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(session) = self.sessions.get_mut(&connection_id) {
                    session.close();
                }
                return Ok(vec![
                    log(LogLevel::Error, e.to_string(), now),
                    ServerAction::CloseConnection { connection_id, reason: e.to_string() },
                ]);
            },
        };

        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.admit(now)?;
        }

        let welcome = HelloReply { connection_id, identity: handle.identity.clone() };

        Ok(vec![
            reply(connection_id, Payload::HelloReply(welcome), request_id)?,
            log(
                LogLevel::Info,
                format!("connection {connection_id} admitted as {} on {namespace}", handle.identity),
                now,
            ),
        ])
    }

    fn refuse(
        &mut self,
        connection_id: ConnectionId,
        error: &AdmissionError,
        request_id: u32,
    ) -> Result<Actions<E>, CoreError> {
        let now = self.env.now();

        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.close();
        }
        self.pending.remove(&connection_id);

        let refusal = CoreError::AdmissionRefused { connection_id, reason: error.to_string() };

        Ok(vec![
            reply(connection_id, ErrorPayload::admission_refused(error.to_string()), request_id)?,
            ServerAction::CloseConnection {
                connection_id,
                reason: "admission refused".to_string(),
            },
            log(LogLevel::Info, refusal.to_string(), now),
        ])
    }

    fn handle_connection_closed(
        &mut self,
        connection_id: ConnectionId,
        reason: &str,
    ) -> Result<Actions<E>, CoreError> {
        let now = self.env.now();

        if let Some(mut session) = self.sessions.remove(&connection_id) {
            session.close();
        }
        self.pending.remove(&connection_id);

        let Some(departure) = self.lifecycle.disconnect(connection_id) else {
            return Ok(vec![log(
                LogLevel::Debug,
                format!("connection {connection_id} closed before admission: {reason}"),
                now,
            )]);
        };

        let mut actions = vec![log(
            LogLevel::Info,
            format!(
                "connection {connection_id} ({}) closed: {reason}, was in {} rooms",
                departure.info.identity,
                departure.rooms.len()
            ),
            now,
        )];

        if self.config.disconnect_policy == DisconnectPolicy::Announce {
            for (room_id, remaining) in departure.rooms {
                if remaining.is_empty() {
                    continue;
                }

                let notice = Payload::MemberDeparted(MemberDeparted {
                    room_id: room_id.clone(),
                    connection_id,
                    identity: departure.info.identity.clone(),
                })
                .to_frame()?;
                let dispatch = self.lifecycle.router().room(&room_id, None, notice);
                actions.push(ServerAction::Deliver(dispatch));
            }
        }

        Ok(actions)
    }

    fn handle_tick(&mut self) -> Actions<E> {
        let now = self.env.now();
        let mut actions = Vec::new();

        for (&connection_id, session) in &mut self.sessions {
            actions.extend(convert_session_actions(connection_id, session.tick(now)));
        }

        actions
    }
}

impl<E: Environment> std::fmt::Debug for ServerDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("connections", &self.sessions.len())
            .field("admitted", &self.lifecycle.registry().len())
            .field("rooms", &self.lifecycle.directory().room_count())
            .finish_non_exhaustive()
    }
}

fn log<I>(level: LogLevel, message: String, timestamp: I) -> ServerAction<I> {
    ServerAction::Log { level, message, timestamp }
}

fn reply<I>(
    connection_id: ConnectionId,
    payload: impl Into<Payload>,
    request_id: u32,
) -> Result<ServerAction<I>, CoreError> {
    let payload = payload.into();
    let mut header = FrameHeader::new(payload.opcode());
    header.set_request_id(request_id);
    Ok(ServerAction::SendToConnection { connection_id, frame: payload.into_frame(header)? })
}

/// Error frame to the offender plus a warning. The connection stays open.
fn reject<I>(
    connection_id: ConnectionId,
    error: ErrorPayload,
    request_id: u32,
    now: I,
) -> Result<Vec<ServerAction<I>>, CoreError> {
    let message = format!("connection {connection_id}: {}", error.message);
    Ok(vec![reply(connection_id, error, request_id)?, log(LogLevel::Warn, message, now)])
}

fn announcement_frame(room_id: &RoomId, body: bytes::Bytes) -> Result<Frame, CoreError> {
    Ok(Payload::RoomMessage(RoomMessage { room_id: room_id.clone(), body }).to_frame()?)
}

fn convert_session_actions<I>(
    connection_id: ConnectionId,
    session_actions: Vec<SessionAction>,
) -> Vec<ServerAction<I>> {
    session_actions
        .into_iter()
        .map(|action| match action {
            SessionAction::SendFrame(frame) => {
                ServerAction::SendToConnection { connection_id, frame }
            },
            SessionAction::Close { reason } => {
                ServerAction::CloseConnection { connection_id, reason }
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::*;

    #[derive(Clone)]
    struct TestEnv {
        base: Instant,
        offset_ms: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { base: Instant::now(), offset_ms: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, by: Duration) {
            self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for (i, byte) in buffer.iter_mut().enumerate() {
                *byte = i as u8;
            }
        }
    }

    fn hello_frame(hello: Hello) -> Frame {
        Payload::Hello(hello).to_frame().unwrap()
    }

    fn sent_to(actions: &[ServerAction<Instant>], id: ConnectionId) -> Vec<Payload> {
        actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::SendToConnection { connection_id, frame } if *connection_id == id => {
                    Some(Payload::from_frame(frame).unwrap())
                },
                _ => None,
            })
            .collect()
    }

    fn closes(actions: &[ServerAction<Instant>]) -> Vec<ConnectionId> {
        actions
            .iter()
            .filter_map(|a| match a {
                ServerAction::CloseConnection { connection_id, .. } => Some(*connection_id),
                _ => None,
            })
            .collect()
    }

    fn connect(driver: &mut ServerDriver<TestEnv>, id: ConnectionId, name: &str) {
        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: id }).unwrap();
        driver
            .process_event(ServerEvent::FrameReceived {
                connection_id: id,
                frame: hello_frame(Hello::new(name)),
            })
            .unwrap();
    }

    #[test]
    fn accepts_and_admits_open_namespace() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());

        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();
        assert_eq!(driver.session_state(1), Some(SessionState::Connecting));

        let mut header = FrameHeader::new(Opcode::Hello);
        header.set_request_id(77);
        let frame = Payload::Hello(Hello::new("alice")).into_frame(header).unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { connection_id: 1, frame }).unwrap();

        assert_eq!(sent_to(&actions, 1), vec![Payload::HelloReply(HelloReply {
            connection_id: 1,
            identity: "alice".to_string(),
        })]);
        let echoed = actions.iter().any(|a| {
            matches!(a, ServerAction::SendToConnection { frame, .. } if frame.header.request_id() == 77)
        });
        assert!(echoed);
        assert_eq!(driver.session_state(1), Some(SessionState::Active));
        assert!(driver.lifecycle().registry().contains(1));
    }

    #[test]
    fn refuses_beyond_capacity() {
        let config = DriverConfig { max_connections: 1, ..Default::default() };
        let mut driver = ServerDriver::new(TestEnv::new(), config);

        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();
        let actions =
            driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 2 }).unwrap();

        assert!(matches!(
            &sent_to(&actions, 2)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::SERVER_FULL, .. })]
        ));
        assert_eq!(closes(&actions), vec![2]);
        assert_eq!(driver.connection_count(), 1);
    }

    #[test]
    fn duplicate_accept_is_an_error() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        let result = driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 });
        assert_eq!(result.unwrap_err(), CoreError::DuplicateConnection(1));
    }

    #[test]
    fn chat_before_admission_is_refused() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        let frame = Payload::GlobalMessage(bytes::Bytes::from_static(b"hi")).to_frame().unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { connection_id: 1, frame }).unwrap();

        assert!(matches!(
            &sent_to(&actions, 1)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::NOT_ADMITTED, .. })]
        ));
        assert!(!actions.iter().any(|a| matches!(a, ServerAction::Deliver(_))));
    }

    #[test]
    fn gated_namespace_requests_authentication() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        let hello = Hello::new("dave").with_namespace("/user").with_token("tok");
        let actions = driver
            .process_event(ServerEvent::FrameReceived { connection_id: 1, frame: hello_frame(hello) })
            .unwrap();

        assert!(actions.iter().any(|a| matches!(
            a,
            ServerAction::Authenticate { connection_id: 1, token, .. } if token == "tok"
        )));
        assert_eq!(driver.session_state(1), Some(SessionState::Authenticating));
        assert!(!driver.lifecycle().registry().contains(1));

        let actions = driver
            .process_event(ServerEvent::AdmissionResolved {
                connection_id: 1,
                result: Ok("dave@example".to_string()),
            })
            .unwrap();

        assert!(matches!(&sent_to(&actions, 1)[..], [Payload::HelloReply(_)]));
        let info = driver.lifecycle().registry().info(1).unwrap();
        assert_eq!(info.identity, "dave");
        assert_eq!(info.principal.as_deref(), Some("dave@example"));
    }

    #[test]
    fn gated_namespace_without_token_is_refused() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        let hello = Hello::new("eve").with_namespace("/user");
        let actions = driver
            .process_event(ServerEvent::FrameReceived { connection_id: 1, frame: hello_frame(hello) })
            .unwrap();

        assert!(matches!(
            &sent_to(&actions, 1)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::ADMISSION_REFUSED, .. })]
        ));
        assert_eq!(closes(&actions), vec![1]);
        assert!(driver.lifecycle().registry().is_empty());
    }

    #[test]
    fn stale_admission_result_is_ignored() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        let actions = driver
            .process_event(ServerEvent::AdmissionResolved { connection_id: 9, result: Ok("x".into()) })
            .unwrap();

        assert!(sent_to(&actions, 9).is_empty());
        assert!(driver.lifecycle().registry().is_empty());
    }

    #[test]
    fn join_delivers_announcement_then_ack() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        connect(&mut driver, 1, "bob");

        let join = Payload::JoinRoom(roomcast_proto::JoinRoom {
            room_id: RoomId::from("ABC123"),
            announcement: bytes::Bytes::from_static(b"bob joined"),
        });
        let actions = driver
            .process_event(ServerEvent::FrameReceived { connection_id: 1, frame: join.to_frame().unwrap() })
            .unwrap();

        let ServerAction::Deliver(dispatch) = &actions[0] else {
            panic!("expected Deliver first, got {:?}", actions[0]);
        };
        assert_eq!(dispatch.recipients, vec![1]);
        assert_eq!(
            Payload::from_frame(&dispatch.frame).unwrap(),
            Payload::RoomMessage(RoomMessage {
                room_id: RoomId::from("ABC123"),
                body: bytes::Bytes::from_static(b"bob joined"),
            })
        );
        assert_eq!(sent_to(&actions, 1), vec![Payload::JoinAck(JoinAck {
            room_id: RoomId::from("ABC123"),
            members: 1,
        })]);
    }

    #[test]
    fn tick_pings_then_times_out_idle_sessions() {
        let env = TestEnv::new();
        let mut driver = ServerDriver::new(env.clone(), DriverConfig::default());
        connect(&mut driver, 1, "alice");

        let actions = driver.process_event(ServerEvent::Tick).unwrap();
        assert_eq!(sent_to(&actions, 1), vec![Payload::Ping]);

        env.advance(Duration::from_secs(61));
        let actions = driver.process_event(ServerEvent::Tick).unwrap();
        assert_eq!(closes(&actions), vec![1]);
    }

    #[test]
    fn unadmitted_connection_hits_handshake_timeout() {
        let env = TestEnv::new();
        let mut driver = ServerDriver::new(env.clone(), DriverConfig::default());
        driver.process_event(ServerEvent::ConnectionAccepted { connection_id: 1 }).unwrap();

        env.advance(Duration::from_secs(11));
        let actions = driver.process_event(ServerEvent::Tick).unwrap();
        assert_eq!(closes(&actions), vec![1]);
    }

    #[test]
    fn client_only_opcodes_from_server_side_are_violations() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        connect(&mut driver, 1, "mallory");

        let frame = Payload::HelloReply(HelloReply { connection_id: 5, identity: "x".into() })
            .to_frame()
            .unwrap();
        let actions =
            driver.process_event(ServerEvent::FrameReceived { connection_id: 1, frame }).unwrap();

        assert!(matches!(
            &sent_to(&actions, 1)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::PROTOCOL_VIOLATION, .. })]
        ));
        assert!(closes(&actions).is_empty());
    }

    #[test]
    fn garbage_payload_gets_invalid_payload_error() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        connect(&mut driver, 1, "alice");

        let frame = Frame::new(FrameHeader::new(Opcode::JoinRoom), b"\xff\xff".to_vec());
        let actions =
            driver.process_event(ServerEvent::FrameReceived { connection_id: 1, frame }).unwrap();

        assert!(matches!(
            &sent_to(&actions, 1)[..],
            [Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_PAYLOAD, .. })]
        ));
    }

    #[test]
    fn frame_from_unknown_connection_is_an_error() {
        let mut driver = ServerDriver::new(TestEnv::new(), DriverConfig::default());
        let result = driver.process_event(ServerEvent::FrameReceived {
            connection_id: 3,
            frame: Payload::Ping.to_frame().unwrap(),
        });
        assert_eq!(result.unwrap_err(), CoreError::UnknownConnection(3));
    }
}
