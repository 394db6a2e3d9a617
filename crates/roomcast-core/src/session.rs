//! Per-connection session state machine.
//!
//! Tracks admission progress, activity and heartbeats for one connection.
//! Methods take the current time and return [`SessionAction`]s; nothing here
//! performs I/O.
//!
//! ```text
//! ┌────────────┐ Hello (gated) ┌────────────────┐ admitted ┌────────┐
//! │ Connecting │──────────────>│ Authenticating │─────────>│ Active │
//! └────────────┘               └────────────────┘          └────────┘
//!       │   Hello (open namespace)                               ↑ │
//!       └────────────────────────────────────────────────────────┘ │
//!       │ timeout / refusal          │ timeout / refusal           │ Goodbye / idle
//!       ↓                            ↓                             ↓
//!                            ┌──────────────┐
//!                            │ Disconnected │
//!                            └──────────────┘
//! ```

use std::{ops::Sub, time::Duration};

use roomcast_proto::{Frame, FrameHeader, Goodbye, Opcode, Payload};

use crate::error::SessionError;

/// Time allowed between accept and admission.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum time without any inbound frame before an active session is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between server Pings to active sessions.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send this frame to the peer
    SendFrame(Frame),
    /// Close the connection
    Close {
        /// Reason for closing
        reason: String,
    },
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, no Hello yet
    Connecting,
    /// Hello received for a gated namespace, credential check in flight
    Authenticating,
    /// Admitted and registered
    Active,
    /// Terminal
    Disconnected,
}

/// Session timeouts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Accept-to-admission deadline
    pub handshake_timeout: Duration,
    /// Inactivity deadline once active
    pub idle_timeout: Duration,
    /// Ping interval (should be below `idle_timeout / 2`)
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Session state machine, generic over the clock's instant type.
#[derive(Debug, Clone)]
pub struct Session<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    state: SessionState,
    config: SessionConfig,
    accepted_at: I,
    last_activity: I,
    last_heartbeat: Option<I>,
}

impl<I> Session<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// New session in [`SessionState::Connecting`].
    pub fn new(now: I, config: SessionConfig) -> Self {
        Self {
            state: SessionState::Connecting,
            config,
            accepted_at: now,
            last_activity: now,
            last_heartbeat: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether chat operations are allowed.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Check a Hello's version while still connecting.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` unless in `Connecting`
    /// - `SessionError::UnsupportedVersion` for a version other than ours
    pub fn accept_hello(&self, version: u8) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState { state: self.state, operation: "hello" });
        }
        if version != roomcast_proto::Hello::PROTOCOL_VERSION {
            return Err(SessionError::UnsupportedVersion(version));
        }
        Ok(())
    }

    /// `Connecting -> Authenticating`.
    pub fn begin_authentication(&mut self, now: I) -> Result<(), SessionError> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "begin_authentication",
            });
        }
        self.state = SessionState::Authenticating;
        self.last_activity = now;
        Ok(())
    }

    /// `Connecting | Authenticating -> Active`.
    pub fn admit(&mut self, now: I) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connecting | SessionState::Authenticating => {
                self.state = SessionState::Active;
                self.last_activity = now;
                Ok(())
            },
            state => Err(SessionError::InvalidState { state, operation: "admit" }),
        }
    }

    /// Enter the terminal state.
    pub fn close(&mut self) {
        self.state = SessionState::Disconnected;
    }

    /// Record inbound activity.
    pub fn touch(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Elapsed time if a deadline has passed, `None` otherwise.
    ///
    /// Before admission the deadline runs from accept, so a client cannot
    /// stay unadmitted forever by sending Pings.
    pub fn check_timeout(&self, now: I) -> Option<Duration> {
        let (since, timeout) = match self.state {
            SessionState::Connecting | SessionState::Authenticating => {
                (self.accepted_at, self.config.handshake_timeout)
            },
            SessionState::Active => (self.last_activity, self.config.idle_timeout),
            SessionState::Disconnected => return None,
        };

        let elapsed = now - since;
        (elapsed > timeout).then_some(elapsed)
    }

    /// Periodic maintenance: timeouts and heartbeats.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        if let Some(elapsed) = self.check_timeout(now) {
            let reason = match self.state {
                SessionState::Active => format!("idle timeout after {elapsed:?}"),
                _ => format!("handshake timeout after {elapsed:?}"),
            };
            self.close();
            return vec![SessionAction::Close { reason }];
        }

        if self.state != SessionState::Active {
            return Vec::new();
        }

        let due = self
            .last_heartbeat
            .is_none_or(|last| now - last >= self.config.heartbeat_interval);
        if !due {
            return Vec::new();
        }

        self.last_heartbeat = Some(now);
        vec![SessionAction::SendFrame(Frame::new(FrameHeader::new(Opcode::Ping), Vec::new()))]
    }

    /// Handle a session-layer frame (`Ping`, `Pong`, `Goodbye`).
    ///
    /// Keepalives are only meaningful once active; `Goodbye` is accepted in
    /// any live state.
    pub fn handle_control(
        &mut self,
        payload: &Payload,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        self.touch(now);

        match (self.state, payload) {
            (SessionState::Active, Payload::Ping) => Ok(vec![SessionAction::SendFrame(
                Frame::new(FrameHeader::new(Opcode::Pong), Vec::new()),
            )]),
            (SessionState::Active, Payload::Pong) => Ok(Vec::new()),
            (state, Payload::Goodbye(goodbye)) if state != SessionState::Disconnected => {
                self.close();

                let ack = Payload::Goodbye(Goodbye { reason: "ack".to_string() });
                let mut actions = Vec::with_capacity(2);
                if let Ok(frame) = ack.to_frame() {
                    actions.push(SessionAction::SendFrame(frame));
                }
                actions.push(SessionAction::Close {
                    reason: format!("peer goodbye: {}", goodbye.reason),
                });
                Ok(actions)
            },
            (state, other) => {
                Err(SessionError::UnexpectedFrame { state, opcode: other.opcode().to_u16() })
            },
        }
    }
}
