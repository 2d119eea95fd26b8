//! Push channel manager.
//!
//! Owns the single live push connection and its reconnect schedule. The
//! manager performs no I/O and never touches the idea list: every step
//! returns the [`ChannelAction`]s its owner should carry out, parsed
//! snapshots included.
//!
//! ```text
//! Disconnected --start--> Connecting --Opened--> Connected
//!      ^                      |                      |
//!      +------ failure -------+------ failure -------+
//!      |  (retry_count < max: schedule reconnect, else Exhausted)
//!      +------ stop (no retry) ----------------------+
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capabilities::PushOutput;
use crate::event::{ConnectionId, TimerId};
use crate::model::Idea;

pub const IDEAS_MESSAGE_KIND: &str = "ideas";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Gave up after the retry budget ran out. Only a new `start` leaves it.
    Exhausted,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            delay_ms: crate::DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

/// What the channel needs its owner to do. Transport actions map onto the
/// push and timer capabilities; the rest are for the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelAction {
    Open { connection: ConnectionId, url: String },
    Close { connection: ConnectionId },
    ScheduleReconnect { timer: TimerId, delay_ms: u64 },
    CancelReconnect { timer: TimerId },
    Snapshot(Vec<Idea>),
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Clone, Debug, Default)]
pub struct PushChannel {
    state: ConnectionState,
    retry_count: u32,
    policy: ReconnectPolicy,
    url: String,

    current: Option<ConnectionId>,
    last_connection: ConnectionId,
    pending_timer: Option<TimerId>,
    last_timer: TimerId,
}

impl PushChannel {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    /// Begins connecting to `url`. Anything left from a previous run is
    /// closed first.
    pub fn start(&mut self, url: impl Into<String>, policy: ReconnectPolicy) -> Vec<ChannelAction> {
        let mut actions = self.stop();

        self.url = url.into();
        self.policy = policy;
        self.retry_count = 0;
        actions.push(self.open());
        actions
    }

    /// Closes the live connection and cancels a pending reconnect. Never
    /// schedules a retry.
    pub fn stop(&mut self) -> Vec<ChannelAction> {
        let mut actions = Vec::new();
        if let Some(connection) = self.current.take() {
            info!(%connection, "closing push connection");
            actions.push(ChannelAction::Close { connection });
        }
        if let Some(timer) = self.pending_timer.take() {
            debug!(%timer, "cancelling pending reconnect");
            actions.push(ChannelAction::CancelReconnect { timer });
        }
        self.state = ConnectionState::Disconnected;
        self.retry_count = 0;
        actions
    }

    pub fn handle(&mut self, connection: ConnectionId, output: PushOutput) -> Vec<ChannelAction> {
        if self.current != Some(connection) {
            if output == PushOutput::Opened {
                // A superseded dial finished late; it must not stay open.
                debug!(%connection, "closing superseded push connection");
                return vec![ChannelAction::Close { connection }];
            }
            debug!(%connection, "ignoring output from stale push connection");
            return Vec::new();
        }

        match output {
            PushOutput::Opened => {
                info!(%connection, url = %self.url, "push channel connected");
                self.state = ConnectionState::Connected;
                self.retry_count = 0;
                Vec::new()
            }
            PushOutput::Message(text) => match PushMessage::parse(&text) {
                Ok(PushMessage::Ideas(ideas)) => vec![ChannelAction::Snapshot(ideas)],
                Err(e) => {
                    debug!(%connection, error = %e, "discarding push message");
                    Vec::new()
                }
            },
            PushOutput::Closed => vec![self.fail(connection, "closed by remote".to_string())],
            PushOutput::Failed(e) => vec![self.fail(connection, e.to_string())],
        }
    }

    /// Reconnects if `timer` is the pending one; stale timers yield nothing.
    pub fn handle_timer(&mut self, timer: TimerId) -> Vec<ChannelAction> {
        if self.pending_timer != Some(timer) {
            debug!(%timer, "ignoring stale reconnect timer");
            return Vec::new();
        }
        self.pending_timer = None;

        info!(attempt = self.retry_count, "reconnecting push channel");
        vec![self.open()]
    }

    fn open(&mut self) -> ChannelAction {
        let connection = self.last_connection.next();
        self.last_connection = connection;
        self.current = Some(connection);
        self.state = ConnectionState::Connecting;

        ChannelAction::Open {
            connection,
            url: self.url.clone(),
        }
    }

    fn fail(&mut self, connection: ConnectionId, reason: String) -> ChannelAction {
        self.current = None;
        self.state = ConnectionState::Disconnected;

        if self.retry_count < self.policy.max_attempts {
            self.retry_count += 1;

            let timer = self.last_timer.next();
            self.last_timer = timer;
            self.pending_timer = Some(timer);

            warn!(
                %connection,
                %reason,
                attempt = self.retry_count,
                max = self.policy.max_attempts,
                delay_ms = self.policy.delay_ms,
                "push connection failed, scheduling reconnect"
            );
            return ChannelAction::ScheduleReconnect {
                timer,
                delay_ms: self.policy.delay_ms,
            };
        }

        warn!(
            %connection,
            %reason,
            attempts = self.retry_count,
            "push connection failed, giving up"
        );
        self.state = ConnectionState::Exhausted;
        ChannelAction::Exhausted {
            attempts: self.retry_count,
            last_error: reason,
        }
    }
}

/// A recognised inbound push message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushMessage {
    Ideas(Vec<Idea>),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PushMessageError {
    #[error("malformed push message: {0}")]
    Malformed(String),

    #[error("unrecognized push message kind '{0}'")]
    UnknownKind(String),

    #[error("'{kind}' payload is not a list of ideas: {reason}")]
    BadPayload { kind: String, reason: String },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushMessage {
    /// Parses a `{type, data}` text frame. Only `type == "ideas"` with an
    /// array of ideas is recognised; one bad element rejects the whole frame.
    pub fn parse(text: &str) -> Result<Self, PushMessageError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| PushMessageError::Malformed(e.to_string()))?;

        if envelope.kind != IDEAS_MESSAGE_KIND {
            return Err(PushMessageError::UnknownKind(envelope.kind));
        }

        if !envelope.data.is_array() {
            return Err(PushMessageError::BadPayload {
                kind: envelope.kind,
                reason: "expected an array".to_string(),
            });
        }

        serde_json::from_value(envelope.data)
            .map(PushMessage::Ideas)
            .map_err(|e| PushMessageError::BadPayload {
                kind: envelope.kind,
                reason: e.to_string(),
            })
    }
}
