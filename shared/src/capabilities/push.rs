use crux_core::capability::{Capability, CapabilityContext, Operation};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::pin;
use thiserror::Error;

use crate::event::ConnectionId;

/// Requests the core makes of the shell's push transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", content = "data")]
pub enum PushOperation {
    /// Dial `url` and stream what happens on it back as [`PushOutput`]s.
    Open { connection: ConnectionId, url: String },
    /// Close `connection`. Its open stream is finished with
    /// [`PushOutput::Closed`].
    Close { connection: ConnectionId },
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushError {
    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("push transport error: {message}")]
    Transport { message: String },

    #[error("operation timed out")]
    Timeout,
}

impl PushError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// What the shell reports back for an open push connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum PushOutput {
    Opened,
    /// One inbound text frame, unparsed.
    Message(String),
    /// The connection ended without an error.
    Closed,
    Failed(PushError),
}

impl PushOutput {
    /// The connection is gone after this output.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

impl Operation for PushOperation {
    type Output = PushOutput;
}

pub struct Push<Ev> {
    context: CapabilityContext<PushOperation, Ev>,
}

impl<Ev> Capability<Ev> for Push<Ev> {
    type Operation = PushOperation;
    type MappedSelf<MappedEv> = Push<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Push::new(self.context.map_event(f))
    }
}

impl<Ev> Push<Ev> {
    pub fn new(context: CapabilityContext<PushOperation, Ev>) -> Self {
        Self { context }
    }
}

impl<Ev> Push<Ev>
where
    Ev: Send + 'static,
{
    /// Opens `connection` and forwards every output the shell streams for
    /// it, up to and including the terminal one.
    pub fn open<F>(&self, connection: ConnectionId, url: String, callback: F)
    where
        F: Fn(PushOutput) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let mut outputs = pin!(context.stream_from_shell(PushOperation::Open { connection, url }));
            while let Some(output) = outputs.next().await {
                let terminal = output.is_terminal();
                context.update_app(callback(output));
                if terminal {
                    break;
                }
            }
        });
    }

    pub fn close(&self, connection: ConnectionId) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(PushOperation::Close { connection })
                .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_terminal() {
        assert!(!PushOutput::Opened.is_terminal());
        assert!(!PushOutput::Message("{}".into()).is_terminal());
        assert!(PushOutput::Closed.is_terminal());
        assert!(PushOutput::Failed(PushError::Timeout).is_terminal());
    }

    #[test]
    fn test_operation_serialization() {
        let op = PushOperation::Open {
            connection: ConnectionId(1),
            url: "ws://localhost:4000/".into(),
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""op":"Open""#));
        let deserialized: PushOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, deserialized);
    }

    #[test]
    fn test_output_wire_shape() {
        let json = serde_json::to_value(PushOutput::Message("hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Message", "data": "hi"}));
        let closed: PushOutput = serde_json::from_str(r#"{"type":"Closed"}"#).unwrap();
        assert_eq!(closed, PushOutput::Closed);
    }
}
