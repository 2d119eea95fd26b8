use serde::{Deserialize, Serialize};
use std::fmt;

use crate::api::ApiCall;
use crate::capabilities::{HttpResult, PushOutput};
use crate::config::Config;
use crate::model::{Idea, IdeaId};

// --- Typed sequence IDs ---

macro_rules! sequence_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            #[must_use]
            pub const fn next(self) -> Self {
                Self(self.0.wrapping_add(1))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }
    };
}

// One per activate(); responses from an older session are stale.
sequence_id!(SessionId, "session");
// One per push connection attempt.
sequence_id!(ConnectionId, "conn");
// One per scheduled reconnect.
sequence_id!(TimerId, "timer");

// --- Event enum: large variants boxed ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Event {
    /// Sent by the shell before anything else. Takes effect on the next
    /// activate.
    Configure {
        config: Box<Config>,
    },

    // Presentation intents
    Activate,
    Teardown,
    DraftChanged {
        text: String,
    },
    SubmitRequested,
    UpvoteRequested {
        id: IdeaId,
    },

    // Full list replacement from the push channel
    SnapshotReceived {
        ideas: Vec<Idea>,
    },

    // Capability responses
    HttpResult {
        session: SessionId,
        call: ApiCall,
        result: Box<HttpResult>,
    },
    PushResult {
        connection: ConnectionId,
        output: Box<PushOutput>,
    },
    TimerFired {
        timer: TimerId,
    },
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Configure { .. } => "configure",
            Self::Activate => "activate",
            Self::Teardown => "teardown",
            Self::DraftChanged { .. } => "draft_changed",
            Self::SubmitRequested => "submit_requested",
            Self::UpvoteRequested { .. } => "upvote_requested",
            Self::SnapshotReceived { .. } => "snapshot_received",
            Self::HttpResult { .. } => "http_result",
            Self::PushResult { .. } => "push_result",
            Self::TimerFired { .. } => "timer_fired",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::Activate
                | Self::Teardown
                | Self::DraftChanged { .. }
                | Self::SubmitRequested
                | Self::UpvoteRequested { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ids_advance() {
        let first = SessionId::default();
        assert_eq!(first.next(), SessionId(1));
        assert_eq!(ConnectionId(u64::MAX).next(), ConnectionId(0));
        assert_eq!(TimerId(4).to_string(), "timer-4");
    }

    #[test]
    fn user_intents_are_flagged() {
        assert!(Event::SubmitRequested.is_user_initiated());
        assert!(Event::UpvoteRequested { id: IdeaId(1) }.is_user_initiated());
        assert!(!Event::TimerFired { timer: TimerId(1) }.is_user_initiated());
        assert!(!Event::SnapshotReceived { ideas: vec![] }.is_user_initiated());
        assert!(!Event::Configure {
            config: Box::default()
        }
        .is_user_initiated());
    }

    #[test]
    fn event_size_is_reasonable() {
        // Boxing the capability outputs keeps the enum small.
        let size = std::mem::size_of::<Event>();
        assert!(
            size <= 64,
            "Event enum is {} bytes, box more variants",
            size
        );
    }
}
