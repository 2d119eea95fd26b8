#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod api;
pub mod capabilities;
pub mod config;
pub mod event;
pub mod model;
pub mod push_channel;
#[cfg(not(target_arch = "wasm32"))]
pub mod shell;

use serde::{Deserialize, Serialize};

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::{Config, ConfigError};
pub use event::Event;
pub use model::{Idea, IdeaId, IdeaList, Model, ViewModel};
pub use push_channel::ConnectionState;
#[cfg(not(target_arch = "wasm32"))]
pub use shell::{IdeaBoard, ShellError};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:4000";
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
/// Enforced by the input surface, reported through the view.
pub const MAX_IDEA_LENGTH: usize = 280;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    FetchFailed,
    SubmitFailed,
    UpvoteFailed,
    ChannelExhausted,
    /// Absorbed by the push channel; never shown.
    MessageMalformed,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::FetchFailed => "FETCH_FAILED",
            Self::SubmitFailed => "SUBMIT_FAILED",
            Self::UpvoteFailed => "UPVOTE_FAILED",
            Self::ChannelExhausted => "CHANNEL_EXHAUSTED",
            Self::MessageMalformed => "MESSAGE_MALFORMED",
        }
    }

    #[must_use]
    pub const fn is_surfaced(self) -> bool {
        !matches!(self, Self::MessageMalformed)
    }

    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::FetchFailed => "could not load ideas",
            Self::SubmitFailed => "could not submit idea",
            Self::UpvoteFailed => "could not upvote idea",
            Self::ChannelExhausted => "live updates unavailable",
            Self::MessageMalformed => "malformed push message",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// The one string the presentation layer shows. Internal detail never
    /// leaks into it.
    #[must_use]
    pub fn user_facing_message(&self) -> Option<String> {
        self.kind.is_surfaced().then(|| self.message.clone())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub mod app {
    use tracing::{debug, info, trace, warn};

    use super::*;
    use crate::api::{ApiCall, ApiReply, IdeaApi, RequestFailed};
    use crate::capabilities::{Capabilities, HttpRequest, HttpResult, PushOutput};
    use crate::event::{ConnectionId, SessionId, TimerId};
    use crate::push_channel::ChannelAction;

    /// The state reconciler. Stateless itself; everything lives in [`Model`].
    #[derive(Default)]
    pub struct App;

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let event_name = event.name();
            if event.is_user_initiated() {
                debug!(event = event_name, "user intent");
            } else {
                trace!(event = event_name, "event");
            }

            match event {
                Event::Configure { config } => Self::configure(*config, model),

                Event::Activate => Self::activate(model, caps),
                Event::Teardown => Self::teardown(model, caps),

                Event::DraftChanged { text } => {
                    if !model.is_active() {
                        return;
                    }
                    model.draft_text = text;
                    caps.render.render();
                }

                Event::SubmitRequested => Self::submit(model, caps),
                Event::UpvoteRequested { id } => Self::upvote(id, model, caps),

                Event::SnapshotReceived { ideas } => {
                    if Self::apply_snapshot(ideas, model) {
                        caps.render.render();
                    }
                }

                Event::HttpResult {
                    session,
                    call,
                    result,
                } => Self::handle_response(session, call, *result, model, caps),

                Event::PushResult { connection, output } => {
                    Self::handle_push(connection, *output, model, caps);
                }

                Event::TimerFired { timer } => Self::handle_timer(timer, model, caps),
            }
        }

        fn view(&self, model: &Model) -> ViewModel {
            let draft_length = model.draft_text.chars().count();

            ViewModel {
                ideas: model.ideas.as_slice().to_vec(),
                loading: model.loading,
                error_message: model
                    .active_error
                    .as_ref()
                    .and_then(AppError::user_facing_message),
                draft_text: model.draft_text.clone(),
                draft_length,
                max_length: MAX_IDEA_LENGTH,
                can_submit: model.is_active() && !model.draft_text.trim().is_empty(),
                is_empty: !model.loading && model.ideas.is_empty(),
                connection: model.channel.state(),
            }
        }
    }

    impl App {
        fn configure(config: Config, model: &mut Model) {
            match config.validate() {
                Ok(()) => {
                    debug!(base_url = %config.api_base_url, "config applied");
                    model.config = config;
                }
                Err(e) => warn!(error = %e, "rejecting invalid config"),
            }
        }

        fn activate(model: &mut Model, caps: &Capabilities) {
            if model.is_active() {
                debug!("board already active, ignoring activate");
                return;
            }

            let api = match IdeaApi::from_config(&model.config) {
                Ok(api) => api,
                Err(e) => {
                    warn!(error = %e, "cannot activate with this config");
                    model.set_error(
                        AppError::from_kind(ErrorKind::FetchFailed).with_internal(e.to_string()),
                    );
                    caps.render.render();
                    return;
                }
            };

            let session = model.begin_session(api.clone());
            model.loading = true;
            model.clear_error();

            match api.fetch_ideas() {
                Ok(request) => Self::send(session, ApiCall::FetchIdeas, request, caps),
                Err(e) => Self::request_failed(model, &e),
            }

            let actions = model
                .channel
                .start(api.push_url(), model.config.reconnect_policy());
            Self::run_channel(actions, model, caps);

            info!(%session, base_url = %api.base_url(), "board activated");
            caps.render.render();
        }

        fn teardown(model: &mut Model, caps: &Capabilities) {
            let Some(session) = model.session.as_ref().map(|s| s.id) else {
                debug!("board not active, ignoring teardown");
                return;
            };

            let actions = model.channel.stop();
            Self::run_channel(actions, model, caps);
            model.end_session();

            info!(%session, "board torn down");
            caps.render.render();
        }

        fn submit(model: &mut Model, caps: &Capabilities) {
            let Some(current) = model.session.as_ref() else {
                return;
            };
            if model.draft_text.trim().is_empty() {
                debug!("ignoring submit of blank draft");
                return;
            }

            let session = current.id;
            let request = current.api.create_idea(&model.draft_text);

            model.clear_error();
            match request {
                Ok(request) => Self::send(session, ApiCall::CreateIdea, request, caps),
                Err(e) => Self::request_failed(model, &e),
            }
            caps.render.render();
        }

        fn upvote(id: IdeaId, model: &mut Model, caps: &Capabilities) {
            let Some(current) = model.session.as_ref() else {
                return;
            };

            let session = current.id;
            let request = current.api.upvote_idea(id);

            model.clear_error();
            match request {
                Ok(request) => Self::send(session, ApiCall::UpvoteIdea(id), request, caps),
                Err(e) => Self::request_failed(model, &e),
            }
            caps.render.render();
        }

        fn send(session: SessionId, call: ApiCall, request: HttpRequest, caps: &Capabilities) {
            debug!(%session, %call, request_id = request.request_id(), "sending request");
            caps.http.send(request, move |result| Event::HttpResult {
                session,
                call,
                result: Box::new(result),
            });
        }

        /// Full replacement, last write wins. Loading, error and draft are
        /// left alone.
        fn apply_snapshot(ideas: Vec<Idea>, model: &mut Model) -> bool {
            if !model.is_active() {
                return false;
            }
            debug!(count = ideas.len(), "applying push snapshot");
            model.ideas.replace(ideas);
            true
        }

        fn handle_response(
            session: SessionId,
            call: ApiCall,
            result: HttpResult,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            if !model.is_current(session) {
                debug!(%session, %call, "dropping response from ended session");
                return;
            }

            match call.decode(result) {
                Ok(reply) => Self::apply_reply(reply, model),
                Err(e) => Self::request_failed(model, &e),
            }
            caps.render.render();
        }

        fn apply_reply(reply: ApiReply, model: &mut Model) {
            match reply {
                ApiReply::Ideas(ideas) => {
                    info!(count = ideas.len(), "ideas loaded");
                    model.loading = false;
                    model.ideas.replace(ideas);
                }
                ApiReply::Created(idea) => {
                    info!(id = %idea.id, "idea created");
                    model.ideas.prepend(idea);
                    model.draft_text.clear();
                }
                ApiReply::Upvoted { requested, idea } => {
                    let id = idea.id;
                    if id != requested {
                        // Never let it overwrite an unrelated entry.
                        warn!(%requested, returned = %id, "upvote reply names another idea, ignoring");
                    } else if model.ideas.replace_entry(idea) {
                        debug!(%id, "idea upvoted");
                    } else {
                        debug!(%id, "upvoted idea is no longer listed");
                    }
                }
            }
        }

        fn request_failed(model: &mut Model, error: &RequestFailed) {
            let kind = match error.call() {
                ApiCall::FetchIdeas => {
                    model.loading = false;
                    ErrorKind::FetchFailed
                }
                ApiCall::CreateIdea => ErrorKind::SubmitFailed,
                ApiCall::UpvoteIdea(_) => ErrorKind::UpvoteFailed,
            };

            warn!(code = kind.code(), error = %error, "request failed");
            model.set_error(AppError::from_kind(kind).with_internal(error.to_string()));
        }

        fn handle_push(
            connection: ConnectionId,
            output: PushOutput,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let before = model.channel.state();
            let actions = model.channel.handle(connection, output);
            let changed = Self::run_channel(actions, model, caps);

            if changed || model.channel.state() != before {
                caps.render.render();
            }
        }

        fn handle_timer(timer: TimerId, model: &mut Model, caps: &Capabilities) {
            let before = model.channel.state();
            let actions = model.channel.handle_timer(timer);
            Self::run_channel(actions, model, caps);

            if model.channel.state() != before {
                caps.render.render();
            }
        }

        /// Carries out what the push channel asked for. Returns true when the
        /// model changed in a way the view shows.
        fn run_channel(actions: Vec<ChannelAction>, model: &mut Model, caps: &Capabilities) -> bool {
            let mut changed = false;

            for action in actions {
                match action {
                    ChannelAction::Open { connection, url } => {
                        caps.push.open(connection, url, move |output| Event::PushResult {
                            connection,
                            output: Box::new(output),
                        });
                    }
                    ChannelAction::Close { connection } => caps.push.close(connection),
                    ChannelAction::ScheduleReconnect { timer, delay_ms } => {
                        caps.timer.after(timer, delay_ms, move || Event::TimerFired { timer });
                    }
                    ChannelAction::CancelReconnect { timer } => caps.timer.cancel(timer),
                    ChannelAction::Snapshot(ideas) => {
                        changed |= Self::apply_snapshot(ideas, model);
                    }
                    ChannelAction::Exhausted {
                        attempts,
                        last_error,
                    } => {
                        model.set_error(
                            AppError::from_kind(ErrorKind::ChannelExhausted).with_internal(
                                format!("gave up after {attempts} reconnects: {last_error}"),
                            ),
                        );
                        changed = true;
                    }
                }
            }

            changed
        }
    }
}
