//! Native shell: runs the core on a tokio task and executes its effects.
//!
//! User intents and every effect outcome (HTTP results, push frames, timer
//! expiries) go through one unbounded channel into one task that owns the
//! crux [`Core`]. Nothing else touches it, so updates never interleave.

mod native;

pub use native::{ReqwestExecutor, TungsteniteConnector};

use async_trait::async_trait;
use crux_core::{Core, Request};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::app::App;
use crate::capabilities::{
    Capabilities, Effect, HttpError, HttpRequest, HttpResult, PushError, PushOperation, PushOutput,
    TimerOperation, TimerOutput,
};
use crate::config::{Config, ConfigError};
use crate::event::{ConnectionId, Event, TimerId};
use crate::model::{IdeaId, ViewModel};

#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> HttpResult;
}

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>, PushError>;
}

#[async_trait]
pub trait PushConnection: Send {
    /// Next inbound text frame. `None` once the remote end has closed.
    async fn next_frame(&mut self) -> Option<Result<String, PushError>>;

    async fn close(&mut self);
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShellError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not build HTTP client: {0}")]
    Client(HttpError),

    #[error("idea board runtime has stopped")]
    Stopped,
}

enum Command {
    Dispatch(Event),
    HttpDone { key: u64, result: Box<HttpResult> },
    Push { connection: ConnectionId, output: PushOutput },
    TimerElapsed(TimerId),
    Shutdown,
}

/// Handle to a running board. Dropping it tears the board down.
pub struct IdeaBoard {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ViewModel>,
    task: Option<JoinHandle<()>>,
}

impl IdeaBoard {
    /// Starts a board that talks to the network with reqwest and
    /// tokio-tungstenite. Must be called from within a tokio runtime.
    pub fn spawn(config: Config) -> Result<Self, ShellError> {
        let http = ReqwestExecutor::new().map_err(ShellError::Client)?;
        Self::spawn_with(config, Arc::new(http), Arc::new(TungsteniteConnector::default()))
    }

    #[instrument(skip_all, fields(base_url = %config.api_base_url))]
    pub fn spawn_with(
        config: Config,
        http: Arc<dyn HttpExecutor>,
        push: Arc<dyn PushConnector>,
    ) -> Result<Self, ShellError> {
        config.validate()?;

        let core = Core::<Effect, App>::new::<Capabilities>();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(core.view());

        let mut runtime = Runtime {
            core,
            commands: commands_rx,
            sender: commands_tx.clone(),
            view: view_tx,
            http,
            push,
            requests: JoinSet::new(),
            pending_http: HashMap::new(),
            next_request: 0,
            connections: HashMap::new(),
            timers: HashMap::new(),
        };
        runtime.dispatch(Event::Configure {
            config: Box::new(config),
        });

        info!("starting idea board runtime");
        let task = tokio::spawn(runtime.run());

        Ok(Self {
            commands: commands_tx,
            view: view_rx,
            task: Some(task),
        })
    }

    pub fn activate(&self) -> Result<(), ShellError> {
        self.dispatch(Event::Activate)
    }

    pub fn teardown(&self) -> Result<(), ShellError> {
        self.dispatch(Event::Teardown)
    }

    pub fn update_draft(&self, text: impl Into<String>) -> Result<(), ShellError> {
        self.dispatch(Event::DraftChanged { text: text.into() })
    }

    pub fn submit(&self) -> Result<(), ShellError> {
        self.dispatch(Event::SubmitRequested)
    }

    pub fn upvote(&self, id: IdeaId) -> Result<(), ShellError> {
        self.dispatch(Event::UpvoteRequested { id })
    }

    /// The latest rendered view.
    #[must_use]
    pub fn view(&self) -> ViewModel {
        self.view.borrow().clone()
    }

    /// Receiver that wakes on every render.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.view.clone()
    }

    /// Tears down and waits for the runtime task to finish.
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "idea board runtime ended abnormally");
            }
        }
    }

    fn dispatch(&self, event: Event) -> Result<(), ShellError> {
        self.commands
            .send(Command::Dispatch(event))
            .map_err(|_| ShellError::Stopped)
    }
}

impl Drop for IdeaBoard {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct LiveConnection {
    /// Streaming request the core is listening on.
    stream: Request<PushOperation>,
    close: oneshot::Sender<()>,
}

struct PendingTimer {
    handle: JoinHandle<()>,
    request: Request<TimerOperation>,
}

/// Every request the core is waiting on is held here until it is resolved
/// exactly once, including ones that are cancelled.
struct Runtime {
    core: Core<Effect, App>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Handed to spawned work so results come back through `commands`.
    sender: mpsc::UnboundedSender<Command>,
    view: watch::Sender<ViewModel>,

    http: Arc<dyn HttpExecutor>,
    push: Arc<dyn PushConnector>,

    requests: JoinSet<()>,
    pending_http: HashMap<u64, Request<HttpRequest>>,
    next_request: u64,
    connections: HashMap<ConnectionId, LiveConnection>,
    timers: HashMap<TimerId, PendingTimer>,
}

impl Runtime {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Dispatch(event)) => self.dispatch(event),
                    Some(Command::HttpDone { key, result }) => self.http_done(key, *result),
                    Some(Command::Push { connection, output }) => self.push_output(connection, output),
                    Some(Command::TimerElapsed(timer)) => self.timer_elapsed(timer),
                    Some(Command::Shutdown) | None => {
                        self.dispatch(Event::Teardown);
                        break;
                    }
                },
                Some(joined) = self.requests.join_next(), if !self.requests.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "request task panicked");
                        }
                    }
                }
            }
        }

        self.requests.abort_all();
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        // Dropping the close senders ends any connection tasks still running.
        self.connections.clear();
        info!("idea board runtime stopped");
    }

    #[instrument(level = "trace", skip_all, fields(event = event.name()))]
    fn dispatch(&mut self, event: Event) {
        let tearing_down = matches!(event, Event::Teardown);

        let effects = self.core.process_event(event);
        self.process(effects);

        if tearing_down {
            self.cancel_requests();
        }
    }

    /// Runs effects until none are left. Resolving a request can produce
    /// more, so they are worked through in order.
    fn process(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        while let Some(effect) = queue.pop_front() {
            queue.extend(self.execute(effect));
        }
    }

    fn execute(&mut self, effect: Effect) -> Vec<Effect> {
        match effect {
            Effect::Render(_) => {
                self.view.send_replace(self.core.view());
                Vec::new()
            }
            Effect::Http(request) => {
                self.spawn_request(request);
                Vec::new()
            }
            Effect::Push(request) => match request.operation.clone() {
                PushOperation::Open { connection, url } => {
                    self.open_connection(connection, url, request);
                    Vec::new()
                }
                PushOperation::Close { connection } => self.close_connection(connection),
            },
            Effect::Timer(request) => match request.operation {
                TimerOperation::After { timer, delay_ms } => {
                    let sender = self.sender.clone();
                    let handle = tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        let _ = sender.send(Command::TimerElapsed(timer));
                    });
                    self.timers.insert(timer, PendingTimer { handle, request });
                    Vec::new()
                }
                TimerOperation::Cancel { timer } => match self.timers.remove(&timer) {
                    Some(mut pending) => {
                        pending.handle.abort();
                        self.core.resolve(&mut pending.request, TimerOutput::Cancelled)
                    }
                    None => Vec::new(),
                },
            },
        }
    }

    fn spawn_request(&mut self, request: Request<HttpRequest>) {
        let key = self.next_request;
        self.next_request += 1;

        let operation = request.operation.clone();
        self.pending_http.insert(key, request);

        let http = Arc::clone(&self.http);
        let sender = self.sender.clone();

        debug!(request_id = operation.request_id(), url = operation.url().as_str(), "executing request");
        self.requests.spawn(async move {
            let result = http.execute(operation).await;
            let _ = sender.send(Command::HttpDone {
                key,
                result: Box::new(result),
            });
        });
    }

    fn http_done(&mut self, key: u64, result: HttpResult) {
        let Some(mut request) = self.pending_http.remove(&key) else {
            debug!(key, "dropping result of cancelled request");
            return;
        };
        let effects = self.core.resolve(&mut request, result);
        self.process(effects);
    }

    /// Aborts in-flight requests and answers each one with
    /// [`HttpError::Cancelled`].
    fn cancel_requests(&mut self) {
        if self.pending_http.is_empty() {
            return;
        }
        self.requests.abort_all();

        let pending: Vec<_> = self.pending_http.drain().map(|(_, request)| request).collect();
        debug!(count = pending.len(), "cancelling in-flight requests");
        for mut request in pending {
            let request_id = request.operation.request_id().to_string();
            let effects = self
                .core
                .resolve(&mut request, Err(HttpError::Cancelled { request_id }));
            self.process(effects);
        }
    }

    fn open_connection(
        &mut self,
        connection: ConnectionId,
        url: String,
        stream: Request<PushOperation>,
    ) {
        let (close_tx, close_rx) = oneshot::channel();
        self.connections.insert(
            connection,
            LiveConnection {
                stream,
                close: close_tx,
            },
        );

        debug!(%connection, %url, "opening push connection");
        tokio::spawn(drive_connection(
            Arc::clone(&self.push),
            connection,
            url,
            close_rx,
            self.sender.clone(),
        ));
    }

    fn close_connection(&mut self, connection: ConnectionId) -> Vec<Effect> {
        let Some(mut live) = self.connections.remove(&connection) else {
            return Vec::new();
        };
        let _ = live.close.send(());
        self.core.resolve(&mut live.stream, PushOutput::Closed)
    }

    fn push_output(&mut self, connection: ConnectionId, output: PushOutput) {
        let effects = if output.is_terminal() {
            match self.connections.remove(&connection) {
                Some(mut live) => self.core.resolve(&mut live.stream, output),
                None => return,
            }
        } else {
            match self.connections.get_mut(&connection) {
                Some(live) => self.core.resolve(&mut live.stream, output),
                None => return,
            }
        };
        self.process(effects);
    }

    fn timer_elapsed(&mut self, timer: TimerId) {
        let Some(mut pending) = self.timers.remove(&timer) else {
            return;
        };
        let effects = self.core.resolve(&mut pending.request, TimerOutput::Fired);
        self.process(effects);
    }
}

/// Owns one push connection from dial to close, forwarding what happens on
/// it as [`PushOutput`]s. Stops as soon as `close` fires or its sender is
/// dropped.
#[instrument(skip_all, fields(%connection, %url))]
async fn drive_connection(
    connector: Arc<dyn PushConnector>,
    connection: ConnectionId,
    url: String,
    mut close: oneshot::Receiver<()>,
    sender: mpsc::UnboundedSender<Command>,
) {
    let report = |output: PushOutput| sender.send(Command::Push { connection, output }).is_ok();

    let mut socket = tokio::select! {
        _ = &mut close => return,
        result = connector.connect(&url) => match result {
            Ok(socket) => socket,
            Err(e) => {
                report(PushOutput::Failed(e));
                return;
            }
        },
    };

    if !report(PushOutput::Opened) {
        socket.close().await;
        return;
    }

    loop {
        tokio::select! {
            _ = &mut close => break,
            frame = socket.next_frame() => match frame {
                Some(Ok(text)) => {
                    if !report(PushOutput::Message(text)) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    report(PushOutput::Failed(e));
                    return;
                }
                None => {
                    report(PushOutput::Closed);
                    return;
                }
            },
        }
    }

    debug!(%connection, "closing push socket");
    socket.close().await;
}
