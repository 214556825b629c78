//! Session lifecycle.
//!
//! A session is one run of: bind the listen address, create a fresh CSV log, ingest frames
//! until stopped. [`SessionController`] owns that lifecycle in a single task and is driven
//! through a cloneable [`SessionHandle`] (see [`crate::messages`] for the command protocol).
//!
//! ```text
//!            start ok                    stop / listener failure
//!   Idle ──▶ Starting ──────▶ Running ──▶ Stopping ──▶ Idle
//!              │ AddressParse | Bind | Start
//!              └──────────────────────────────────────▶ Idle
//! ```
//!
//! The current [`SessionState`] is published on a `watch` channel so any number of observers
//! can follow transitions without going through the controller.
//!
//! The ring buffers, the dispatcher and the counters outlive individual sessions. The
//! dispatcher's cadence task runs for the controller's whole life.

use crate::config::Settings;
use crate::data::{ChannelStore, CsvLogger};
use crate::dispatch::{Dispatcher, SubscriptionId};
use crate::error::{AppResult, DaqError};
use crate::frame::{Channel, Frame, CHANNEL_COUNT};
use crate::listener::{IngestOutcome, Listener, ListenerExit, Pipeline};
use crate::messages::{SessionCommand, SessionSummary};
use crate::stats::{IngestStats, StatsSnapshot};
use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// No socket, no log.
    Idle,
    /// Binding and creating the log.
    Starting,
    /// Accepting and ingesting.
    Running,
    /// Tearing down.
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

struct ActiveSession {
    local_addr: SocketAddr,
    log_path: PathBuf,
    started: Instant,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<IngestOutcome>,
}

/// The controller task's state. Constructed through [`SessionController::spawn`].
pub struct SessionController {
    settings: Arc<Settings>,
    store: Arc<ChannelStore>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<IngestStats>,
    state_tx: watch::Sender<SessionState>,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Start the controller and its cadence task on the current tokio runtime.
    ///
    /// Settings that fail [`Settings::validate`] are logged; out-of-range values are clamped
    /// where they are used.
    pub fn spawn(settings: Settings) -> SessionHandle {
        if let Err(e) = settings.validate() {
            warn!(error = %e, "Settings failed validation");
        }
        let (controller, handle, command_rx) = Self::new(settings);
        tokio::spawn(controller.run(command_rx));
        handle
    }

    fn new(settings: Settings) -> (Self, SessionHandle, mpsc::Receiver<SessionCommand>) {
        let settings = Arc::new(settings);
        let stats = Arc::new(IngestStats::new());
        let store = Arc::new(ChannelStore::new(settings.buffer.capacity));
        let dispatcher = Arc::new(Dispatcher::new(
            settings.dispatch.queue_capacity,
            Arc::clone(&stats),
        ));

        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (command_tx, command_rx) = mpsc::channel(settings.session.command_capacity.max(1));

        let controller = SessionController {
            settings: Arc::clone(&settings),
            store: Arc::clone(&store),
            dispatcher: Arc::clone(&dispatcher),
            stats: Arc::clone(&stats),
            state_tx,
            active: None,
        };
        let handle = SessionHandle {
            commands: command_tx,
            state: state_rx,
            settings,
            store,
            dispatcher,
            stats,
        };
        (controller, handle, command_rx)
    }

    async fn run(mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        info!("Session controller started");
        let (cadence_tx, cadence_rx) = watch::channel(false);
        let cadence = self
            .dispatcher
            .spawn_cadence(self.settings.dispatch.cadence(), cadence_rx);

        let mut shutdown_response = None;
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown { response }) => {
                            shutdown_response = Some(response);
                            break;
                        }
                        Some(command) => self.handle(command).await,
                        None => break,
                    }
                }
                joined = ingestion_finished(&mut self.active) => {
                    self.on_ingestion_exit(joined);
                }
            }
        }

        let summary = self.stop_session().await;
        let _ = cadence_tx.send(true);
        if let Err(e) = cadence.await {
            error!(error = %e, "Cadence task failed");
        }
        info!("Session controller stopped");
        if let Some(response) = shutdown_response {
            let _ = response.send(summary);
        }
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { address, response } => {
                let result = self.start_session(&address).await;
                let _ = response.send(result);
            }
            SessionCommand::Stop { response } => {
                let summary = self.stop_session().await;
                let _ = response.send(summary);
            }
            SessionCommand::ClearChart { response } => {
                self.store.clear_all();
                info!("Chart history cleared");
                let _ = response.send(());
            }
            SessionCommand::ClearData { response } => {
                let dropped = self.dispatcher.clear();
                self.stats.reset();
                info!(dropped, "Pending frames and counters cleared");
                let _ = response.send(());
            }
            SessionCommand::LocalAddr { response } => {
                let _ = response.send(self.active.as_ref().map(|a| a.local_addr));
            }
            SessionCommand::LogPath { response } => {
                let _ = response.send(self.active.as_ref().map(|a| a.log_path.clone()));
            }
            // Handled by the run loop
            SessionCommand::Shutdown { response } => {
                let _ = response.send(None);
            }
        }
    }

    async fn start_session(&mut self, address: &str) -> AppResult<SocketAddr> {
        if let Some(active) = &self.active {
            info!(address = %active.local_addr, "Session already running");
            return Ok(active.local_addr);
        }

        self.set_state(SessionState::Starting);
        match self.open_session(address).await {
            Ok(active) => {
                let local_addr = active.local_addr;
                info!(address = %local_addr, log = %active.log_path.display(), "Session started");
                self.active = Some(active);
                self.set_state(SessionState::Running);
                Ok(local_addr)
            }
            Err(e) => {
                error!(error = %e, "Failed to start session");
                self.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    async fn open_session(&self, address: &str) -> AppResult<ActiveSession> {
        // Bind before creating the log so a bad address leaves no empty file behind
        let listener = Listener::bind(address, &self.settings.listener).await?;
        let local_addr = listener.local_addr();

        // On failure the listener is dropped here, closing the socket
        let logger = CsvLogger::create(&self.settings.storage, Local::now())?;
        let log_path = logger.path().to_path_buf();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = Pipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.stats),
            Some(logger),
        );
        let task = tokio::spawn(listener.run(pipeline, shutdown_rx));

        Ok(ActiveSession {
            local_addr,
            log_path,
            started: Instant::now(),
            shutdown_tx,
            task,
        })
    }

    async fn stop_session(&mut self) -> Option<SessionSummary> {
        let mut active = self.active.take()?;
        self.set_state(SessionState::Stopping);
        info!(address = %active.local_addr, "Stopping session");

        let _ = active.shutdown_tx.send(true);
        let timeout = self.settings.session.shutdown_timeout();
        let outcome = match tokio::time::timeout(timeout, &mut active.task).await {
            Ok(joined) => Some(joined),
            Err(_) => {
                warn!(?timeout, "Ingestion task did not stop in time, aborting");
                active.task.abort();
                None
            }
        };

        let summary = self.finish(active, outcome);
        self.set_state(SessionState::Idle);
        Some(summary)
    }

    fn on_ingestion_exit(&mut self, joined: Result<IngestOutcome, JoinError>) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.set_state(SessionState::Stopping);
        self.finish(active, Some(joined));
        self.set_state(SessionState::Idle);
    }

    /// Close the log and report. `outcome` is `None` when the task had to be aborted.
    fn finish(
        &self,
        active: ActiveSession,
        outcome: Option<Result<IngestOutcome, JoinError>>,
    ) -> SessionSummary {
        let logger = match outcome {
            Some(Ok(outcome)) => {
                if let ListenerExit::Failed(e) = &outcome.exit {
                    error!(error = %e, "Listener failed, session ended");
                }
                outcome.pipeline.into_logger()
            }
            Some(Err(e)) => {
                error!(error = %e, "Ingestion task panicked");
                None
            }
            None => None,
        };

        let rows_logged = logger.and_then(|logger| match logger.close() {
            Ok(rows) => Some(rows),
            Err(e) => {
                self.stats.add_log_write_errors(1);
                error!(error = %e, "Failed to close session log");
                None
            }
        });

        let summary = SessionSummary {
            local_addr: active.local_addr,
            log_path: active.log_path,
            rows_logged,
            duration: active.started.elapsed(),
            stats: self.stats.snapshot(),
        };
        info!(
            log = %summary.log_path.display(),
            rows = ?summary.rows_logged,
            frames = summary.stats.frames_accepted,
            "Session stopped"
        );
        summary
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }
}

/// Resolves when the running session's ingestion task ends on its own. Never resolves while
/// idle.
async fn ingestion_finished(
    active: &mut Option<ActiveSession>,
) -> Result<IngestOutcome, JoinError> {
    match active {
        Some(session) => (&mut session.task).await,
        None => std::future::pending().await,
    }
}

/// Cloneable front end to a [`SessionController`].
///
/// Lifecycle operations go through the controller; read-only views (history, counters,
/// subscriptions) are served directly from shared state.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    settings: Arc<Settings>,
    store: Arc<ChannelStore>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<IngestStats>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        (command, response): (SessionCommand, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DaqError::SessionClosed)?;
        response.await.map_err(|_| DaqError::SessionClosed)
    }

    /// Begin a session on `address` (`host:port`). Returns the bound address.
    pub async fn start(&self, address: &str) -> AppResult<SocketAddr> {
        self.request(SessionCommand::start(address.to_string()))
            .await?
    }

    /// Stop the running session. A no-op returning `None` when idle.
    pub async fn stop(&self) -> AppResult<Option<SessionSummary>> {
        self.request(SessionCommand::stop()).await
    }

    /// Empty every channel's history. Safe to call in any state, any number of times.
    pub async fn clear_chart(&self) -> AppResult<()> {
        self.request(SessionCommand::clear_chart()).await
    }

    /// Drop undelivered frames and zero the counters.
    pub async fn clear_data(&self) -> AppResult<()> {
        self.request(SessionCommand::clear_data()).await
    }

    /// Bound address of the running session.
    pub async fn local_addr(&self) -> AppResult<Option<SocketAddr>> {
        self.request(SessionCommand::local_addr()).await
    }

    /// Log file of the running session.
    pub async fn log_path(&self) -> AppResult<Option<PathBuf>> {
        self.request(SessionCommand::log_path()).await
    }

    /// Stop any session and end the controller. Other handles get
    /// [`DaqError::SessionClosed`] afterwards.
    pub async fn shutdown(&self) -> AppResult<Option<SessionSummary>> {
        self.request(SessionCommand::shutdown()).await
    }

    /// Current lifecycle state.
    pub fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Register a frame consumer. Callbacks run on the cadence task.
    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        self.dispatcher.subscribe(name, callback)
    }

    /// Remove a frame consumer.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Copy of one channel's history, oldest first.
    pub fn snapshot(&self, channel: Channel) -> Vec<f64> {
        self.store.snapshot(channel)
    }

    /// Copies of every channel's history.
    pub fn snapshot_all(&self) -> Vec<Vec<f64>> {
        self.store.snapshot_all()
    }

    /// Latest value per channel.
    pub fn latest(&self) -> [Option<f64>; CHANNEL_COUNT] {
        self.store.latest()
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Settings the controller was spawned with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.session_state())
            .finish_non_exhaustive()
    }
}
