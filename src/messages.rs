//! Message types for the session controller.
//!
//! Callers never touch session state directly. They send a [`SessionCommand`] over an mpsc
//! channel to the controller task (see [`crate::session`]) and await the reply on the
//! oneshot channel embedded in the command.
//!
//! # Message Flow
//!
//! ```text
//! Caller                             Controller Task
//! ------                             ---------------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                    3. Receive command
//!                                    4. Process (mutate state)
//!                                    5. Send response
//! 6. Await oneshot receiver   <------
//! ```
//!
//! Commands are handled one at a time, so a stop can never interleave with a start.
//!
//! ```rust
//! use netdaq::messages::SessionCommand;
//!
//! let (cmd, rx) = SessionCommand::start("127.0.0.1:0".to_string());
//! // cmd_tx.send(cmd).await?;
//! // let local_addr = rx.await??;
//! ```

use crate::error::AppResult;
use crate::stats::StatsSnapshot;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

/// What happened during a session, reported when it ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Address the session listened on
    pub local_addr: SocketAddr,
    /// Session log file
    pub log_path: PathBuf,
    /// Data rows written to the log, `None` if the log could not be closed cleanly
    pub rows_logged: Option<u64>,
    /// How long the session ran
    pub duration: Duration,
    /// Counters at the moment the session ended
    pub stats: StatsSnapshot,
}

/// Commands for the session controller.
#[derive(Debug)]
pub enum SessionCommand {
    /// Bind the address, open a new session log and begin ingesting.
    ///
    /// Starting while a session is already running changes nothing and returns the current
    /// address.
    ///
    /// # Response
    ///
    /// - `Ok(addr)`: Listening on `addr`
    /// - `Err(_)`: `AddressParse`, `Bind` or `Start`; the controller is back to `Idle`
    Start {
        /// Address as `host:port`
        address: String,
        /// Response channel for the bound address
        response: oneshot::Sender<AppResult<SocketAddr>>,
    },

    /// End the running session: interrupt ingestion, close the socket and the log.
    ///
    /// # Response
    ///
    /// `Some(summary)` for the session that was stopped, `None` if nothing was running.
    Stop {
        /// Response channel for the summary
        response: oneshot::Sender<Option<SessionSummary>>,
    },

    /// Empty every channel's rolling history.
    ClearChart {
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },

    /// Discard frames not yet delivered to consumers and zero the counters.
    ClearData {
        /// Acknowledgement
        response: oneshot::Sender<()>,
    },

    /// Address of the running session, if any.
    LocalAddr {
        /// Response channel
        response: oneshot::Sender<Option<SocketAddr>>,
    },

    /// Path of the running session's log, if any.
    LogPath {
        /// Response channel
        response: oneshot::Sender<Option<PathBuf>>,
    },

    /// Stop any running session, flush consumers and end the controller task.
    Shutdown {
        /// Sent once everything is closed
        response: oneshot::Sender<Option<SessionSummary>>,
    },
}

impl SessionCommand {
    /// Create a `Start` command and its response receiver.
    pub fn start(address: String) -> (Self, oneshot::Receiver<AppResult<SocketAddr>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Start {
                address,
                response: tx,
            },
            rx,
        )
    }

    /// Create a `Stop` command and its response receiver.
    pub fn stop() -> (Self, oneshot::Receiver<Option<SessionSummary>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Create a `ClearChart` command and its response receiver.
    pub fn clear_chart() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::ClearChart { response: tx }, rx)
    }

    /// Create a `ClearData` command and its response receiver.
    pub fn clear_data() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::ClearData { response: tx }, rx)
    }

    /// Create a `LocalAddr` query and its response receiver.
    pub fn local_addr() -> (Self, oneshot::Receiver<Option<SocketAddr>>) {
        let (tx, rx) = oneshot::channel();
        (Self::LocalAddr { response: tx }, rx)
    }

    /// Create a `LogPath` query and its response receiver.
    pub fn log_path() -> (Self, oneshot::Receiver<Option<PathBuf>>) {
        let (tx, rx) = oneshot::channel();
        (Self::LogPath { response: tx }, rx)
    }

    /// Create a `Shutdown` command and its response receiver.
    pub fn shutdown() -> (Self, oneshot::Receiver<Option<SessionSummary>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
