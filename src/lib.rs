//! # netdaq
//!
//! Network telemetry ingestion for embedded controller boards. A board connects over TCP and
//! streams CRLF-terminated text frames of eight comma-separated readings. This crate accepts
//! that stream, keeps a rolling per-channel history for display, writes every accepted frame
//! to a timestamped CSV session log, and hands frames to consumers on a fixed cadence.
//!
//! ## Crate Structure
//!
//! - **`config`**: Layered settings (defaults, TOML file, `NETDAQ_` environment) via `figment`.
//! - **`data`**: Per-channel ring buffers (`ring_buffer`) and the CSV session log (`storage`).
//! - **`dispatch`**: Bounded drop-oldest frame queue drained to subscribers on a cadence.
//! - **`error`**: The `DaqError` enum for failures that abort an operation.
//! - **`frame`**: The eight-channel `Frame` and `Channel` index types.
//! - **`framer`**: Splits the raw byte stream into CRLF-delimited messages.
//! - **`listener`**: Address parsing, socket binding and the cancellable ingestion loop.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`messages`**: Command protocol between session handles and the controller task.
//! - **`mock`**: Simulated telemetry client.
//! - **`parser`**: Decodes one message into a `Frame`.
//! - **`session`**: The session state machine and its `SessionHandle`.
//! - **`stats`**: Counters for accepted, rejected and dropped data.
//!
//! ## Example
//!
//! ```no_run
//! use netdaq::config::Settings;
//! use netdaq::session::SessionController;
//!
//! # async fn run() -> netdaq::error::AppResult<()> {
//! let handle = SessionController::spawn(Settings::load()?);
//! handle.subscribe("printer", |frame| println!("{}", frame));
//! let addr = handle.start("0.0.0.0:1234").await?;
//! println!("listening on {}", addr);
//! // ...
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod framer;
pub mod listener;
pub mod logging;
pub mod messages;
pub mod mock;
pub mod parser;
pub mod session;
pub mod stats;
