//! Configuration System using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`Settings::default()`)
//! 2. An optional TOML file (`config/netdaq.toml` unless another path is given)
//! 3. Environment variables prefixed with `NETDAQ_`, nesting separated by `__`
//!
//! # Example
//! ```no_run
//! use netdaq::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Listening on {}", settings.listener.address);
//! # Ok::<(), netdaq::error::DaqError>(())
//! ```
//!
//! `NETDAQ_LISTENER__ADDRESS=0.0.0.0:5000` overrides `listener.address`.

use crate::error::{AppResult, DaqError};
use crate::frame::CHANNEL_COUNT;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/netdaq.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationSettings,
    /// Network listener settings
    pub listener: ListenerSettings,
    /// Rolling history settings
    pub buffer: BufferSettings,
    /// Session log settings
    pub storage: StorageSettings,
    /// Frame delivery settings
    pub dispatch: DispatchSettings,
    /// Session controller settings
    pub session: SessionSettings,
    /// Channel display names
    pub channels: ChannelSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format (compact, json)
    pub log_format: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "netdaq".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Address to listen on, as `host:port`. An empty host binds every interface.
    pub address: String,
    /// Size of the socket read buffer in bytes
    pub read_chunk_size: usize,
    /// Largest incomplete message kept between reads before it is discarded
    pub max_carry_over_bytes: usize,
    /// Consecutive accept failures tolerated before the session is torn down
    pub max_consecutive_accept_errors: u32,
    /// Pause after a failed accept, in milliseconds
    pub accept_backoff_ms: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            address: "192.168.1.1:1234".to_string(),
            read_chunk_size: 1024,
            max_carry_over_bytes: 64 * 1024,
            max_consecutive_accept_errors: 16,
            accept_backoff_ms: 100,
        }
    }
}

impl ListenerSettings {
    /// Accept backoff as a `Duration`.
    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }
}

/// Rolling history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Values retained per channel
    pub capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self { capacity: 20_000 }
    }
}

/// Session log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory the session CSV files are written to
    pub output_dir: PathBuf,
    /// File name prefix, the start timestamp follows it
    pub file_prefix: String,
    /// Flush after this many rows (0 = only when the session stops)
    pub flush_every_rows: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "DAS".to_string(),
            flush_every_rows: 100,
        }
    }
}

/// Frame delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Frames held for consumers before the oldest is dropped
    pub queue_capacity: usize,
    /// Consumer wake-up interval in milliseconds
    pub cadence_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            cadence_ms: 100,
        }
    }
}

impl DispatchSettings {
    /// Cadence as a `Duration`.
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms.max(1))
    }
}

/// Session controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Capacity of the controller command queue
    pub command_capacity: usize,
    /// How long `stop` waits for the ingestion task before aborting it
    pub shutdown_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_capacity: 32,
            shutdown_timeout_ms: 5000,
        }
    }
}

impl SessionSettings {
    /// Shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Channel naming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// One display name per channel, in channel order
    pub names: Vec<String>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        let names = [
            "TCD", "TCD_PS", "AUX_VOLT", "PID", "DID", "PID_PS", "VBUS", "AUX_CURR",
        ];
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Load configuration from `config/netdaq.toml` (if present) and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("NETDAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.listener.read_chunk_size == 0 {
            return Err(DaqError::Configuration(
                "listener.read_chunk_size must be greater than 0".to_string(),
            ));
        }

        if self.listener.max_carry_over_bytes == 0 {
            return Err(DaqError::Configuration(
                "listener.max_carry_over_bytes must be greater than 0".to_string(),
            ));
        }

        if self.buffer.capacity == 0 {
            return Err(DaqError::Configuration(
                "buffer.capacity must be greater than 0".to_string(),
            ));
        }

        if self.dispatch.queue_capacity == 0 || self.dispatch.cadence_ms == 0 {
            return Err(DaqError::Configuration(
                "dispatch.queue_capacity and dispatch.cadence_ms must be greater than 0"
                    .to_string(),
            ));
        }

        if self.session.command_capacity == 0 {
            return Err(DaqError::Configuration(
                "session.command_capacity must be greater than 0".to_string(),
            ));
        }

        if self.channels.names.len() != CHANNEL_COUNT {
            return Err(DaqError::Configuration(format!(
                "Expected {} channel names, got {}",
                CHANNEL_COUNT,
                self.channels.names.len()
            )));
        }

        Ok(())
    }
}
