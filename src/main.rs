//! CLI entry point for netdaq
//!
//! Provides two commands:
//! - `listen`: run an ingestion session and print readings as they are delivered
//! - `simulate`: act as a board and stream synthetic frames to a listener
//!
//! # Usage
//!
//! ```bash
//! netdaq listen --address 0.0.0.0:1234 --output-dir ./logs
//! netdaq simulate --address 127.0.0.1:1234 --rate-hz 50
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use netdaq::config::{Settings, DEFAULT_CONFIG_PATH};
use netdaq::frame::{Channel, Frame};
use netdaq::logging;
use netdaq::mock::MockTelemetrySource;
use netdaq::session::SessionController;
use std::path::PathBuf;
use tracing::info;

const VOLT_CHANNEL: usize = 2;
const CURR_CHANNEL: usize = 7;

#[derive(Parser)]
#[command(name = "netdaq")]
#[command(about = "TCP telemetry ingestion with rolling history and CSV session logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for a board and log its telemetry until Ctrl+C
    Listen {
        /// Address to listen on as host:port (overrides config)
        #[arg(long)]
        address: Option<String>,

        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Directory for session CSV files (overrides config)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Stream synthetic frames to a listener
    Simulate {
        /// Listener address as host:port
        #[arg(long)]
        address: String,

        /// Frames per second (0 = as fast as possible)
        #[arg(long, default_value_t = 10.0)]
        rate_hz: f64,

        /// Stop after this many frames
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            address,
            config,
            output_dir,
        } => listen(address, config, output_dir).await,
        Commands::Simulate {
            address,
            rate_hz,
            count,
        } => simulate(address, rate_hz, count).await,
    }
}

async fn listen(
    address: Option<String>,
    config: PathBuf,
    output_dir: Option<PathBuf>,
) -> Result<()> {
    let mut settings = Settings::load_from(&config)
        .with_context(|| format!("loading configuration from {}", config.display()))?;
    if let Some(address) = address {
        settings.listener.address = address;
    }
    if let Some(dir) = output_dir {
        settings.storage.output_dir = dir;
    }
    logging::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    let names = settings.channels.names.clone();
    let address = settings.listener.address.clone();
    let handle = SessionController::spawn(settings);

    let console = ConsoleView::new(&names);
    handle.subscribe("console", move |frame: &Frame| {
        if let Some(line) = console.line(frame) {
            println!("{}", line);
        }
    });

    let local_addr = handle
        .start(&address)
        .await
        .with_context(|| format!("starting session on {}", address))?;
    if let Some(path) = handle.log_path().await? {
        println!("📡 Listening on {} - logging to {}", local_addr, path.display());
    }
    println!("   Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");

    let summary = handle.shutdown().await?;
    match summary {
        Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
        None => println!("{}", serde_json::to_string_pretty(&handle.stats())?),
    }
    Ok(())
}

async fn simulate(address: String, rate_hz: f64, count: Option<u64>) -> Result<()> {
    logging::init(logging::TracingConfig::default()).map_err(anyhow::Error::msg)?;

    let mut source = MockTelemetrySource::new();
    let sent = source
        .stream_to(&address, rate_hz, count)
        .await
        .with_context(|| format!("streaming to {}", address))?;
    println!("✅ Sent {} frames to {}", sent, address);
    Ok(())
}

/// One printed line per delivered frame, showing the VOLT and CURR readings.
struct ConsoleView {
    volt_label: String,
    curr_label: String,
}

impl ConsoleView {
    fn new(names: &[String]) -> Self {
        let label = |index: usize| {
            names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("CH{}", index + 1))
        };
        Self {
            volt_label: label(VOLT_CHANNEL),
            curr_label: label(CURR_CHANNEL),
        }
    }

    fn line(&self, frame: &Frame) -> Option<String> {
        let volt = Channel::new(VOLT_CHANNEL)?;
        let curr = Channel::new(CURR_CHANNEL)?;
        Some(format!(
            "{}: {:.3}  {}: {:.3}",
            self.volt_label,
            frame.get(volt),
            self.curr_label,
            frame.get(curr)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        Settings::default().channels.names
    }

    #[test]
    fn console_shows_volt_and_curr() {
        let view = ConsoleView::new(&names());
        let frame = Frame::new([0.0, 0.0, 12.5, 0.0, 0.0, 0.0, 0.0, 1.25]);
        assert_eq!(
            view.line(&frame).as_deref(),
            Some("AUX_VOLT: 12.500  AUX_CURR: 1.250")
        );
    }

    #[test]
    fn console_falls_back_to_channel_labels() {
        let view = ConsoleView::new(&[]);
        let frame = Frame::new([0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.5]);
        assert_eq!(view.line(&frame).as_deref(), Some("CH3: 3.000  CH8: 0.500"));
    }
}
