//! Simulated telemetry source.
//!
//! Connects to a listener as a client and streams CRLF-terminated frames of eight
//! comma-separated readings, the same wire format a real controller board produces. Used by
//! `netdaq simulate` and by tests that need a live peer.
//!
//! Each channel wanders around a base value with ~1% uniform noise.

use crate::error::{AppResult, DaqError};
use crate::frame::{Frame, CHANNEL_COUNT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Typical idle readings: thermocouple temperatures, supply voltages and currents.
const BASE_VALUES: [f64; CHANNEL_COUNT] = [25.0, 24.0, 12.0, 0.5, 0.1, 5.0, 48.0, 1.2];

/// Client that streams synthetic frames.
#[derive(Debug)]
pub struct MockTelemetrySource {
    base: [f64; CHANNEL_COUNT],
    noise: f64,
    rng: StdRng,
}

impl MockTelemetrySource {
    /// Source with the default base values and entropy-seeded noise.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic source for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            base: BASE_VALUES,
            noise: 0.01,
            rng,
        }
    }

    /// Replace the base values.
    pub fn with_base(mut self, base: [f64; CHANNEL_COUNT]) -> Self {
        self.base = base;
        self
    }

    /// Relative noise amplitude (0.01 = ±1%).
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Next synthetic frame.
    pub fn next_frame(&mut self) -> Frame {
        let mut values = self.base;
        if self.noise > 0.0 {
            for value in values.iter_mut() {
                let factor = 1.0 + self.rng.gen_range(-self.noise..=self.noise);
                *value *= factor;
            }
        }
        Frame::new(values)
    }

    /// Wire encoding of a frame, terminator included.
    pub fn encode(frame: &Frame) -> String {
        format!("{}\r\n", frame)
    }

    /// Connect to `address` and send `count` frames (unbounded if `None`) at `rate_hz`.
    ///
    /// Returns the number of frames sent. A rate of zero sends as fast as the socket accepts.
    /// A rate that is negative, not finite, or has no representable period is rejected with
    /// [`DaqError::Configuration`] before connecting.
    pub async fn stream_to(
        &mut self,
        address: &str,
        rate_hz: f64,
        count: Option<u64>,
    ) -> AppResult<u64> {
        let period = tick_period(rate_hz)?;
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        info!(address, rate_hz, ?count, "Streaming simulated telemetry");

        let mut ticker = period.map(|period| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        let mut sent = 0u64;
        while count.map_or(true, |limit| sent < limit) {
            if let Some(ticker) = ticker.as_mut() {
                ticker.tick().await;
            }
            let line = Self::encode(&self.next_frame());
            stream.write_all(line.as_bytes()).await?;
            sent += 1;
        }

        stream.flush().await?;
        stream.shutdown().await?;
        debug!(sent, "Simulated stream finished");
        Ok(sent)
    }
}

/// Interval between frames for `rate_hz`; `None` means unthrottled.
fn tick_period(rate_hz: f64) -> AppResult<Option<Duration>> {
    if !rate_hz.is_finite() || rate_hz < 0.0 {
        return Err(DaqError::Configuration(format!(
            "rate_hz must be a finite, non-negative number, got {}",
            rate_hz
        )));
    }
    if rate_hz == 0.0 {
        return Ok(None);
    }
    match Duration::try_from_secs_f64(1.0 / rate_hz) {
        Ok(period) if !period.is_zero() => Ok(Some(period)),
        _ => Err(DaqError::Configuration(format!(
            "rate_hz {} has no usable frame period",
            rate_hz
        ))),
    }
}

impl Default for MockTelemetrySource {
    fn default() -> Self {
        Self::new()
    }
}
