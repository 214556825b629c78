//! Ingestion counters.
//!
//! Non-fatal failures (malformed messages, log write errors, dropped deliveries) are never
//! thrown across the ingestion loop. They are counted here and read by consumers through
//! [`IngestStats::snapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated by the ingestion task and the dispatcher.
#[derive(Debug, Default)]
pub struct IngestStats {
    bytes_received: AtomicU64,
    frames_accepted: AtomicU64,
    arity_errors: AtomicU64,
    number_errors: AtomicU64,
    bytes_discarded: AtomicU64,
    log_write_errors: AtomicU64,
    connections_accepted: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Raw bytes read from clients
    pub bytes_received: u64,
    /// Frames parsed and stored
    pub frames_accepted: u64,
    /// Messages with the wrong field count
    pub arity_errors: u64,
    /// Messages with a non-numeric field or invalid text
    pub number_errors: u64,
    /// Bytes thrown away by the framer's carry-over limit
    pub bytes_discarded: u64,
    /// Rows that failed to reach the session log
    pub log_write_errors: u64,
    /// Client connections accepted
    pub connections_accepted: u64,
    /// Frames evicted from the delivery queue before a consumer saw them
    pub frames_dropped: u64,
}

impl StatsSnapshot {
    /// All rejected messages.
    pub fn parse_errors(&self) -> u64 {
        self.arity_errors + self.number_errors
    }
}

macro_rules! counter {
    ($($inc:ident => $field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Increment `", stringify!($field), "` by `n`.")]
            pub fn $inc(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl IngestStats {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        add_bytes_received => bytes_received,
        add_frames_accepted => frames_accepted,
        add_arity_errors => arity_errors,
        add_number_errors => number_errors,
        add_bytes_discarded => bytes_discarded,
        add_log_write_errors => log_write_errors,
        add_connections_accepted => connections_accepted,
        add_frames_dropped => frames_dropped,
    }

    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_accepted: self.frames_accepted.load(Ordering::Relaxed),
            arity_errors: self.arity_errors.load(Ordering::Relaxed),
            number_errors: self.number_errors.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            log_write_errors: self.log_write_errors.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.bytes_received,
            &self.frames_accepted,
            &self.arity_errors,
            &self.number_errors,
            &self.bytes_discarded,
            &self.log_write_errors,
            &self.connections_accepted,
            &self.frames_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let stats = IngestStats::new();
        stats.add_frames_accepted(3);
        stats.add_arity_errors(1);
        stats.add_number_errors(2);
        stats.add_bytes_received(128);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_accepted, 3);
        assert_eq!(snapshot.parse_errors(), 3);
        assert_eq!(snapshot.bytes_received, 128);

        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = IngestStats::new();
        stats.add_frames_dropped(5);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["frames_dropped"], 5);
    }
}
