//! Sample and channel types shared by the whole pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of channels carried by every frame.
pub const CHANNEL_COUNT: usize = 8;

/// One sample across all channels at one instant.
///
/// The arity is fixed by the type, so a stored `Frame` always holds exactly
/// [`CHANNEL_COUNT`] values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame([f64; CHANNEL_COUNT]);

impl Frame {
    /// Build a frame from its channel values.
    pub fn new(values: [f64; CHANNEL_COUNT]) -> Self {
        Self(values)
    }

    /// All values in channel order.
    pub fn values(&self) -> &[f64; CHANNEL_COUNT] {
        &self.0
    }

    /// Value of a single channel.
    pub fn get(&self, channel: Channel) -> f64 {
        self.0[channel.index()]
    }
}

impl From<[f64; CHANNEL_COUNT]> for Frame {
    fn from(values: [f64; CHANNEL_COUNT]) -> Self {
        Self::new(values)
    }
}

impl fmt::Display for Frame {
    /// Comma-separated values, the same shape as the wire format minus the terminator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

/// A channel index in `0..CHANNEL_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel(u8);

impl Channel {
    /// Returns `None` when `index` is out of range.
    pub fn new(index: usize) -> Option<Self> {
        (index < CHANNEL_COUNT).then(|| Self(index as u8))
    }

    /// Zero-based index.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Every channel in order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..CHANNEL_COUNT as u8).map(Channel)
    }
}

impl fmt::Display for Channel {
    /// One-based label, matching the log header (`CH1`..`CH8`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0 + 1)
    }
}
