//! Rolling channel history and session log storage.
pub mod ring_buffer;
pub mod storage;

pub use ring_buffer::{ChannelStore, RingBuffer};
pub use storage::CsvLogger;
