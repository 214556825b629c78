//! Fixed-capacity rolling history, one per channel.
//!
//! [`RingBuffer`] keeps the most recent `capacity` values in arrival order. The backing
//! storage is allocated once; a push writes one slot and moves the head, so it is O(1) even
//! when the oldest value is evicted.
//!
//! [`ChannelStore`] holds one ring buffer per channel behind a single `RwLock`. The ingestion
//! task is the only writer and pushes a whole frame under one write lock, so readers never
//! observe a frame half-applied across channels. Readers take copies through
//! [`ChannelStore::snapshot`] and never hold the lock while rendering.

use crate::frame::{Channel, Frame, CHANNEL_COUNT};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Circular buffer of `f64` with overwrite-oldest semantics.
///
/// # Layout
/// ```text
/// slots:  [ v4 | v5 | v2 | v3 ]     capacity = 4, len = 4
///                  ^head (oldest)
/// ```
/// The next push overwrites `slots[head]` and advances `head`.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Box<[f64]>,
    /// Index of the oldest value
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// Create an empty buffer. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0.0; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Append a value, evicting the oldest one when full.
    ///
    /// Returns the evicted value, if any.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let capacity = self.slots.len();
        if self.len < capacity {
            let tail = (self.head + self.len) % capacity;
            self.slots[tail] = value;
            self.len += 1;
            None
        } else {
            let evicted = std::mem::replace(&mut self.slots[self.head], value);
            self.head = (self.head + 1) % capacity;
            Some(evicted)
        }
    }

    /// Values oldest-first, without copying.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let (first, second) = self.as_slices();
        first.iter().chain(second.iter()).copied()
    }

    /// The contents as two contiguous runs, oldest-first.
    pub fn as_slices(&self) -> (&[f64], &[f64]) {
        let capacity = self.slots.len();
        if self.head + self.len <= capacity {
            (&self.slots[self.head..self.head + self.len], &self.slots[..0])
        } else {
            let wrapped = self.head + self.len - capacity;
            (&self.slots[self.head..], &self.slots[..wrapped])
        }
    }

    /// Copy of the contents, oldest-first.
    pub fn to_vec(&self) -> Vec<f64> {
        let (first, second) = self.as_slices();
        let mut out = Vec::with_capacity(self.len);
        out.extend_from_slice(first);
        out.extend_from_slice(second);
        out
    }

    /// Most recently pushed value.
    pub fn latest(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let idx = (self.head + self.len - 1) % self.slots.len();
        Some(self.slots[idx])
    }

    /// Drop every value. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Number of values held.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when nothing has been pushed since creation or the last clear.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of values held.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// `true` once the next push will evict.
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }
}

/// Per-channel rolling history shared between ingestion and readers.
#[derive(Debug)]
pub struct ChannelStore {
    channels: RwLock<Vec<RingBuffer>>,
    capacity: usize,
}

impl ChannelStore {
    /// One empty buffer of `capacity` values per channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(vec![RingBuffer::new(capacity); CHANNEL_COUNT]),
            capacity: capacity.max(1),
        }
    }

    /// Append one value to one channel.
    pub fn push(&self, channel: Channel, value: f64) {
        self.write()[channel.index()].push(value);
    }

    /// Append every value of a frame to its channel under a single lock.
    pub fn push_frame(&self, frame: &Frame) {
        let mut channels = self.write();
        for (buffer, value) in channels.iter_mut().zip(frame.values()) {
            buffer.push(*value);
        }
    }

    /// Copy of one channel, oldest-first.
    pub fn snapshot(&self, channel: Channel) -> Vec<f64> {
        self.read()[channel.index()].to_vec()
    }

    /// Copies of all channels, taken under one lock so they line up sample for sample.
    pub fn snapshot_all(&self) -> Vec<Vec<f64>> {
        self.read().iter().map(RingBuffer::to_vec).collect()
    }

    /// Latest value of each channel, `None` for empty channels.
    pub fn latest(&self) -> [Option<f64>; CHANNEL_COUNT] {
        let channels = self.read();
        let mut out = [None; CHANNEL_COUNT];
        for (slot, buffer) in out.iter_mut().zip(channels.iter()) {
            *slot = buffer.latest();
        }
        out
    }

    /// Number of values held by one channel.
    pub fn len(&self, channel: Channel) -> usize {
        self.read()[channel.index()].len()
    }

    /// Empty one channel.
    pub fn clear(&self, channel: Channel) {
        self.write()[channel.index()].clear();
    }

    /// Empty every channel.
    pub fn clear_all(&self) {
        for buffer in self.write().iter_mut() {
            buffer.clear();
        }
    }

    /// Per-channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Mutations cannot panic midway, so a poisoned lock still guards consistent buffers.
    fn read(&self) -> RwLockReadGuard<'_, Vec<RingBuffer>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RingBuffer>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn ch(index: usize) -> Channel {
        Channel::new(index).unwrap()
    }

    #[test]
    fn test_push_below_capacity() {
        let mut rb = RingBuffer::new(4);
        assert!(rb.is_empty());
        assert_eq!(rb.push(1.0), None);
        assert_eq!(rb.push(2.0), None);
        assert_eq!(rb.len(), 2);
        assert_eq!(rb.to_vec(), vec![1.0, 2.0]);
        assert_eq!(rb.latest(), Some(2.0));
    }

    #[test]
    fn test_overflow_keeps_last_capacity_values() {
        let capacity = 5;
        for extra in 1..=12 {
            let mut rb = RingBuffer::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                rb.push(i as f64);
            }
            assert_eq!(rb.len(), capacity);
            let expected: Vec<f64> = (total - capacity..total).map(|i| i as f64).collect();
            assert_eq!(rb.to_vec(), expected, "after {} extra pushes", extra);
            assert_eq!(rb.iter().collect::<Vec<_>>(), expected);
        }
    }

    #[test]
    fn test_push_returns_evicted() {
        let mut rb = RingBuffer::new(2);
        rb.push(1.0);
        rb.push(2.0);
        assert!(rb.is_full());
        assert_eq!(rb.push(3.0), Some(1.0));
        assert_eq!(rb.push(4.0), Some(2.0));
    }

    #[test]
    fn test_clear_resets_but_keeps_capacity() {
        let mut rb = RingBuffer::new(3);
        for i in 0..7 {
            rb.push(i as f64);
        }
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.capacity(), 3);
        assert_eq!(rb.latest(), None);
        rb.push(42.0);
        assert_eq!(rb.to_vec(), vec![42.0]);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut rb = RingBuffer::new(0);
        rb.push(1.0);
        rb.push(2.0);
        assert_eq!(rb.to_vec(), vec![2.0]);
    }

    #[test]
    fn test_store_push_frame_and_snapshot() {
        let store = ChannelStore::new(3);
        store.push_frame(&Frame::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]));
        store.push_frame(&Frame::new([9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]));

        assert_eq!(store.snapshot(ch(0)), vec![1.0, 9.0]);
        assert_eq!(store.snapshot(ch(7)), vec![8.0, 16.0]);
        assert_eq!(store.latest()[2], Some(11.0));

        store.push(ch(0), 99.0);
        store.push(ch(0), 100.0);
        assert_eq!(store.snapshot(ch(0)), vec![9.0, 99.0, 100.0]);
        assert_eq!(store.len(ch(1)), 2);
    }

    #[test]
    fn test_store_clear_is_idempotent() {
        let store = ChannelStore::new(10);
        store.push_frame(&Frame::new([1.0; CHANNEL_COUNT]));
        store.clear(ch(3));
        assert_eq!(store.len(ch(3)), 0);
        assert_eq!(store.len(ch(4)), 1);

        for _ in 0..3 {
            store.clear_all();
            for channel in Channel::all() {
                assert_eq!(store.len(channel), 0);
            }
        }
        assert_eq!(store.capacity(), 10);
    }

    #[test]
    fn test_concurrent_push_and_snapshot() {
        let store = Arc::new(ChannelStore::new(1000));

        let writer_store = Arc::clone(&store);
        let writer = thread::spawn(move || {
            for i in 0..10_000 {
                writer_store.push_frame(&Frame::new([i as f64; CHANNEL_COUNT]));
            }
        });

        let reader_store = Arc::clone(&store);
        let reader = thread::spawn(move || {
            for _ in 0..200 {
                let snapshot = reader_store.snapshot_all();
                let len = snapshot[0].len();
                assert!(len <= 1000);
                // Every channel received the same frames
                assert!(snapshot.iter().all(|values| values.len() == len));
                // Arrival order is preserved
                assert!(snapshot[0].windows(2).all(|w| w[0] < w[1]));
            }
        });

        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.len(ch(5)), 1000);
        assert_eq!(store.latest()[5], Some(9999.0));
    }
}
