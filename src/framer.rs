//! Incremental CRLF framer for the telemetry byte stream.
//!
//! The framer is fed arbitrary chunks as they come off the socket and yields every complete
//! message, terminator stripped. Partial trailing bytes are carried over to the next call, so
//! splitting the stream at any offset (including between `\r` and `\n`) yields the same
//! messages as framing the concatenated stream at once.
//!
//! Messages longer than `max_carry_over` bytes are discarded whole, however the stream was
//! chunked. A message found complete in one chunk is dropped on sight; a fragment that is
//! already known to be too long is dropped early and the framer skips ahead to the next
//! terminator, so a stream that never sends one cannot grow the carry-over without bound.
//! Discarded bytes, terminators included, are counted and handed out through
//! [`Framer::take_discarded`].

use bytes::{Buf, Bytes, BytesMut};

/// Message terminator on the wire.
pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Splits a byte stream into CRLF-terminated messages.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    max_carry_over: usize,
    /// Set after an overflow until the next terminator is seen
    resyncing: bool,
    discarded: usize,
}

impl Framer {
    /// Create a framer that accepts messages of at most `max_carry_over` bytes.
    pub fn new(max_carry_over: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_carry_over: max_carry_over.max(TERMINATOR.len()),
            resyncing: false,
            discarded: 0,
        }
    }

    /// Append `chunk` and return every message it completes, in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        // A terminator may straddle the previous chunk boundary
        let mut search_from = self.buf.len().saturating_sub(TERMINATOR.len() - 1);
        self.buf.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = find_terminator(&self.buf[search_from..]) {
            let message = self.buf.split_to(search_from + pos).freeze();
            self.buf.advance(TERMINATOR.len());
            search_from = 0;

            if self.resyncing {
                self.discarded += message.len() + TERMINATOR.len();
                self.resyncing = false;
                continue;
            }
            if message.len() > self.max_carry_over {
                self.discarded += message.len() + TERMINATOR.len();
                tracing::warn!(
                    len = message.len(),
                    max_carry_over = self.max_carry_over,
                    "Message exceeds carry-over limit, discarding"
                );
                continue;
            }
            messages.push(message);
        }

        // A trailing `\r` may be the first half of a split terminator
        let split_cr = self.buf.last() == Some(&TERMINATOR[0]);
        let content_len = self.buf.len() - usize::from(split_cr);
        if content_len > self.max_carry_over {
            self.buf.advance(content_len);
            self.discarded += content_len;
            self.resyncing = true;
            tracing::warn!(
                max_carry_over = self.max_carry_over,
                "No terminator within carry-over limit, discarding partial message"
            );
        }

        messages
    }

    /// Bytes currently held as an incomplete message.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Bytes discarded by the carry-over limit since the last call.
    pub fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }

    /// Forget any partial message, e.g. when a connection is replaced.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.resyncing = false;
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] = b"1,2,3,4,5,6,7,8\r\n9,10,11,12,13,14,15,16\r\n";

    fn frame_all(stream: &[u8]) -> Vec<Bytes> {
        Framer::new(1024).feed(stream)
    }

    #[test]
    fn test_single_chunk() {
        let messages = frame_all(STREAM);
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0][..], b"1,2,3,4,5,6,7,8");
        assert_eq!(&messages[1][..], b"9,10,11,12,13,14,15,16");
    }

    #[test]
    fn test_every_two_way_split_matches_whole() {
        let whole = frame_all(STREAM);
        for offset in 0..=STREAM.len() {
            let mut framer = Framer::new(1024);
            let mut messages = framer.feed(&STREAM[..offset]);
            messages.extend(framer.feed(&STREAM[offset..]));
            assert_eq!(messages, whole, "split at offset {}", offset);
            assert_eq!(framer.pending(), 0);
        }
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let stream = b"a,b\r\n\r\nlast\r\nnot yet";
        let whole = {
            let mut framer = Framer::new(1024);
            framer.feed(stream)
        };

        let mut framer = Framer::new(1024);
        let mut messages = Vec::new();
        for byte in stream.iter() {
            messages.extend(framer.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(messages, whole);
        assert_eq!(messages.len(), 3);
        assert!(messages[1].is_empty());
        assert_eq!(framer.pending(), b"not yet".len());
    }

    #[test]
    fn test_partial_is_carried_over() {
        let mut framer = Framer::new(1024);
        assert!(framer.feed(b"1,2,3").is_empty());
        assert_eq!(framer.pending(), 5);
        let messages = framer.feed(b",4\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"1,2,3,4");
    }

    #[test]
    fn test_lone_cr_or_lf_is_not_a_terminator() {
        let messages = frame_all(b"a\rb\nc\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"a\rb\nc");
    }

    #[test]
    fn test_overflow_discards_and_resyncs() {
        let mut framer = Framer::new(8);
        assert!(framer.feed(b"0123456789abcdef").is_empty());
        assert!(framer.pending() < 8);

        // Tail of the oversized message is dropped, the next one comes through
        let messages = framer.feed(b"ghij\r\nok\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"ok");
        assert_eq!(framer.take_discarded(), 16 + 4 + 2);
        assert_eq!(framer.take_discarded(), 0);
    }

    #[test]
    fn test_oversized_message_dropped_at_every_split() {
        let stream = b"0000000001,2,3,4,5,6,7,8\r\nok\r\n";
        let oversized = b"0000000001,2,3,4,5,6,7,8".len();
        for offset in 0..=stream.len() {
            let mut framer = Framer::new(16);
            let mut messages = framer.feed(&stream[..offset]);
            messages.extend(framer.feed(&stream[offset..]));
            assert_eq!(messages.len(), 1, "split at offset {}", offset);
            assert_eq!(&messages[0][..], b"ok");
            assert_eq!(framer.take_discarded(), oversized + 2, "split at offset {}", offset);
            assert_eq!(framer.pending(), 0);
        }
    }

    #[test]
    fn test_message_at_limit_kept_at_every_split() {
        let stream = b"0123456789abcdef\r\n";
        for offset in 0..=stream.len() {
            let mut framer = Framer::new(16);
            let mut messages = framer.feed(&stream[..offset]);
            messages.extend(framer.feed(&stream[offset..]));
            assert_eq!(messages.len(), 1, "split at offset {}", offset);
            assert_eq!(&messages[0][..], b"0123456789abcdef");
            assert_eq!(framer.take_discarded(), 0);
        }
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut framer = Framer::new(1024);
        framer.feed(b"half a mess");
        framer.reset();
        let messages = framer.feed(b"age\r\n");
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0][..], b"age");
    }
}
