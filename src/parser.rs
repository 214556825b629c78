//! Decoding of a single framed message into a [`Frame`].
//!
//! A message is ASCII text holding exactly [`CHANNEL_COUNT`] comma-separated decimal numbers.
//! Whitespace around a field is tolerated. Anything else is rejected with a [`ParseError`]
//! which the ingestion loop counts and drops; a bad message never ends the stream.

use crate::frame::{Frame, CHANNEL_COUNT};
use thiserror::Error;

/// Field delimiter within a message.
pub const DELIMITER: char = ',';

/// Per-message decode failure. Always non-fatal to ingestion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Wrong number of fields.
    #[error("expected {expected} fields, found {found}")]
    Arity {
        /// Required field count
        expected: usize,
        /// Fields present in the message
        found: usize,
    },

    /// A field is not a decimal number.
    #[error("field {index} is not numeric: '{field}'")]
    NotNumeric {
        /// Zero-based field position
        index: usize,
        /// The offending text
        field: String,
    },

    /// The message is not valid UTF-8 text.
    #[error("message is not valid UTF-8")]
    InvalidUtf8,
}

impl ParseError {
    /// `true` for field-count failures, `false` for malformed content.
    pub fn is_arity(&self) -> bool {
        matches!(self, ParseError::Arity { .. })
    }
}

/// Decode one message (terminator already stripped).
pub fn parse(message: &[u8]) -> Result<Frame, ParseError> {
    let text = std::str::from_utf8(message).map_err(|_| ParseError::InvalidUtf8)?;

    let found = text.split(DELIMITER).count();
    if found != CHANNEL_COUNT {
        return Err(ParseError::Arity {
            expected: CHANNEL_COUNT,
            found,
        });
    }

    let mut values = [0.0_f64; CHANNEL_COUNT];
    for (index, (slot, field)) in values.iter_mut().zip(text.split(DELIMITER)).enumerate() {
        *slot = field
            .trim()
            .parse::<f64>()
            .map_err(|_| ParseError::NotNumeric {
                index,
                field: field.to_string(),
            })?;
    }

    Ok(Frame::new(values))
}
