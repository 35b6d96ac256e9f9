// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! NTS-KE record codec and message buffer (RFC 8915 Section 4).
//!
//! An NTS-KE message is a sequence of records carried over TLS:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |C|         Record Type         |          Body Length          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! .                                                               .
//! .                       Record Body (variable)                  .
//! .                                                               .
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A complete message ends with a critical End of Message record with an
//! empty body, and nothing may follow it. [`KeMessage`] is a fixed-capacity
//! buffer holding one message, with explicit cursors for partial sends
//! (`sent`) and record iteration (`parsed`) so I/O can resume where it
//! stopped.

use byteorder::{ByteOrder, BE};

use crate::error::RecordError;

/// Maximum NTS-KE message length in bytes.
pub const MAX_MESSAGE_LENGTH: usize = 16384;

/// Size of a record header: 2-byte type, 2-byte body length.
const RECORD_HEADER_LENGTH: usize = 4;

/// Critical bit in the record type field.
const RECORD_CRITICAL_BIT: u16 = 1 << 15;

/// End of Message record type.
pub const RECORD_END_OF_MESSAGE: u16 = 0;
/// NTS Next Protocol Negotiation record type.
pub const RECORD_NEXT_PROTOCOL: u16 = 1;
/// Error record type.
pub const RECORD_ERROR: u16 = 2;
/// Warning record type.
pub const RECORD_WARNING: u16 = 3;
/// AEAD Algorithm Negotiation record type.
pub const RECORD_AEAD_ALGORITHM: u16 = 4;
/// New Cookie for NTPv4 record type.
pub const RECORD_COOKIE: u16 = 5;
/// NTPv4 Server Negotiation record type.
pub const RECORD_NTPV4_SERVER: u16 = 6;
/// NTPv4 Port Negotiation record type.
pub const RECORD_NTPV4_PORT: u16 = 7;

/// A single record parsed out of a [`KeMessage`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeRecord<'a> {
    /// Whether the critical bit is set.
    pub critical: bool,
    /// Record type with the critical bit cleared.
    pub record_type: u16,
    /// Record body.
    pub body: &'a [u8],
}

/// Result of validating the framing of a buffered message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageFormat {
    /// Records parse cleanly so far, but the message is not finished.
    Incomplete,
    /// The message cannot become valid (truncated at EOF, empty, or not
    /// terminated by a single critical End of Message record).
    Error,
    /// A complete, well-formed message.
    Ok,
}

/// Fixed-capacity buffer holding one NTS-KE message.
///
/// Tracks how much of the buffer is valid (`length`), how much has been
/// written to the TLS session (`sent`), whether the peer closed the stream
/// (`eof`), and the record iteration cursor (`parsed`).
pub struct KeMessage {
    data: Box<[u8; MAX_MESSAGE_LENGTH]>,
    length: usize,
    sent: usize,
    eof: bool,
    parsed: usize,
}

impl KeMessage {
    /// Create an empty message buffer.
    pub fn new() -> Self {
        KeMessage {
            data: Box::new([0u8; MAX_MESSAGE_LENGTH]),
            length: 0,
            sent: 0,
            eof: false,
            parsed: 0,
        }
    }

    /// Clear the buffer and all cursors.
    pub fn reset(&mut self) {
        self.length = 0;
        self.sent = 0;
        self.eof = false;
        self.parsed = 0;
    }

    /// Restart record iteration from the beginning of the buffer.
    pub fn reset_parsing(&mut self) {
        self.parsed = 0;
    }

    /// Number of valid bytes in the buffer.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Whether the buffer is at capacity.
    pub fn is_full(&self) -> bool {
        self.length == MAX_MESSAGE_LENGTH
    }

    /// Whether the peer closed the stream.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Record that the peer closed the stream.
    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    /// Append a record to the message.
    ///
    /// Fails when the body exceeds the 16-bit length field or the buffer
    /// cannot hold the record.
    pub fn add_record(
        &mut self,
        critical: bool,
        record_type: u16,
        body: &[u8],
    ) -> Result<(), RecordError> {
        if body.len() > u16::MAX as usize {
            return Err(RecordError::BodyTooLong { length: body.len() });
        }
        if self.length + RECORD_HEADER_LENGTH + body.len() > MAX_MESSAGE_LENGTH {
            return Err(RecordError::MessageFull);
        }

        let raw_type = if critical {
            record_type | RECORD_CRITICAL_BIT
        } else {
            record_type
        };
        BE::write_u16(&mut self.data[self.length..], raw_type);
        BE::write_u16(&mut self.data[self.length + 2..], body.len() as u16);
        self.length += RECORD_HEADER_LENGTH;

        self.data[self.length..self.length + body.len()].copy_from_slice(body);
        self.length += body.len();

        Ok(())
    }

    /// Parse the next record at the iteration cursor.
    ///
    /// Returns `None` when fewer than four bytes remain or the declared body
    /// exceeds the remaining bytes; the cursor is not advanced in that case.
    pub fn next_record(&mut self) -> Option<KeRecord<'_>> {
        if self.length < self.parsed + RECORD_HEADER_LENGTH {
            return None;
        }

        let raw_type = BE::read_u16(&self.data[self.parsed..]);
        let body_length = BE::read_u16(&self.data[self.parsed + 2..]) as usize;

        if self.length < self.parsed + RECORD_HEADER_LENGTH + body_length {
            return None;
        }

        let body_start = self.parsed + RECORD_HEADER_LENGTH;
        self.parsed = body_start + body_length;

        Some(KeRecord {
            critical: raw_type & RECORD_CRITICAL_BIT != 0,
            record_type: raw_type & !RECORD_CRITICAL_BIT,
            body: &self.data[body_start..body_start + body_length],
        })
    }

    /// Validate the framing of the buffered message.
    ///
    /// Iterates all records from the start of the buffer. A message is `Ok`
    /// when every byte is consumed and the last record is a critical End of
    /// Message with an empty body, with no earlier End of Message record.
    /// A partial message is `Incomplete` until [`eof`](Self::eof) is set,
    /// after which it becomes `Error`. An empty buffer is `Error`.
    pub fn validate(&mut self) -> MessageFormat {
        self.reset_parsing();

        let mut last: Option<(bool, u16, usize)> = None;
        let mut end_of_message_seen = false;

        while let Some(record) = self.next_record() {
            if end_of_message_seen {
                // A record after End of Message is trailing data.
                return MessageFormat::Error;
            }
            if record.record_type == RECORD_END_OF_MESSAGE {
                end_of_message_seen = true;
            }
            last = Some((record.critical, record.record_type, record.body.len()));
        }

        if self.parsed < self.length {
            return if self.eof {
                MessageFormat::Error
            } else {
                MessageFormat::Incomplete
            };
        }

        match last {
            Some((true, RECORD_END_OF_MESSAGE, 0)) => MessageFormat::Ok,
            // Empty buffer or a final record that is not a critical EoM.
            _ => MessageFormat::Error,
        }
    }

    /// Bytes appended but not yet written to the TLS session.
    pub fn unsent(&self) -> &[u8] {
        &self.data[self.sent..self.length]
    }

    /// Advance the send cursor after a partial write.
    pub fn advance_sent(&mut self, n: usize) {
        self.sent += n;
        debug_assert!(self.sent <= self.length);
    }

    /// Whether every buffered byte has been written out.
    pub fn fully_sent(&self) -> bool {
        self.sent == self.length
    }

    /// Free space at the tail of the buffer, for appending received bytes.
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.data[self.length..]
    }

    /// Mark `n` bytes of [`unfilled`](Self::unfilled) as received.
    pub fn advance_filled(&mut self, n: usize) {
        self.length += n;
        debug_assert!(self.length <= MAX_MESSAGE_LENGTH);
    }
}

impl Default for KeMessage {
    fn default() -> Self {
        KeMessage::new()
    }
}
