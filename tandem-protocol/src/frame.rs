//! Length-prefix framing.
//!
//! Frame layout:
//!
//! ```text
//! +--------------------+----------------------+
//! | length: i64 (BE)   | envelope             |
//! | 8 bytes            | length bytes         |
//! +--------------------+----------------------+
//! ```
//!
//! The prefix is big-endian in both directions. `length` must be
//! non-negative and at most [`MAX_FRAME_SIZE`]; the bound is checked before
//! any payload bytes are waited on, so an oversized or negative prefix fails
//! immediately.

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, BytesMut};

/// Size of the frame length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 8;

/// Encodes an envelope into a complete frame: prefix and payload in one
/// buffer, so a single locked write puts the whole frame on the wire.
pub fn encode_frame(envelope: &Envelope) -> Result<BytesMut, ProtocolError> {
    let body = envelope.encode();
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + body.len());
    buf.put_i64(body.len() as i64);
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Attempts to decode the next frame from the buffer.
///
/// Returns `Ok(Some(envelope))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol errors.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Envelope>, ProtocolError> {
    if buf.len() < LEN_PREFIX_SIZE {
        return Ok(None);
    }

    // Peek at the prefix without consuming.
    let len = i64::from_be_bytes(buf[..LEN_PREFIX_SIZE].try_into().unwrap());
    if len < 0 {
        return Err(ProtocolError::NegativeLength(len));
    }
    if len as u64 > MAX_FRAME_SIZE as u64 {
        return Err(ProtocolError::FrameTooLarge {
            size: len as usize,
            max: MAX_FRAME_SIZE,
        });
    }

    let len = len as usize;
    if buf.len() < LEN_PREFIX_SIZE + len {
        return Ok(None);
    }

    buf.advance(LEN_PREFIX_SIZE);
    let body = buf.split_to(len).freeze();
    Envelope::decode(body).map(Some)
}

/// Incremental frame decoder over a growable buffer.
///
/// Socket reads land in the decoder via [`extend`](Decoder::extend); complete
/// envelopes come out of [`decode_envelope`](Decoder::decode_envelope).
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next envelope from the buffer.
    pub fn decode_envelope(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        decode_frame(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
