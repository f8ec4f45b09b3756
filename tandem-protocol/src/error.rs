//! Protocol error types and reserved wire codes.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or envelope decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("negative frame length: {0}")]
    NegativeLength(i64),

    #[error("truncated message")]
    Truncated,

    #[error("varint does not fit in 64 bits")]
    VarintOverflow,

    #[error("unsupported wire type {0}")]
    InvalidWireType(u8),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
}

/// Reserved error codes carried in response envelopes.
///
/// These values are part of the protocol contract and must remain stable.
/// `Disconnected` is synthetic: it is never sent on the wire, only delivered
/// locally to waiters when a session tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// Handler-originated error; the message carries the handler's text.
    Handler = 0,
    /// Connection died before the response arrived.
    Disconnected = 1,
    /// No handler registered for the requested method.
    NoSuchMethod = 2,
    /// A message could not be read completely and successfully.
    ReadFailed = 3,
    /// A message could not be written completely and successfully.
    WriteFailed = 4,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::Handler),
            1 => Some(ErrorCode::Disconnected),
            2 => Some(ErrorCode::NoSuchMethod),
            3 => Some(ErrorCode::ReadFailed),
            4 => Some(ErrorCode::WriteFailed),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Handler => write!(f, "handler error"),
            ErrorCode::Disconnected => write!(f, "disconnected"),
            ErrorCode::NoSuchMethod => write!(f, "method not found"),
            ErrorCode::ReadFailed => write!(f, "failed to read message"),
            ErrorCode::WriteFailed => write!(f, "failed to write message"),
        }
    }
}
