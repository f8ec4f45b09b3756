//! # tandem-protocol
//!
//! Wire protocol implementation for tandem.
//!
//! This crate provides:
//! - The `Envelope` / `Request` / `Response` message schema
//! - A tag-length-value binary codec with varint integers
//! - Length-prefix framing with a 16 MiB frame cap
//! - Reserved error codes and protocol constants

pub mod envelope;
pub mod error;
pub mod frame;

pub use envelope::{Envelope, Request, Response, ResponseError};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{decode_frame, encode_frame, Decoder, LEN_PREFIX_SIZE};

/// Default port for tandem peers.
pub const DEFAULT_PORT: u16 = 7450;

/// Maximum envelope size carried by a single frame (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
