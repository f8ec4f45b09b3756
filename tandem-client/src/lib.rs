//! # tandem-client
//!
//! Client role façade for tandem.
//!
//! This crate wraps a `tandem-session` [`Session`](tandem_session::Session)
//! with dial-side ergonomics: connect to an address, call methods, close.
//! Peers that also serve inbound calls can use the session directly.

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
