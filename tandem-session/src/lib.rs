//! # tandem-session
//!
//! The tandem session core.
//!
//! This crate provides:
//! - [`Session`]: one connection, many concurrent calls in both directions
//! - Handler registration and per-request dispatch
//! - The in-flight registry correlating responses to callers
//! - Teardown semantics that never leave a caller waiting
//!
//! Both ends of a connection hold the same [`Session`] type; the
//! `tandem-client` and `tandem-server` crates are thin role wrappers over
//! it.

pub mod error;
pub mod handler;
mod inflight;
pub mod session;

pub use error::SessionError;
pub use handler::{handler, Handler, HandlerError, HandlerFuture, HandlerMap};
pub use session::Session;
