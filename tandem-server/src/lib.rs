//! # tandem-server
//!
//! Server role façade for tandem.
//!
//! This crate binds a TCP listener and attaches a
//! [`Session`](tandem_session::Session) to every accepted connection, with
//! the server's handler table installed before the session sees traffic.
//! Accepted sessions are symmetric peers: they can issue calls back to
//! their client as well as serve them.

pub mod error;
pub mod server;

pub use error::ServerError;
pub use server::{Server, ServerConfig};

pub use tandem_session::{handler, Handler, HandlerError, HandlerMap};
