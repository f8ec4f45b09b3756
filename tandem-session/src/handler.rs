//! Method handlers.
//!
//! A handler receives an inbound request's payload and produces the reply
//! payload. Handlers run on their own task, concurrently with each other and
//! with outbound calls; they must not assume any ordering relative to other
//! traffic on the session.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by a handler. The display text crosses the wire verbatim
/// as a handler-originated error (code 0).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// The future a handler invocation resolves to.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Bytes, HandlerError>> + Send>>;

/// A registered method handler.
pub type Handler = Arc<dyn Fn(Bytes) -> HandlerFuture + Send + Sync>;

/// Method name to handler. Names are matched case-sensitively; installing a
/// name twice keeps the later registration.
pub type HandlerMap = HashMap<String, Handler>;

/// Boxes an async closure into a [`Handler`].
///
/// ```
/// use tandem_session::handler;
///
/// let echo = handler(|payload| async move { Ok(payload) });
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, HandlerError>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(f(payload)))
}
