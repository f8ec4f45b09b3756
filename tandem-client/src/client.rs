//! Client role façade.
//!
//! A [`Client`] is a session holder for peers that only dial out: connect,
//! call, close. Everything else is the session's behavior; see
//! `tandem-session`.

use crate::error::ClientError;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_session::Session;
use tokio::sync::Mutex;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Peer address to dial.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A dialing peer: wraps an address and, once connected, a session.
pub struct Client {
    config: ClientConfig,
    session: Mutex<Option<Arc<Session>>>,
}

impl Client {
    /// Creates a new client (not yet connected).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Dials the configured address and attaches a session.
    ///
    /// Connecting twice without closing in between is refused.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::debug!("connecting to {}", self.config.addr);
        let attached = tokio::time::timeout(
            self.config.connect_timeout,
            Session::connect(self.config.addr),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout)??;

        *session = Some(attached);
        Ok(())
    }

    /// Calls `method` on the peer. Fails with `NotConnected` before
    /// [`connect`](Client::connect).
    pub async fn call(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, ClientError> {
        let session = self
            .session
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        Ok(session.call(method, payload).await?)
    }

    /// Returns whether a live session is attached.
    pub fn is_connected(&self) -> bool {
        match self.session.try_lock() {
            Ok(session) => session.as_ref().is_some_and(|s| !s.is_closed()),
            Err(_) => false,
        }
    }

    /// Closes the session, if attached. The client can connect again
    /// afterwards.
    pub async fn close(&self) -> Result<(), ClientError> {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await?;
        }
        Ok(())
    }
}
