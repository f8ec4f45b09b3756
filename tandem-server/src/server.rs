//! Server role façade: TCP listener and accept loop.

use crate::error::ServerError;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tandem_session::{Handler, HandlerMap, Session};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent sessions accepted by this listener.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], tandem_protocol::DEFAULT_PORT)),
            max_connections: 1024,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

/// An accepting peer: binds a listener and attaches a session to every
/// accepted connection.
///
/// Handlers are registered before [`listen`](Server::listen); at listen time
/// the table is frozen into a snapshot that each accepted session receives
/// via [`Session::handle`] before its reader sees any traffic. Sessions are
/// independently owned: closing the server ends the accept loop but leaves
/// established sessions running.
pub struct Server {
    config: ServerConfig,
    handlers: HandlerMap,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Creates a new server with no handlers registered.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            handlers: HandlerMap::new(),
            shutdown,
            running: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        }
    }

    /// Registers a handler for `name`. Last registration wins.
    ///
    /// Must be called before [`listen`](Server::listen): the table is frozen
    /// when the accept loop starts.
    pub fn set_handler(&mut self, name: impl Into<String>, handler: Handler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Binds the configured address and accepts connections until
    /// [`close`](Server::close) is called.
    pub async fn listen(&self) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyListening);
        }

        let listener = match TcpListener::bind(self.config.bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ServerError::Io(e));
            }
        };
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        tracing::info!("listening on {}", local_addr);

        // Frozen snapshot: set_handler after this point is unreachable while
        // the accept loop borrows the server.
        let handlers = self.handlers.clone();
        let mut shutdown = self.shutdown.subscribe();
        let mut sessions: Vec<Weak<Session>> = Vec::new();

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, addr)) => {
                        sessions.retain(|s| s.upgrade().is_some_and(|s| !s.is_closed()));
                        if sessions.len() >= self.config.max_connections {
                            tracing::warn!("connection limit reached, rejecting {}", addr);
                            continue;
                        }

                        tracing::info!("peer connected: {}", addr);
                        stream.set_nodelay(true).ok();
                        // The table goes in with the attach so even a request
                        // already sitting in the socket buffer sees it.
                        let session = Session::attach_with(stream, handlers.clone());
                        sessions.push(Arc::downgrade(&session));
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("listener shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Ends the accept loop. Established sessions keep running; they are
    /// owned by their own reader tasks.
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The bound address, once [`listen`](Server::listen) has bound it.
    /// Useful with a port-0 bind.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tandem_client::{Client, ClientConfig, ClientError};
    use tandem_session::{handler, HandlerError, SessionError};
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn echo_server() -> Server {
        let mut server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
        server.set_handler("echo", handler(|payload| async move { Ok(payload) }));
        server.set_handler(
            "boom",
            handler(|_| async move { Err(HandlerError::new("kaboom")) }),
        );
        server
    }

    async fn spawn_server(server: Server) -> (Arc<Server>, SocketAddr) {
        let server = Arc::new(server);
        let task_server = server.clone();
        tokio::spawn(async move { task_server.listen().await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(addr) = server.local_addr() {
                return (server, addr);
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "server did not bind in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), tandem_protocol::DEFAULT_PORT);
        assert_eq!(config.max_connections, 1024);

        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap()).with_max_connections(2);
        assert_eq!(config.max_connections, 2);
    }

    #[tokio::test]
    async fn test_end_to_end_echo() {
        init_tracing();
        let (server, addr) = spawn_server(echo_server()).await;

        let client = Client::new(ClientConfig::new(addr));
        client.connect().await.unwrap();

        let out = client.call("echo", vec![1, 2, 3]).await.unwrap();
        assert_eq!(&out[..], &[1, 2, 3]);

        client.close().await.unwrap();
        server.close();
    }

    #[tokio::test]
    async fn test_unknown_method_then_echo() {
        let (server, addr) = spawn_server(echo_server()).await;

        let client = Client::new(ClientConfig::new(addr));
        client.connect().await.unwrap();

        let err = client.call("nope", Bytes::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Session(SessionError::MethodNotFound)
        ));

        let out = client.call("echo", vec![9]).await.unwrap();
        assert_eq!(&out[..], &[9]);

        client.close().await.unwrap();
        server.close();
    }

    #[tokio::test]
    async fn test_handler_error_text_crosses_the_wire() {
        let (server, addr) = spawn_server(echo_server()).await;

        let client = Client::new(ClientConfig::new(addr));
        client.connect().await.unwrap();

        let err = client.call("boom", Bytes::new()).await.unwrap_err();
        match err {
            ClientError::Session(SessionError::Handler(message)) => {
                assert_eq!(message, "kaboom")
            }
            other => panic!("expected handler error, got {other:?}"),
        }

        client.close().await.unwrap();
        server.close();
    }

    #[tokio::test]
    async fn test_close_stops_accepting_but_not_sessions() {
        let (server, addr) = spawn_server(echo_server()).await;

        let client = Client::new(ClientConfig::new(addr));
        client.connect().await.unwrap();

        server.close();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while server.is_running() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "accept loop did not stop"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The established session is independently owned and still works.
        let out = client.call("echo", vec![5]).await.unwrap();
        assert_eq!(&out[..], &[5]);

        // New connections are refused once the listener is gone.
        let late = Client::new(
            ClientConfig::new(addr).with_connect_timeout(Duration::from_millis(500)),
        );
        assert!(late.connect().await.is_err());

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_twice_is_refused() {
        let (server, _addr) = spawn_server(echo_server()).await;
        let err = server.listen().await.unwrap_err();
        assert!(matches!(err, ServerError::AlreadyListening));
        server.close();
    }
}
