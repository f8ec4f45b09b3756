//! The per-connection session.
//!
//! A session owns one byte-stream connection and multiplexes concurrent
//! method calls over it in both directions. One long-lived reader task
//! demultiplexes inbound frames: responses are delivered to the in-flight
//! registry, requests are dispatched to handlers on their own tasks so a
//! slow handler never blocks the reader. Outbound frames are serialized
//! through a single write lock held across the whole frame.
//!
//! A session lives until the user closes it or the reader observes
//! end-of-stream or an unrecoverable read error; either way the registry is
//! drained with disconnect sentinels before the reader exits, so no caller
//! is left waiting.

use crate::error::SessionError;
use crate::handler::HandlerMap;
use crate::inflight::Inflight;
use arc_swap::ArcSwap;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_protocol::frame::{encode_frame, Decoder};
use tandem_protocol::{Envelope, ErrorCode, Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, Mutex};

/// Read buffer size for socket reads (8 KiB).
const READ_BUFFER_SIZE: usize = 8 * 1024;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A symmetric RPC peer over a single connection.
///
/// Both ends of a connection hold the same type: a session can issue calls
/// with [`call`](Session::call) and serve inbound calls through the table
/// installed with [`handle`](Session::handle), at the same time.
pub struct Session {
    /// Write half; the lock spans the length prefix and the payload, so
    /// frames from concurrent writers never interleave.
    writer: Mutex<BoxedWriter>,
    inflight: Inflight,
    handlers: ArcSwap<HandlerMap>,
    closed: AtomicBool,
    shutdown: broadcast::Sender<()>,
}

impl Session {
    /// Wraps an already-connected byte stream and starts the reader task.
    pub fn attach<S>(stream: S) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::attach_with(stream, HandlerMap::new())
    }

    /// Like [`attach`](Session::attach), but with a handler table already
    /// installed when the reader task starts, so even the very first inbound
    /// request dispatches against it.
    pub fn attach_with<S>(stream: S, handlers: HandlerMap) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (shutdown, _) = broadcast::channel(1);
        let session = Arc::new(Self {
            writer: Mutex::new(Box::new(writer) as BoxedWriter),
            inflight: Inflight::new(),
            handlers: ArcSwap::from_pointee(handlers),
            closed: AtomicBool::new(false),
            shutdown,
        });
        tokio::spawn(Session::read_loop(session.clone(), Box::new(reader)));
        session
    }

    /// Dials `addr` over TCP and attaches a session to the connection.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Arc<Self>, SessionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(Self::attach(stream))
    }

    /// Calls `method` on the peer and waits for its response.
    ///
    /// Concurrent calls share the connection; no ordering is guaranteed
    /// between them. There is no wall-clock timeout: the call completes when
    /// the peer responds or when either side closes the connection.
    pub async fn call(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }

        let (id, slot) = self
            .inflight
            .register()
            .ok_or(SessionError::Disconnected)?;
        let request = Request::new(id, method, payload.into());

        if let Err(e) = self.write_frame(&Envelope::request(request)).await {
            self.inflight.discard(id);
            return Err(e);
        }

        let response = slot.await.map_err(|_| SessionError::Disconnected)?;
        match response.error {
            None => Ok(response.payload),
            Some(error) => Err(match ErrorCode::from_u32(error.code) {
                Some(ErrorCode::Handler) => SessionError::Handler(error.message),
                Some(ErrorCode::Disconnected) => SessionError::Disconnected,
                Some(ErrorCode::NoSuchMethod) => SessionError::MethodNotFound,
                _ => SessionError::Remote {
                    code: error.code,
                    message: error.message,
                },
            }),
        }
    }

    /// Atomically replaces the handler table.
    ///
    /// Safe to call while the reader is running; inbound requests decoded
    /// after the swap see the new table.
    pub fn handle(&self, handlers: HandlerMap) {
        self.handlers.store(Arc::new(handlers));
    }

    /// Closes the session. The reader loop stops, every in-flight caller
    /// observes `Disconnected`, and the connection is shut down. Closing an
    /// already-closed session is a no-op.
    pub async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("closing session");
        let _ = self.shutdown.send(());
        let mut writer = self.writer.lock().await;
        writer.shutdown().await.map_err(SessionError::Io)
    }

    /// Returns whether the session has been closed or torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of calls currently awaiting a response.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Encodes and writes one frame under the write lock.
    ///
    /// Encoding failures leave the stream untouched and surface to the
    /// caller; socket failures leave the connection in an undefined state,
    /// so the reader is signalled to tear the session down.
    async fn write_frame(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let buf = encode_frame(envelope)?;
        let mut writer = self.writer.lock().await;
        let result = match writer.write_all(&buf).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        drop(writer);
        if let Err(e) = result {
            let _ = self.shutdown.send(());
            return Err(SessionError::Io(e));
        }
        Ok(())
    }

    /// Reads frames until EOF, a read failure, or local shutdown, then runs
    /// teardown exactly once.
    async fn read_loop(self: Arc<Self>, mut reader: BoxedReader) {
        let mut shutdown = self.shutdown.subscribe();
        let mut decoder = Decoder::new();
        let mut buf = [0u8; READ_BUFFER_SIZE];

        'outer: loop {
            let n = tokio::select! {
                biased;
                _ = shutdown.recv() => break 'outer,
                result = reader.read(&mut buf) => match result {
                    Ok(0) => {
                        if decoder.buffered() > 0 {
                            tracing::debug!(
                                "peer closed mid-frame with {} bytes buffered",
                                decoder.buffered()
                            );
                        }
                        break 'outer;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        tracing::debug!("read error: {}", e);
                        break 'outer;
                    }
                },
            };

            decoder.extend(&buf[..n]);

            // Drain every complete frame the read produced.
            loop {
                match decoder.decode_envelope() {
                    Ok(Some(envelope)) => {
                        if let Some(request) = envelope.request {
                            let session = self.clone();
                            tokio::spawn(async move { session.dispatch(request).await });
                        } else if let Some(response) = envelope.response {
                            self.inflight.deliver(response.id, response);
                        }
                        // An envelope with neither field is ignored.
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("frame decode failed: {}", e);
                        break 'outer;
                    }
                }
            }
        }

        self.teardown().await;
    }

    /// Invokes the handler for one inbound request and writes the reply.
    async fn dispatch(self: Arc<Self>, request: Request) {
        let handler = self.handlers.load().get(request.method.as_str()).cloned();
        let response = match handler {
            Some(handler) => match handler(request.payload).await {
                Ok(payload) => Response::ok(request.id, payload),
                Err(e) => Response::handler_error(request.id, e.to_string()),
            },
            None => {
                tracing::debug!("no handler for method {:?} (id={})", request.method, request.id);
                Response::no_such_method(request.id)
            }
        };

        // A failed reply write is logged, not propagated: the broken
        // connection surfaces through the reader, which tears down.
        if let Err(e) = self.write_frame(&Envelope::response(response)).await {
            tracing::warn!("failed to write response (id={}): {}", request.id, e);
        }
    }

    /// Runs on the reader's exit path, after the loop has stopped, so no
    /// delivery can race the drain.
    async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained = self.inflight.drain();
        if drained > 0 {
            tracing::debug!("session torn down; {} in-flight calls drained", drained);
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
