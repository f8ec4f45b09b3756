//! In-flight call registry.
//!
//! Maps outbound call ids to single-shot delivery slots. Registration,
//! delivery, and drain all linearize through one lock, so a slot is never
//! observed registered without eventually receiving exactly one value:
//! either the matching response or the disconnect sentinel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tandem_protocol::Response;
use tokio::sync::oneshot;

pub(crate) struct Inflight {
    inner: Mutex<Inner>,
    next_id: AtomicU32,
}

struct Inner {
    slots: HashMap<u32, oneshot::Sender<Response>>,
    /// Set by `drain`; once set, registration is refused.
    closed: bool,
}

impl Inflight {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                closed: false,
            }),
            next_id: AtomicU32::new(0),
        }
    }

    /// Allocates a fresh id and installs a delivery slot for it.
    ///
    /// Ids are post-incremented, so the first id handed out is 1. Returns
    /// `None` if the registry has been drained: the session is gone and the
    /// slot would never be completed.
    pub fn register(&self) -> Option<(u32, oneshot::Receiver<Response>)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.slots.insert(id, tx);
        Some((id, rx))
    }

    /// Removes the slot for `id` and deposits `response` into it. A response
    /// with no matching slot is silently discarded.
    pub fn deliver(&self, id: u32, response: Response) {
        let mut inner = self.inner.lock();
        if let Some(tx) = inner.slots.remove(&id) {
            let _ = tx.send(response);
        }
    }

    /// Removes the slot for `id` without delivering anything. Used when the
    /// request write fails and the caller is about to bail out.
    pub fn discard(&self, id: u32) {
        self.inner.lock().slots.remove(&id);
    }

    /// Deposits the disconnect sentinel into every slot and refuses further
    /// registration. Runs once, on the reader loop's exit path, after the
    /// loop has stopped so no delivery can race it. Returns the number of
    /// slots drained.
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let drained = inner.slots.len();
        for (_, tx) in inner.slots.drain() {
            let _ = tx.send(Response::disconnected());
        }
        drained
    }

    /// Number of calls currently awaiting a response.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }
}
