//! In-flight request table.
//!
//! Keyed by request id. Each entry owns the one-shot resolver for the waiting
//! `request()` call and remembers the link it was sent on, so losing one
//! transport fails only what went out over it. Ids are random `u32`s, redrawn
//! while they collide with a live entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use protoo_protocol::{Received, Response};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Base of the response deadline window, in milliseconds.
pub const TIMEOUT_BASE_MS: f64 = 1500.0;

/// Response deadline for a request sent while `in_flight` others are pending:
/// `1500 * (15 + 0.1 * in_flight)` ms.
pub fn request_timeout(in_flight: usize) -> Duration {
    let ms = TIMEOUT_BASE_MS * (15.0 + 0.1 * in_flight as f64);
    Duration::from_millis(ms.round() as u64)
}

type IdSource = Box<dyn FnMut() -> u32 + Send>;

struct PendingRequest {
    method: String,
    link: u64,
    deadline: Instant,
    resolver: oneshot::Sender<Received<Response>>,
}

/// A freshly registered request.
pub struct Registration {
    pub id: u32,
    pub deadline: Instant,
    pub response: oneshot::Receiver<Received<Response>>,
}

pub struct InFlight {
    entries: HashMap<u32, PendingRequest>,
    next_id: IdSource,
}

impl InFlight {
    pub fn new() -> Self {
        Self::with_id_source(rand::random::<u32>)
    }

    /// Table drawing ids from `source` instead of the thread RNG.
    pub fn with_id_source(source: impl FnMut() -> u32 + Send + 'static) -> Self {
        Self {
            entries: HashMap::new(),
            next_id: Box::new(source),
        }
    }

    pub fn register(&mut self, method: &str, link: u64, now: Instant) -> Registration {
        let id = loop {
            let candidate = (self.next_id)();
            if !self.entries.contains_key(&candidate) {
                break candidate;
            }
            tracing::trace!(id = candidate, "peer: request id collision, redrawing");
        };
        let deadline = now + request_timeout(self.entries.len());
        let (resolver, response) = oneshot::channel();
        self.entries.insert(
            id,
            PendingRequest {
                method: method.to_owned(),
                link,
                deadline,
                resolver,
            },
        );
        Registration {
            id,
            deadline,
            response,
        }
    }

    /// Hand `response` to its waiter. False when no request has that id.
    pub fn resolve(&mut self, response: Received<Response>) -> bool {
        match self.entries.remove(&response.id) {
            Some(pending) => {
                tracing::trace!(id = response.id, method = %pending.method, "peer: response matched");
                // The waiter may have given up already.
                let _ = pending.resolver.send(response);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u32) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn deadline(&self, id: u32) -> Option<Instant> {
        self.entries.get(&id).map(|p| p.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail the requests sent over `link`. Their waiters observe a closed
    /// channel. Returns how many were failed.
    pub fn fail_link(&mut self, link: u64) -> usize {
        self.fail_where(|pending| pending.link == link)
    }

    /// Fail the requests sent over `link` or any older link.
    pub fn fail_through(&mut self, link: u64) -> usize {
        self.fail_where(|pending| pending.link <= link)
    }

    fn fail_where(&mut self, doomed: impl Fn(&PendingRequest) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, pending| !doomed(pending));
        before - self.entries.len()
    }
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("pending", &self.entries.len())
            .finish()
    }
}

/// Removes the entry when the waiting request future goes away.
pub(crate) struct PendingGuard {
    pub(crate) table: Arc<Mutex<InFlight>>,
    pub(crate) id: u32,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.lock().remove(self.id);
    }
}
