//! Connection events and their fan-out.
//!
//! Every subscriber gets its own unbounded queue, so a slow listener never
//! stalls the cycle task or the other listeners. Delivery order is publish
//! order for each listener.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::frame::Frame;
use crate::TransportError;

/// Lifecycle and traffic of a connection cycle.
///
/// `link` is the id of the transport an event belongs to (see
/// [`crate::Link::id`]). Listeners that fall behind a reconnect use it to tell
/// traffic of a dead transport from traffic of the live one.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Transport is up. Reported after every successful (re)connect.
    Open { link: u64 },
    /// Inbound frame, in arrival order.
    Message { link: u64, frame: Frame },
    /// An established transport dropped without a close handshake. A retry follows.
    Disconnected { link: u64 },
    /// A connect attempt failed.
    Failed {
        attempt: u32,
        error: Arc<TransportError>,
    },
    /// Terminal. No further events follow for this cycle.
    Close(CloseCause),
}

/// Why a connection cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    ServerClosed,
    ClientClosed,
    RetriesExhausted,
    Cancelled,
    Fatal,
}

impl CloseCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseCause::ServerClosed => "server-closed",
            CloseCause::ClientClosed => "client-closed",
            CloseCause::RetriesExhausted => "retries-exhausted",
            CloseCause::Cancelled => "cancelled",
            CloseCause::Fatal => "fatal",
        }
    }
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Open { .. } => "open",
            ConnectionEvent::Message { .. } => "message",
            ConnectionEvent::Disconnected { .. } => "disconnected",
            ConnectionEvent::Failed { .. } => "failed",
            ConnectionEvent::Close(_) => "close",
        }
    }
}

/// Multi-listener event publisher.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        EventStream { rx }
    }

    /// Deliver `event` to every live listener. Dropped listeners are pruned.
    pub fn publish(&self, event: ConnectionEvent) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
        tracing::trace!(event = event.name(), listeners = listeners.len(), "published");
    }

    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|tx| !tx.is_closed());
        listeners.len()
    }
}

/// One listener's view of the event sequence.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = ConnectionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
