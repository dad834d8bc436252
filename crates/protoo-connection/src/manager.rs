//! Connection manager -- owns the connect / relay / backoff cycle.
//!
//! `connect()` spawns one cycle task. The task:
//!   1. connects through the transport (publishing `Failed` on error)
//!   2. on success resets the attempt counter, publishes `Open` and pumps
//!      inbound frames as `Message` events, answering pings when the
//!      transport does not
//!   3. on an unexpected drop publishes `Disconnected` and retries
//!   4. sleeps `policy.delay(attempt)`, bumps the counter and stops once it
//!      reaches `policy.max_retries`
//!   5. ends with exactly one `Close(cause)`
//!
//! `Open`, `Message` and `Disconnected` carry the id of the link they belong to.
//!
//! Outbound frames go through a writer task that owns the sink, so `send`
//! never blocks the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::events::{CloseCause, ConnectionEvent, EventBus, EventStream};
use crate::frame::Frame;
use crate::policy::RetryPolicy;
use crate::transport::{FrameSink, FrameStream, Transport};
use crate::{ConnectionError, TransportError};

/// How long a locally initiated close waits for the server's close frame.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of the manager's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting { attempt: u32 },
    Connected { link: u64 },
}

#[derive(Debug)]
enum Outbound {
    Frame(Frame),
    Close,
}

/// Handle to one established transport. Stale once that transport is gone.
#[derive(Debug, Clone)]
pub struct Link {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
    closing: CancellationToken,
}

impl Link {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| ConnectionError::NotConnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

enum State {
    Idle,
    Connecting {
        attempt: u32,
        cancel: CancellationToken,
    },
    Connected {
        link: Link,
    },
}

enum SessionEnd {
    ServerClosed,
    ClientClosed,
    Lost { link: u64, error: TransportError },
}

struct Inner {
    uri: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    bus: EventBus,
    state: Mutex<State>,
    next_link: AtomicU64,
}

/// Cloneable handle; all clones drive the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(uri: impl Into<String>, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                uri: uri.into(),
                transport,
                policy,
                bus: EventBus::new(),
                state: Mutex::new(State::Idle),
                next_link: AtomicU64::new(1),
            }),
        }
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Register a listener. Events published before this call are not replayed.
    pub fn subscribe(&self) -> EventStream {
        self.inner.bus.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.state.lock() {
            State::Idle => ConnectionState::Idle,
            State::Connecting { attempt, .. } => ConnectionState::Connecting { attempt: *attempt },
            State::Connected { link } => ConnectionState::Connected { link: link.id },
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Connected { .. })
    }

    /// Start a connection cycle. No-op unless idle.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        let endpoint = Endpoint::parse(&self.inner.uri)?;
        let cancel = {
            let mut state = self.inner.state.lock();
            if !matches!(*state, State::Idle) {
                tracing::debug!(url = %endpoint, "conn: connect ignored, cycle already running");
                return Ok(());
            }
            let cancel = CancellationToken::new();
            *state = State::Connecting {
                attempt: 0,
                cancel: cancel.clone(),
            };
            cancel
        };
        tokio::spawn(run_cycle(self.inner.clone(), endpoint, cancel));
        Ok(())
    }

    /// End the cycle. Connected: close handshake. Connecting: cancel. Idle: no-op.
    pub fn disconnect(&self) {
        match &*self.inner.state.lock() {
            State::Connected { link } => {
                tracing::info!(link = link.id, "conn: closing");
                link.closing.cancel();
                let _ = link.tx.send(Outbound::Close);
            }
            State::Connecting { attempt, cancel } => {
                tracing::info!(attempt, "conn: cancelling connect cycle");
                cancel.cancel();
            }
            State::Idle => {}
        }
    }

    /// Queue a frame on the current transport.
    pub fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
        self.link().ok_or(ConnectionError::NotConnected)?.send(frame)
    }

    pub fn link(&self) -> Option<Link> {
        match &*self.inner.state.lock() {
            State::Connected { link } => Some(link.clone()),
            _ => None,
        }
    }

    /// Whether `link` is still the live transport.
    pub fn is_current(&self, link: &Link) -> bool {
        self.link_if_current(link.id).is_some()
    }

    /// The live link, provided it is still the one numbered `id`.
    pub fn link_if_current(&self, id: u64) -> Option<Link> {
        match &*self.inner.state.lock() {
            State::Connected { link } if link.id == id => Some(link.clone()),
            _ => None,
        }
    }
}

impl Inner {
    fn set_state(&self, state: State) {
        *self.state.lock() = state;
    }

    async fn run_session(&self, sink: FrameSink, mut stream: FrameStream) -> SessionEnd {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = Link {
            id: self.next_link.fetch_add(1, Ordering::Relaxed),
            tx,
            closing: CancellationToken::new(),
        };
        let writer = tokio::spawn(write_loop(sink, rx, link.id));
        self.set_state(State::Connected { link: link.clone() });
        tracing::info!(url = %self.uri, link = link.id, "conn: open");
        self.bus.publish(ConnectionEvent::Open { link: link.id });

        let auto_pong = !self.transport.answers_pings();
        let end = loop {
            let next = if link.closing.is_cancelled() {
                match tokio::time::timeout(CLOSE_TIMEOUT, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::debug!(link = link.id, "conn: close handshake timed out");
                        break SessionEnd::ClientClosed;
                    }
                }
            } else {
                tokio::select! {
                    next = stream.next() => next,
                    _ = link.closing.cancelled() => continue,
                }
            };

            // Re-read: a local close may have started while we were waiting.
            let closing = link.closing.is_cancelled();
            match next {
                Some(Ok(Frame::Close(frame))) => {
                    if closing {
                        break SessionEnd::ClientClosed;
                    }
                    tracing::info!(
                        link = link.id,
                        code = frame.as_ref().map(|f| f.code),
                        "conn: server closed"
                    );
                    break SessionEnd::ServerClosed;
                }
                Some(Ok(frame)) => {
                    if let (true, Frame::Ping(payload)) = (auto_pong, &frame) {
                        let _ = link.send(Frame::Pong(payload.clone()));
                    }
                    self.bus.publish(ConnectionEvent::Message {
                        link: link.id,
                        frame,
                    });
                }
                Some(Err(error)) if !closing => {
                    break SessionEnd::Lost {
                        link: link.id,
                        error,
                    }
                }
                None if !closing => {
                    break SessionEnd::Lost {
                        link: link.id,
                        error: TransportError::Closed,
                    }
                }
                Some(Err(_)) | None => break SessionEnd::ClientClosed,
            }
        };

        drop(link);
        if !matches!(end, SessionEnd::ClientClosed) {
            writer.abort();
        }
        end
    }
}

async fn run_cycle(inner: Arc<Inner>, endpoint: Endpoint, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    let cause = loop {
        inner.set_state(State::Connecting {
            attempt,
            cancel: cancel.clone(),
        });
        tracing::debug!(url = %endpoint, attempt, "conn: connecting");

        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseCause::Cancelled,
            result = inner.transport.connect(&endpoint) => result,
        };

        match connected {
            Ok((sink, stream)) => {
                attempt = 0;
                match inner.run_session(sink, stream).await {
                    SessionEnd::ServerClosed => break CloseCause::ServerClosed,
                    SessionEnd::ClientClosed => break CloseCause::ClientClosed,
                    SessionEnd::Lost { link, error } => {
                        tracing::warn!(url = %endpoint, link, error = %error, "conn: transport lost");
                        inner.set_state(State::Connecting {
                            attempt,
                            cancel: cancel.clone(),
                        });
                        inner.bus.publish(ConnectionEvent::Disconnected { link });
                    }
                }
            }
            Err(e) => {
                let retryable = e.is_retryable();
                tracing::warn!(url = %endpoint, attempt, error = %e, "conn: connect failed");
                inner.bus.publish(ConnectionEvent::Failed {
                    attempt,
                    error: Arc::new(e),
                });
                if !retryable {
                    break CloseCause::Fatal;
                }
            }
        }

        let delay = inner.policy.delay(attempt);
        tracing::info!(
            url = %endpoint,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "conn: retrying after backoff"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseCause::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
        if inner.policy.is_exhausted(attempt) {
            break CloseCause::RetriesExhausted;
        }
    };

    tracing::info!(url = %endpoint, cause = cause.as_str(), "conn: closed");
    // A `connect()` that observes Idle also observes this Close as published.
    let mut state = inner.state.lock();
    *state = State::Idle;
    inner.bus.publish(ConnectionEvent::Close(cause));
}

async fn write_loop(mut sink: FrameSink, mut rx: mpsc::UnboundedReceiver<Outbound>, link: u64) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(link, error = %e, "conn: write failed");
                    return;
                }
            }
            Outbound::Close => {
                let result = match sink.send(Frame::Close(None)).await {
                    Ok(()) => sink.close().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::debug!(link, error = %e, "conn: close frame not delivered");
                }
                return;
            }
        }
    }
}
