//! Peer -- request/response correlation and inbound dispatch over one
//! connection manager.
//!
//! A session task consumes the manager's events for as long as the peer is
//! open:
//!   - Open / Failed / Disconnected / Close run the lifecycle callbacks
//!   - Disconnected fails the pending requests sent over the lost link, Close
//!     fails whatever the cycle left behind
//!   - text frames are decoded; requests go to the request handler on their
//!     own task, responses resolve their waiter, notifications run inline
//!
//! Every event names its link, so a session task that lags behind a reconnect
//! still answers requests on (and fails requests of) the right transport.
//! Malformed or unmatched inbound traffic is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use protoo_connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, EventStream, Frame, Link, RetryPolicy,
    Transport, WsTransport,
};
use protoo_protocol::{
    decode, encode_text, encode_text_with_data, DataMessage, Message, Notification, Received,
    Request, Response, INTERNAL_ERROR_CODE, NOT_FOUND_CODE, NOT_FOUND_REASON, SUBPROTOCOL,
};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::handler::{PeerHandlers, Reply};
use crate::pending::{InFlight, PendingGuard};
use crate::PeerError;

struct PeerInner {
    manager: ConnectionManager,
    handlers: PeerHandlers,
    in_flight: Arc<Mutex<InFlight>>,
    session: Mutex<Option<JoinHandle<()>>>,
}

/// A protoo client peer. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    /// Peer over WebSocket, advertising the `protoo` subprotocol.
    pub fn new(url: impl Into<String>, policy: RetryPolicy, handlers: PeerHandlers) -> Self {
        Self::with_transport(url, Arc::new(WsTransport::new(SUBPROTOCOL)), policy, handlers)
    }

    pub fn with_transport(
        url: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        handlers: PeerHandlers,
    ) -> Self {
        Self::with_in_flight(url, transport, policy, handlers, InFlight::new())
    }

    /// Like [`Peer::with_transport`] with a caller-supplied request table.
    pub fn with_in_flight(
        url: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
        handlers: PeerHandlers,
        in_flight: InFlight,
    ) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                manager: ConnectionManager::new(url, transport, policy),
                handlers,
                in_flight: Arc::new(Mutex::new(in_flight)),
                session: Mutex::new(None),
            }),
        }
    }

    pub fn url(&self) -> &str {
        self.inner.manager.uri()
    }

    /// Start the session. Calling it while a connection cycle is running does
    /// nothing. Safe to call from `on_close` to reopen.
    pub fn open(&self) -> Result<(), PeerError> {
        let mut session = self.inner.session.lock();
        if self.inner.manager.state() != ConnectionState::Idle {
            return Ok(());
        }

        let events = self.inner.manager.subscribe();
        let task = tokio::spawn(run_session(self.inner.clone(), events));
        if let Err(e) = self.inner.manager.connect() {
            task.abort();
            return Err(e.into());
        }
        tracing::info!(url = %self.url(), "peer: opened");
        *session = Some(task);
        Ok(())
    }

    /// End the session. The close callback fires once the transport is down.
    pub fn close(&self) {
        tracing::info!(url = %self.url(), "peer: closing");
        self.inner.manager.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.inner.manager.is_connected()
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Send a request without payload and wait for its response.
    pub async fn request(&self, method: &str) -> Result<Received<Response>, PeerError> {
        self.send_request(method, None).await
    }

    /// Send a request carrying `data` and wait for its response.
    ///
    /// Error responses are returned as `Ok`; inspect [`Response::is_ok`].
    pub async fn request_with<T: Serialize>(
        &self,
        method: &str,
        data: &T,
    ) -> Result<Received<Response>, PeerError> {
        let data = serde_json::to_value(data).map_err(protoo_protocol::ProtocolError::from)?;
        self.send_request(method, Some(data)).await
    }

    pub fn notify(&self, method: &str) -> Result<(), PeerError> {
        self.send_notification(method, None)
    }

    pub fn notify_with<T: Serialize>(&self, method: &str, data: &T) -> Result<(), PeerError> {
        let data = serde_json::to_value(data).map_err(protoo_protocol::ProtocolError::from)?;
        self.send_notification(method, Some(data))
    }

    async fn send_request(
        &self,
        method: &str,
        data: Option<Value>,
    ) -> Result<Received<Response>, PeerError> {
        let link = self.inner.manager.link().ok_or(PeerError::Closed)?;
        let registration = self
            .inner
            .in_flight
            .lock()
            .register(method, link.id(), Instant::now());
        let id = registration.id;
        let _guard = PendingGuard {
            table: self.inner.in_flight.clone(),
            id,
        };
        // A link lost before registration would never fail this entry.
        if !self.inner.manager.is_current(&link) {
            return Err(PeerError::Closed);
        }

        let request = Request::new(method, id);
        let text = match data {
            Some(data) => encode_text_with_data(&DataMessage::new(request, data))?,
            None => encode_text(&request.into())?,
        };
        send_text(&link, text)?;
        tracing::debug!(id, method, "peer: request sent");

        match tokio::time::timeout_at(registration.deadline, registration.response).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(PeerError::Closed),
            Err(_) => {
                tracing::warn!(id, method, "peer: request timed out");
                Err(PeerError::Timeout {
                    method: method.to_owned(),
                    id,
                })
            }
        }
    }

    fn send_notification(&self, method: &str, data: Option<Value>) -> Result<(), PeerError> {
        let link = self.inner.manager.link().ok_or(PeerError::Closed)?;
        let notification = Notification::new(method);
        let text = match data {
            Some(data) => encode_text_with_data(&DataMessage::new(notification, data))?,
            None => encode_text(&notification.into())?,
        };
        send_text(&link, text)?;
        tracing::debug!(method, "peer: notification sent");
        Ok(())
    }
}

fn send_text(link: &Link, text: String) -> Result<(), PeerError> {
    link.send(Frame::Text(text)).map_err(|_| PeerError::Closed)
}

async fn run_session(inner: Arc<PeerInner>, mut events: EventStream) {
    let mut last_link = None;
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Open { link } => {
                last_link = Some(link);
                if let Some(f) = &inner.handlers.on_open {
                    f();
                }
            }
            ConnectionEvent::Message { link, frame } => inner.handle_frame(link, frame),
            ConnectionEvent::Failed { attempt, error } => {
                if let Some(f) = &inner.handlers.on_failed {
                    f(attempt, error.as_ref());
                }
            }
            ConnectionEvent::Disconnected { link } => {
                let failed = inner.in_flight.lock().fail_link(link);
                if failed > 0 {
                    tracing::debug!(link, failed, "peer: requests on lost link failed");
                }
                if let Some(f) = &inner.handlers.on_disconnected {
                    f();
                }
            }
            ConnectionEvent::Close(cause) => {
                if let Some(link) = last_link {
                    let failed = inner.in_flight.lock().fail_through(link);
                    if failed > 0 {
                        tracing::debug!(failed, "peer: pending requests failed");
                    }
                }
                tracing::info!(url = %inner.manager.uri(), cause = cause.as_str(), "peer: closed");
                if let Some(f) = &inner.handlers.on_close {
                    f(cause);
                }
                break;
            }
        }
    }
}

impl PeerInner {
    fn handle_frame(&self, link: u64, frame: Frame) {
        let text = match frame {
            Frame::Text(text) => text,
            other => {
                tracing::trace!(kind = other.name(), "peer: ignoring non-text frame");
                return;
            }
        };
        let raw = text.into_bytes();
        let message = match decode(&raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "peer: dropping malformed message");
                return;
            }
        };

        match message {
            Message::Request(request) => self.dispatch_request(link, Received::new(request, raw)),
            Message::Response(response) => {
                let id = response.id;
                if !self.in_flight.lock().resolve(Received::new(response, raw)) {
                    tracing::debug!(id, "peer: response for unknown request dropped");
                }
            }
            Message::Notification(notification) => {
                self.dispatch_notification(Received::new(notification, raw))
            }
        }
    }

    /// Answer `request` on `link`, the transport it arrived on.
    fn dispatch_request(&self, link: u64, request: Received<Request>) {
        let manager = self.manager.clone();
        let handler = self.handlers.on_request.clone();

        tokio::spawn(async move {
            let header = request.message().clone();
            let reply = match handler {
                None => Reply::reject(NOT_FOUND_CODE, NOT_FOUND_REASON),
                Some(handler) => match tokio::spawn(async move { handler(request).await }).await {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => {
                        tracing::debug!(id = header.id, method = %header.method, error = %e, "peer: request handler failed");
                        Reply::reject(INTERNAL_ERROR_CODE, e.to_string())
                    }
                    Err(e) => {
                        tracing::warn!(id = header.id, method = %header.method, error = %e, "peer: request handler panicked");
                        Reply::reject(INTERNAL_ERROR_CODE, "request handler panicked")
                    }
                },
            };

            let Some(link) = manager.link_if_current(link) else {
                tracing::debug!(id = header.id, link, "peer: connection replaced, reply dropped");
                return;
            };
            let sent = reply
                .encode_for(&header)
                .map_err(PeerError::from)
                .and_then(|text| send_text(&link, text));
            if let Err(e) = sent {
                tracing::debug!(id = header.id, error = %e, "peer: reply not sent");
            }
        });
    }

    fn dispatch_notification(&self, notification: Received<Notification>) {
        let Some(handler) = &self.handlers.on_notification else {
            tracing::debug!(method = %notification.method, "peer: unhandled notification");
            return;
        };
        let method = notification.method.clone();
        if let Err(e) = handler(notification) {
            tracing::debug!(method = %method, error = %e, "peer: notification handler failed");
        }
    }
}
