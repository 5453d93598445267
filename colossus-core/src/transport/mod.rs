//! Resilient client for a single server-sent event stream.
//!
//! An [`EventStream`] owns one logical stream and a driver task that keeps an
//! underlying socket alive behind it. Sockets come and go (transport errors,
//! missed heartbeats); listeners and channel views registered on the
//! `EventStream` survive every reconnect and only stop when the stream is
//! closed, either explicitly or because the retry budget ran out.

mod connector;
mod driver;
mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::StreamConfig;
use crate::error::{TransportError, TransportErrorKind};

pub use connector::{Connector, ReqwestConnector, SseFrame, SseMessage, StreamRequest};
use driver::Driver;
use registry::{Handler, Registry};

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Open,
    Message(SseMessage),
    Error(TransportError),
}

/// What a listener is interested in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Listen {
    Open,
    Error,
    /// SSE frames with this event name (`message` for unnamed frames).
    Event(String),
}

impl Listen {
    pub fn message() -> Self {
        Listen::Event("message".to_owned())
    }

    pub fn event(name: impl Into<String>) -> Self {
        Listen::Event(name.into())
    }

    fn accepts(&self, event: &StreamEvent) -> bool {
        match (self, event) {
            (Listen::Open, StreamEvent::Open) => true,
            (Listen::Error, StreamEvent::Error(_)) => true,
            (Listen::Event(name), StreamEvent::Message(message)) => *name == message.event,
            _ => false,
        }
    }
}

/// Handle returned by [`EventStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but `connect` not called yet.
    Idle,
    Connecting,
    Open,
    /// Last socket failed; a reconnect is pending.
    Erroring,
    Closed,
}

/// Snapshot of a stream's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStats {
    pub state: ConnectionState,
    /// Consecutive failures since the last heartbeat or message.
    pub retry_count: u32,
    /// Reconnects performed over the stream's lifetime.
    pub restart_count: u32,
    /// Errors delivered over the stream's lifetime.
    pub error_count: u32,
    pub last_heartbeat: Option<Instant>,
    /// The `H - ε` mark passed without a heartbeat.
    pub heartbeat_due: bool,
}

impl Default for TransportStats {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            retry_count: 0,
            restart_count: 0,
            error_count: 0,
            last_heartbeat: None,
            heartbeat_due: false,
        }
    }
}

/// State shared between the handle and the driver task.
pub(crate) struct Shared {
    registry: Mutex<Registry>,
    stats: Mutex<TransportStats>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            stats: Mutex::new(TransportStats::default()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs every matching listener in registration order. Nothing is
    /// delivered once the stream is closed, including the remainder of a
    /// dispatch that a listener closed midway.
    pub(crate) fn dispatch(&self, event: &StreamEvent) {
        if self.is_closed() {
            return;
        }
        let handlers = self.registry.lock().matching(event);
        for handler in handlers {
            if self.is_closed() {
                break;
            }
            handler(event);
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut stats = self.stats.lock();
        if stats.state != ConnectionState::Closed {
            stats.state = state;
        }
    }

    pub(crate) fn record_heartbeat(&self, at: Instant) {
        let mut stats = self.stats.lock();
        stats.retry_count = 0;
        stats.last_heartbeat = Some(at);
        stats.heartbeat_due = false;
    }

    pub(crate) fn record_message(&self) {
        self.stats.lock().retry_count = 0;
    }

    pub(crate) fn mark_heartbeat_due(&self) {
        self.stats.lock().heartbeat_due = true;
    }

    pub(crate) fn record_restart(&self) -> u32 {
        let mut stats = self.stats.lock();
        stats.restart_count += 1;
        stats.restart_count
    }

    /// Counts a failure and builds the error handed to listeners.
    pub(crate) fn record_error(&self, kind: TransportErrorKind, max_retries: u32) -> TransportError {
        let mut stats = self.stats.lock();
        stats.error_count += 1;
        stats.retry_count += 1;
        if stats.state != ConnectionState::Closed {
            stats.state = ConnectionState::Erroring;
        }
        TransportError {
            kind,
            restart_count: stats.restart_count,
            error_count: stats.error_count,
            terminal: stats.retry_count > max_retries,
        }
    }

    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.registry.lock().clear();
        self.stats.lock().state = ConnectionState::Closed;
    }

    fn subscribe(&self, listen: Listen, handler: Handler) -> Option<ListenerToken> {
        let mut registry = self.registry.lock();
        // Checked under the lock so a concurrent close cannot leave a
        // listener behind in a cleared registry.
        if self.is_closed() {
            return None;
        }
        Some(registry.insert(listen, handler))
    }
}

/// One logical event stream.
///
/// Register listeners with [`subscribe`](Self::subscribe) or take a channel
/// view with [`events`](Self::events), then call [`connect`](Self::connect).
/// Dropping the handle closes the stream.
pub struct EventStream {
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
    url: String,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("url", &self.url)
            .field("stats", &self.stats())
            .finish()
    }
}

impl EventStream {
    pub fn new(
        request: StreamRequest,
        connector: Arc<dyn Connector>,
        config: StreamConfig,
    ) -> Self {
        let shared = Arc::new(Shared::new());
        let url = request.url.to_string();
        let driver = Driver::new(request, connector, config, Arc::clone(&shared));
        Self {
            shared,
            driver: Mutex::new(Some(driver)),
            url,
        }
    }

    /// Starts the driver task. Non-blocking; connection failures surface as
    /// [`StreamEvent::Error`]. Calling it again is a no-op.
    pub fn connect(&self) {
        let Some(driver) = self.driver.lock().take() else {
            return;
        };
        if self.shared.is_closed() {
            return;
        }
        debug!(url = %self.url, "starting event stream");
        self.shared.set_state(ConnectionState::Connecting);
        tokio::spawn(driver.run());
    }

    pub fn subscribe<F>(&self, listen: Listen, handler: F) -> Option<ListenerToken>
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.shared.subscribe(listen, Arc::new(handler))
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.shared.registry.lock().remove(token)
    }

    pub fn on_open<F>(&self, handler: F) -> Option<ListenerToken>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Listen::Open, move |_| handler())
    }

    pub fn on_message<F>(&self, handler: F) -> Option<ListenerToken>
    where
        F: Fn(&SseMessage) + Send + Sync + 'static,
    {
        self.add_event_listener("message", handler)
    }

    pub fn on_error<F>(&self, handler: F) -> Option<ListenerToken>
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.subscribe(Listen::Error, move |event| {
            if let StreamEvent::Error(err) = event {
                handler(err);
            }
        })
    }

    pub fn add_event_listener<F>(&self, name: &str, handler: F) -> Option<ListenerToken>
    where
        F: Fn(&SseMessage) + Send + Sync + 'static,
    {
        self.subscribe(Listen::event(name), move |event| {
            if let StreamEvent::Message(message) = event {
                handler(message);
            }
        })
    }

    /// Channel view over the events selected by `listens`, in receipt
    /// order. The stream ends when the transport closes.
    pub fn events(&self, listens: &[Listen]) -> UnboundedReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let tx = Arc::new(tx);
        for listen in listens {
            let tx = Arc::clone(&tx);
            self.subscribe(listen.clone(), move |event| {
                let _ = tx.send(event.clone());
            });
        }
        UnboundedReceiverStream::new(rx)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    pub fn stats(&self) -> TransportStats {
        self.shared.stats.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.stats().state
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Cancels pending reconnects and watchdogs, drops the socket and all
    /// listeners. Idempotent.
    pub fn close(&self) {
        if !self.shared.is_closed() {
            debug!(url = %self.url, "closing event stream");
        }
        self.driver.lock().take();
        self.shared.close();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shared.close();
    }
}
