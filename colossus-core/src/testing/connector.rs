use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use colossus_model::PING_EVENT;

use crate::error::TransportErrorKind;
use crate::transport::{Connector, SseFrame, SseMessage, StreamRequest};

type FrameResult = Result<SseFrame, TransportErrorKind>;

/// Connector handing out pre-registered in-memory sockets, one per `open`.
///
/// Once every registered socket has been handed out, further opens get a
/// socket that never yields anything.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    inner: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    pending: VecDeque<mpsc::UnboundedReceiver<FrameResult>>,
    opened: usize,
    requests: Vec<StreamRequest>,
}

impl std::fmt::Debug for ScriptedConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ScriptedConnector")
            .field("pending", &state.pending.len())
            .field("opened", &state.opened)
            .finish()
    }
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the socket handed to the next unclaimed `open`.
    pub fn push_socket(&self) -> SocketScript {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().pending.push_back(rx);
        SocketScript { tx }
    }

    /// Number of sockets opened so far.
    pub fn opened(&self) -> usize {
        self.inner.lock().opened
    }

    /// Requests seen by `open`, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.inner.lock().requests.clone()
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, request: &StreamRequest) -> BoxStream<'static, FrameResult> {
        let mut state = self.inner.lock();
        state.opened += 1;
        state.requests.push(request.clone());
        match state.pending.pop_front() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::pending().boxed(),
        }
    }
}

/// Feeds frames into one scripted socket. Dropping it ends the socket.
#[derive(Debug, Clone)]
pub struct SocketScript {
    tx: mpsc::UnboundedSender<FrameResult>,
}

impl SocketScript {
    pub fn open(&self) -> &Self {
        let _ = self.tx.send(Ok(SseFrame::Open));
        self
    }

    pub fn ping(&self) -> &Self {
        self.event(PING_EVENT, "")
    }

    /// Unnamed (`message`) frame.
    pub fn data(&self, data: impl Into<String>) -> &Self {
        self.event("", data)
    }

    pub fn event(&self, name: &str, data: impl Into<String>) -> &Self {
        let _ = self
            .tx
            .send(Ok(SseFrame::Message(SseMessage::new(name, data))));
        self
    }

    pub fn fail(&self, reason: &str) -> &Self {
        let _ = self
            .tx
            .send(Err(TransportErrorKind::Connection(reason.to_owned())));
        self
    }
}
