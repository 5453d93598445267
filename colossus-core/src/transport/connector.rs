use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::HeaderMap;
use reqwest_eventsource::{Event, EventSource, retry};
use url::Url;

use colossus_model::Context;

use crate::client::context_headers;
use crate::error::{ClientError, TransportErrorKind};

/// Target of a stream connection: URL plus the headers replayed on every
/// (re)connect.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

impl StreamRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Request authenticated for `ctx`, with a fresh trace id.
    pub fn for_context(url: Url, ctx: &Context) -> Result<Self, ClientError> {
        Ok(Self {
            url,
            headers: context_headers(ctx)?,
        })
    }
}

/// One SSE frame as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Event name; frames without an `event:` line are `message`.
    pub event: String,
    pub data: String,
    pub id: String,
}

impl SseMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        let event = event.into();
        Self {
            event: if event.is_empty() {
                "message".to_owned()
            } else {
                event
            },
            data: data.into(),
            id: String::new(),
        }
    }
}

impl From<eventsource_stream::Event> for SseMessage {
    fn from(event: eventsource_stream::Event) -> Self {
        let mut message = SseMessage::new(event.event, event.data);
        message.id = event.id;
        message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Open,
    Message(SseMessage),
}

/// Opens one underlying socket. Every call must produce an independent
/// stream; the transport drops the previous one before opening the next.
pub trait Connector: Send + Sync + 'static {
    fn open(
        &self,
        request: &StreamRequest,
    ) -> BoxStream<'static, Result<SseFrame, TransportErrorKind>>;
}

/// Production connector on top of `reqwest-eventsource`.
///
/// The library's own retry policy is disabled: reconnects, backoff and the
/// retry budget belong to [`EventStream`](super::EventStream).
#[derive(Debug, Clone, Default)]
pub struct ReqwestConnector {
    client: reqwest::Client,
}

impl ReqwestConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Connector for ReqwestConnector {
    fn open(
        &self,
        request: &StreamRequest,
    ) -> BoxStream<'static, Result<SseFrame, TransportErrorKind>> {
        let builder = self
            .client
            .get(request.url.clone())
            .headers(request.headers.clone());

        let mut source = match EventSource::new(builder) {
            Ok(source) => source,
            Err(err) => {
                let kind = TransportErrorKind::Connection(err.to_string());
                return futures::stream::once(async move { Err(kind) }).boxed();
            }
        };
        source.set_retry_policy(Box::new(retry::Never));

        source
            .map(|event| match event {
                Ok(Event::Open) => Ok(SseFrame::Open),
                Ok(Event::Message(message)) => Ok(SseFrame::Message(message.into())),
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    Err(TransportErrorKind::StreamEnded)
                }
                Err(err) => Err(TransportErrorKind::Connection(err.to_string())),
            })
            .boxed()
    }
}
