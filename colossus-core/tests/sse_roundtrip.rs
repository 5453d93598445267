mod support;

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use futures::{Stream, StreamExt, stream};
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::timeout;
use url::Url;

use colossus_core::router::{ChannelEvent, Filter, events_url, route};
use colossus_core::{
    ConnectionState, EventStream, Listen, ReqwestConnector, StreamConfig, StreamEvent,
    StreamRequest, TransportErrorKind,
};
use colossus_model::BUILDER_HUB_SENDER;

use support::{APP, ctx, serve};

#[derive(Default)]
struct Feed {
    connections: AtomicUsize,
    authorization: Mutex<Vec<String>>,
}

/// Sends a ping and one build status per connection, then ends the
/// response.
async fn events(
    State(feed): State<Arc<Feed>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let connection = feed.connections.fetch_add(1, Ordering::SeqCst);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        feed.authorization.lock().push(auth.to_owned());
    }

    let status = json!({
        "sender": format!("{BUILDER_HUB_SENDER}@0.271.0"),
        "subject": APP,
        "level": "info",
        "body": { "code": if connection == 0 { "start" } else { "success" } }
    });
    let frames = vec![
        Event::default().event("ping").data("{}"),
        Event::default().data("{broken"),
        Event::default().data(status.to_string()),
    ];
    Sse::new(stream::iter(frames.into_iter().map(Ok)))
}

async fn feed_server() -> (Url, Arc<Feed>) {
    let feed = Arc::new(Feed::default());
    let router = Router::new()
        .route("/colossus/v0/{account}/{workspace}/events", get(events))
        .with_state(Arc::clone(&feed));
    let addr = serve(router).await.unwrap();
    let endpoint = Url::parse(&format!("http://{addr}/colossus/v0")).unwrap();
    (endpoint, feed)
}

fn fast_config() -> StreamConfig {
    StreamConfig {
        reconnect_backoff_ms: 20,
        ..StreamConfig::default()
    }
}

#[tokio::test]
async fn routed_messages_survive_server_side_hangups() {
    let (endpoint, feed) = feed_server().await;
    let url = events_url(&endpoint, &ctx(), BUILDER_HUB_SENDER, &["build.status"]).unwrap();
    let request = StreamRequest::for_context(url, &ctx()).unwrap();

    let stream = EventStream::new(
        request,
        Arc::new(ReqwestConnector::default()),
        fast_config(),
    );
    let mut errors = stream.events(&[Listen::Error]);
    let mut routed = route(&stream, Filter::subject(APP));
    stream.connect();

    let mut codes = Vec::new();
    let mut malformed = 0;
    timeout(Duration::from_secs(10), async {
        while codes.len() < 2 {
            match routed.next().await {
                Some(ChannelEvent::Message(message)) => {
                    codes.push(message.body_code().unwrap_or_default().to_owned());
                }
                Some(ChannelEvent::Malformed(_)) => malformed += 1,
                Some(ChannelEvent::Lost(err)) => panic!("stream lost: {err}"),
                None => panic!("routed stream ended"),
            }
        }
    })
    .await
    .expect("frames from two connections");

    assert_eq!(codes, vec!["start", "success"]);
    assert_eq!(malformed, 2);
    assert!(feed.connections.load(Ordering::SeqCst) >= 2);
    assert!(
        feed.authorization
            .lock()
            .iter()
            .all(|auth| auth == "bearer test-token")
    );

    let Some(StreamEvent::Error(first)) = errors.next().await else {
        panic!("expected the first hangup to surface as an error");
    };
    assert_eq!(first.kind, TransportErrorKind::StreamEnded);
    assert!(!first.terminal);
    assert!(stream.stats().last_heartbeat.is_some());

    stream.close();
    assert_eq!(stream.state(), ConnectionState::Closed);
    timeout(Duration::from_secs(5), async {
        while routed.next().await.is_some() {}
    })
    .await
    .expect("routed stream ends once the transport is closed");
}

#[tokio::test]
async fn unreachable_endpoint_exhausts_the_retry_budget() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = Url::parse(&format!("http://{addr}/colossus/v0/acme/dev/events")).unwrap();
    let stream = EventStream::new(
        StreamRequest::new(url),
        Arc::new(ReqwestConnector::default()),
        fast_config(),
    );
    let mut routed = route(&stream, Filter::subject(APP));
    stream.connect();

    let lost = timeout(Duration::from_secs(10), routed.next())
        .await
        .expect("retry budget exhausted in time");
    let Some(ChannelEvent::Lost(err)) = lost else {
        panic!("expected the stream to be lost");
    };
    assert!(err.terminal);
    assert_eq!(err.error_count, fast_config().max_retries + 1);
    assert!(matches!(err.kind, TransportErrorKind::Connection(_)));
    assert!(routed.next().await.is_none());
    assert!(stream.is_closed());
}
