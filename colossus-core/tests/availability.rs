mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::routing::get;
use parking_lot::Mutex;
use serde_json::json;
use url::Url;

use colossus_core::{
    AvailabilityProbe, HostAvailability, HttpAvailabilityProbe, StickyHostConfig,
    StickyHostError, StickyHostResolver, sticky_hint,
};
use colossus_model::headers::STICKY_HOST;

use support::{APP, ctx, serve};

#[derive(Default)]
struct Builder {
    requests: Mutex<Vec<HeaderMap>>,
}

/// Answers as `replica-{index}` with score `index / 10`, where the index is
/// the hint's last segment. Index 9 leaves out the sticky host header.
async fn availability(
    State(builder): State<Arc<Builder>>,
    headers: HeaderMap,
) -> (HeaderMap, String) {
    let hint = headers
        .get(STICKY_HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    builder.requests.lock().push(headers);

    let index: u32 = hint
        .rsplit(':')
        .next()
        .and_then(|segment| segment.parse().ok())
        .unwrap_or(0);

    let mut response = HeaderMap::new();
    response.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if index != 9 {
        response.insert(
            STICKY_HOST,
            HeaderValue::from_str(&format!("replica-{index}")).unwrap(),
        );
    }
    let body = json!({
        "hostname": format!("builder-{index}"),
        "score": f64::from(index) / 10.0,
    });
    (response, body.to_string())
}

async fn builder_server() -> (HttpAvailabilityProbe, Arc<Builder>) {
    let builder = Arc::new(Builder::default());
    let router = Router::new()
        .route(
            "/vtex.builder-hub/v0/{account}/{workspace}/_v/builder/0/availability/{resource}",
            get(availability),
        )
        .with_state(Arc::clone(&builder));
    let addr = serve(router).await.unwrap();
    let endpoint = Url::parse(&format!("http://{addr}/vtex.builder-hub/v0")).unwrap();
    (
        HttpAvailabilityProbe::new(reqwest::Client::new(), endpoint),
        builder,
    )
}

#[tokio::test]
async fn availability_reads_host_header_and_score_body() {
    let (probe, builder) = builder_server().await;
    let hint = sticky_hint(&ctx(), APP, Some(3));

    let availability = probe.probe(&ctx(), APP, &hint).await.unwrap();

    assert_eq!(
        availability,
        HostAvailability {
            host: "replica-3".into(),
            hostname: "builder-3".into(),
            score: 0.3,
            hint: hint.clone(),
        }
    );

    let requests = builder.requests.lock();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent[STICKY_HOST], hint.as_str());
    assert_eq!(sent[CACHE_CONTROL], "no-cache");
    assert_eq!(sent["authorization"], "bearer test-token");
    assert_eq!(sent["user-agent"], "colossus-tests");
}

#[tokio::test]
async fn availability_without_sticky_host_is_missing_host() {
    let (probe, _builder) = builder_server().await;
    let hint = sticky_hint(&ctx(), APP, Some(9));

    let err = probe.probe(&ctx(), APP, &hint).await.unwrap_err();

    let StickyHostError::MissingHost(resource) = err else {
        panic!("expected a missing host error, got {err}");
    };
    assert_eq!(resource, APP);
}

#[tokio::test]
async fn resolver_prefers_the_highest_scoring_replica() {
    let (probe, builder) = builder_server().await;
    let resolver = StickyHostResolver::new(Arc::new(probe), StickyHostConfig::default());

    let best = resolver
        .resolve_best_host(&ctx(), APP, 3, Duration::from_secs(5))
        .await
        .expect("a replica answered");

    assert_eq!(best.host, "replica-2");
    assert_eq!(best.hint, sticky_hint(&ctx(), APP, Some(2)));
    assert_eq!(resolver.hint_for(&ctx(), APP), best.hint);
    assert_eq!(builder.requests.lock().len(), 3);
}
