use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use quotebot_x_api::{RateLimitPolicy, RetryPolicy, XApiClient, XApiError};
use serde_json::{Value, json};

/// One canned reply; the last one is repeated once the script runs out.
#[derive(Clone)]
struct Reply {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: Value,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: vec![],
            body,
        }
    }

    fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: vec![],
            body: json!({ "title": "error" }),
        }
    }

    fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            headers: vec![("retry-after", retry_after_secs.to_string())],
            body: json!({ "title": "Too Many Requests" }),
        }
    }
}

#[derive(Default)]
struct Seen {
    queries: Vec<HashMap<String, String>>,
    auth: Vec<String>,
    bodies: Vec<Value>,
}

#[derive(Clone)]
struct StubState {
    script: Arc<Vec<Reply>>,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Seen>>,
}

impl StubState {
    fn next_reply(&self) -> Reply {
        let i = self.hits.fetch_add(1, Ordering::SeqCst);
        let script = &self.script;
        script[i.min(script.len() - 1)].clone()
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        self.seen.lock().expect("locked").auth.push(auth);
    }
}

fn render(reply: Reply) -> Response {
    let mut resp = (reply.status, Json(reply.body)).into_response();
    for (name, value) in reply.headers {
        resp.headers_mut()
            .insert(name, value.parse().expect("valid header"));
    }
    resp
}

async fn search(
    State(state): State<StubState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record_auth(&headers);
    state.seen.lock().expect("locked").queries.push(query);
    render(state.next_reply())
}

async fn create(
    State(state): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record_auth(&headers);
    state.seen.lock().expect("locked").bodies.push(body);
    render(state.next_reply())
}

struct Stub {
    addr: SocketAddr,
    state: StubState,
}

impl Stub {
    async fn start(script: Vec<Reply>) -> Self {
        let state = StubState {
            script: Arc::new(script),
            hits: Arc::default(),
            seen: Arc::default(),
        };
        let app = Router::new()
            .route("/2/tweets/search/recent", get(search))
            .route("/2/tweets", post(create))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub server");
        });

        Self { addr, state }
    }

    fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    fn client(&self, rate_limit_policy: RateLimitPolicy) -> XApiClient {
        XApiClient::builder()
            .base_url(format!("http://{}", self.addr))
            .timeout(Duration::from_secs(5))
            .retry(RetryPolicy {
                min_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                max_times: 2,
                jitter: false,
            })
            .rate_limit_policy(rate_limit_policy)
            .build()
            .expect("client")
    }
}

fn search_body() -> Value {
    json!({
        "data": [
            {
                "id": "1",
                "text": "今日は良い天気ですね、散歩に行きたい",
                "lang": "ja",
                "created_at": "2024-01-01T00:00:00.000Z",
                "public_metrics": {
                    "like_count": 1200,
                    "retweet_count": 300,
                    "reply_count": 40,
                    "quote_count": 5
                }
            },
            { "id": "2", "text": "no metrics here" }
        ],
        "meta": { "result_count": 2 }
    })
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn search_sends_expected_request() {
    let stub = Stub::start(vec![Reply::ok(search_body())]).await;
    let client = stub.client(RateLimitPolicy::Surface);

    let posts = client
        .search_recent("app-token", "(の) lang:ja -is:reply -is:retweet", 500)
        .await
        .expect("search succeeds");

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].public_metrics.like_count, 1200);
    assert_eq!(posts[1].public_metrics.like_count, 0);

    let seen = stub.state.seen.lock().expect("locked");
    assert_eq!(seen.auth, ["Bearer app-token"]);
    let query = &seen.queries[0];
    assert_eq!(query["query"], "(の) lang:ja -is:reply -is:retweet");
    assert_eq!(query["max_results"], "100");
    assert_eq!(query["tweet.fields"], "public_metrics,created_at,lang");
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn search_without_data_is_empty() {
    let stub = Stub::start(vec![Reply::ok(json!({ "meta": { "result_count": 0 } }))]).await;

    let posts = stub
        .client(RateLimitPolicy::Surface)
        .search_recent("t", "rust", 10)
        .await
        .expect("search succeeds");
    assert!(posts.is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn search_rate_limit_is_surfaced_by_default() {
    let stub = Stub::start(vec![Reply::rate_limited(900)]).await;

    let err = stub
        .client(RateLimitPolicy::Surface)
        .search_recent("t", "rust", 10)
        .await
        .expect_err("rate limited");

    assert_eq!(err.retry_after(), Some(Duration::from_secs(900)));
    assert_eq!(stub.hits(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn search_rate_limit_retried_under_retry_policy() {
    let stub = Stub::start(vec![Reply::rate_limited(1), Reply::ok(search_body())]).await;

    let posts = stub
        .client(RateLimitPolicy::Retry)
        .search_recent("t", "rust", 10)
        .await
        .expect("second attempt succeeds");
    assert_eq!(posts.len(), 2);
    assert_eq!(stub.hits(), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn server_errors_retry_then_become_transient() {
    let stub = Stub::start(vec![Reply::status(StatusCode::SERVICE_UNAVAILABLE)]).await;

    let err = stub
        .client(RateLimitPolicy::Surface)
        .search_recent("t", "rust", 10)
        .await
        .expect_err("keeps failing");

    assert!(matches!(err, XApiError::Transient { status: 503, .. }));
    // First attempt plus the retry budget
    assert_eq!(stub.hits(), 3);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn client_errors_are_not_retried() {
    let stub = Stub::start(vec![Reply::status(StatusCode::FORBIDDEN)]).await;

    let err = stub
        .client(RateLimitPolicy::Retry)
        .search_recent("t", "rust", 10)
        .await
        .expect_err("forbidden");

    assert!(matches!(err, XApiError::Rejected { status: 403, .. }));
    assert_eq!(stub.hits(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn invalid_queries_never_reach_the_server() {
    let stub = Stub::start(vec![Reply::ok(search_body())]).await;
    let client = stub.client(RateLimitPolicy::Surface);

    for (token, query) in [("t", "rust min_faves:500"), ("t", " "), ("", "rust")] {
        let err = client
            .search_recent(token, query, 10)
            .await
            .expect_err("invalid");
        assert!(matches!(err, XApiError::Validation { .. }), "{query}");
    }
    assert_eq!(stub.hits(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn publish_sends_quote() {
    let stub = Stub::start(vec![Reply::ok(json!({
        "data": { "id": "99", "text": "いい話ですね" }
    }))])
    .await;

    let created = stub
        .client(RateLimitPolicy::Surface)
        .create_quote_post("user-token", "42", "いい話ですね")
        .await
        .expect("published");
    assert_eq!(created.id, "99");

    let seen = stub.state.seen.lock().expect("locked");
    assert_eq!(seen.auth, ["Bearer user-token"]);
    assert_eq!(
        seen.bodies[0],
        json!({ "text": "いい話ですね", "quote_tweet_id": "42" })
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn publish_never_retries_rate_limit() {
    let stub = Stub::start(vec![Reply::rate_limited(30), Reply::ok(json!({}))]).await;

    // Even with the retrying policy, which only applies to search
    let err = stub
        .client(RateLimitPolicy::Retry)
        .create_quote_post("u", "42", "text")
        .await
        .expect_err("rate limited");

    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    assert_eq!(stub.hits(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn publish_requires_target_and_text() {
    let stub = Stub::start(vec![Reply::ok(json!({}))]).await;
    let client = stub.client(RateLimitPolicy::Surface);

    for (target, text) in [("", "text"), ("42", "   ")] {
        let err = client
            .create_quote_post("u", target, text)
            .await
            .expect_err("invalid");
        assert!(matches!(err, XApiError::Validation { .. }));
    }
    assert_eq!(stub.hits(), 0);
}
