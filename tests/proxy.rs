//! End-to-end proxy tests against a synthetic upstream
//!
//! Each test spawns a real upstream server on an ephemeral port and a
//! proxy in front of it, then drives traffic through the proxy with a
//! plain HTTP client.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Duration, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use llm_key_proxy::config::{ProbeConfig, Settings};
use llm_key_proxy::server::routes::create_router;
use llm_key_proxy::server::AppState;
use llm_key_proxy::services::key_pool::{KeyPool, SelectionStrategy};
use llm_key_proxy::services::HealthProber;

const GOOD_KEY: &str = "goodkey-aaaaaaaaaaaa";
const BAD_KEY: &str = "badkey-bbbbbbbbbbbbb";

#[derive(Clone, Default)]
struct UpstreamState {
    hits: Arc<AtomicUsize>,
}

/// Extract the bearer token from an Authorization header
fn bearer(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string()
}

/// Upstream handler: 401 for keys starting with "badkey", otherwise a
/// 200 echoing the serving key and the request body
async fn upstream_echo(
    State(state): State<UpstreamState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let key = bearer(&headers);
    if key.starts_with("badkey") {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"error":{"type":"authentication_error","message":"invalid api key"}}"#,
        )
            .into_response();
    }
    ([("x-served-key", key)], body).into_response()
}

const SSE_BODY: &str = "data: one\n\ndata: two\n\ndata: [DONE]\n\n";

async fn upstream_sse(State(state): State<UpstreamState>) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        SSE_BODY,
    )
        .into_response()
}

async fn spawn_server(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_upstream(state: UpstreamState) -> SocketAddr {
    let router = Router::new()
        .route("/v1/stream", get(upstream_sse))
        .fallback(upstream_echo)
        .with_state(state);
    spawn_server(router).await
}

async fn spawn_proxy(upstream: SocketAddr, api_keys: Vec<String>) -> SocketAddr {
    let settings = Settings {
        target_url: format!("http://{}", upstream),
        api_keys,
        selection_strategy: SelectionStrategy::Random,
        ..Default::default()
    };
    let state = AppState::new(settings).unwrap();
    spawn_server(create_router(state)).await
}

fn proxy_url(proxy: SocketAddr, path: &str) -> String {
    format!("http://{}{}", proxy, path)
}

#[tokio::test]
async fn sse_round_trip_preserves_lines() {
    let upstream = spawn_upstream(UpstreamState::default()).await;
    let proxy = spawn_proxy(upstream, vec![]).await;

    let resp = reqwest::Client::new()
        .get(proxy_url(proxy, "/v1/stream"))
        .header("authorization", format!("Bearer {}", GOOD_KEY))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(resp.text().await.unwrap(), SSE_BODY);
}

#[tokio::test]
async fn missing_authorization_is_bad_request() {
    let upstream_state = UpstreamState::default();
    let upstream = spawn_upstream(upstream_state.clone()).await;
    let proxy = spawn_proxy(upstream, vec![]).await;

    let resp = reqwest::Client::new()
        .get(proxy_url(proxy, "/v1/models"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
    // No upstream call is made for caller input errors.
    assert_eq!(upstream_state.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn blank_keys_are_bad_request() {
    let upstream = spawn_upstream(UpstreamState::default()).await;
    let proxy = spawn_proxy(upstream, vec![]).await;

    let resp = reqwest::Client::new()
        .get(proxy_url(proxy, "/v1/models"))
        .header("authorization", "Bearer  , ,")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn unauthorized_key_cools_down_and_traffic_shifts() {
    let upstream = spawn_upstream(UpstreamState::default()).await;
    let proxy = spawn_proxy(upstream, vec![]).await;
    let client = reqwest::Client::new();

    // Burn the bad key: the 401 is relayed as-is and starts a cooldown.
    let resp = client
        .get(proxy_url(proxy, "/v1/models"))
        .header("authorization", format!("Bearer {}", BAD_KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    // Every request inside the cooldown window must route to the
    // surviving key, regardless of random selection.
    for _ in 0..10 {
        let resp = client
            .get(proxy_url(proxy, "/v1/models"))
            .header("authorization", format!("Bearer {},{}", BAD_KEY, GOOD_KEY))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(
            resp.headers()
                .get("x-served-key")
                .and_then(|v| v.to_str().ok()),
            Some(GOOD_KEY)
        );
    }

    // Stats show the cooldown deadline roughly 10s out and the good
    // key unaffected.
    let stats: serde_json::Value = client
        .get(proxy_url(proxy, "/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let bad = &stats["badkey-bbb..."];
    assert_eq!(bad["healthy"], true);
    let failed_until: DateTime<Utc> = bad["failed_until"]
        .as_str()
        .expect("failed_until present")
        .parse()
        .unwrap();
    let now = Utc::now();
    assert!(failed_until > now + Duration::seconds(5));
    assert!(failed_until < now + Duration::seconds(15));

    let good = &stats["goodkey-aa..."];
    assert_eq!(good["healthy"], true);
    assert!(good.get("failed_until").is_none());
    assert_eq!(good["requests"].as_u64().unwrap(), 10);
}

#[tokio::test]
async fn cooled_down_pool_returns_503_without_upstream_call() {
    let upstream_state = UpstreamState::default();
    let upstream = spawn_upstream(upstream_state.clone()).await;
    let proxy = spawn_proxy(upstream, vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(proxy_url(proxy, "/v1/models"))
        .header("authorization", format!("Bearer {}", BAD_KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(upstream_state.hits.load(Ordering::SeqCst), 1);

    let resp = client
        .get(proxy_url(proxy, "/v1/models"))
        .header("authorization", format!("Bearer {}", BAD_KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    // Capacity errors never reach the upstream.
    assert_eq!(upstream_state.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_error_leaves_key_eligible() {
    let hits = Arc::new(AtomicUsize::new(0));
    let flaky_hits = hits.clone();
    // First request fails with 500, later ones succeed.
    let router = Router::new().fallback(move || {
        let hits = flaky_hits.clone();
        async move {
            if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
            } else {
                (StatusCode::OK, "ok").into_response()
            }
        }
    });
    let upstream = spawn_server(router).await;
    let proxy = spawn_proxy(upstream, vec![]).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(proxy_url(proxy, "/v1/models"))
        .header("authorization", format!("Bearer {}", GOOD_KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 500);
    assert_eq!(resp.text().await.unwrap(), "boom");

    // A 5xx must not disable the key: the next selection may return it.
    let resp = client
        .get(proxy_url(proxy, "/v1/models"))
        .header("authorization", format!("Bearer {}", GOOD_KEY))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn error_body_is_relayed_atomically() {
    let router = Router::new().fallback(|| async {
        (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"error":"no such model"}"#,
        )
    });
    let upstream = spawn_server(router).await;
    let proxy = spawn_proxy(upstream, vec![]).await;

    let resp = reqwest::Client::new()
        .get(proxy_url(proxy, "/v1/models/unknown"))
        .header("authorization", format!("Bearer {}", GOOD_KEY))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    assert_eq!(resp.text().await.unwrap(), r#"{"error":"no such model"}"#);
}

#[tokio::test]
async fn redirect_is_relayed_not_followed() {
    let router = Router::new()
        .route(
            "/old",
            get(|| async {
                (StatusCode::FOUND, [(header::LOCATION, "/new")], "").into_response()
            }),
        )
        .fallback(|| async { "landed" });
    let upstream = spawn_server(router).await;
    let proxy = spawn_proxy(upstream, vec![GOOD_KEY.to_string()]).await;

    // What to do with a redirect is the caller's decision, so the test
    // client must not follow it either.
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let resp = client.get(proxy_url(proxy, "/old")).send().await.unwrap();

    assert_eq!(resp.status().as_u16(), 302);
    assert_eq!(
        resp.headers().get("location").and_then(|v| v.to_str().ok()),
        Some("/new")
    );
}

#[tokio::test]
async fn probe_flags_rejected_keys_and_recovers() {
    // Upstream rejects the bad key until the accept flag flips.
    let accept_all = Arc::new(AtomicBool::new(false));
    let flag = accept_all.clone();
    let router = Router::new().fallback(move |headers: HeaderMap| {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) || !bearer(&headers).starts_with("badkey") {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            }
        }
    });
    let upstream = spawn_server(router).await;

    let pool = Arc::new(KeyPool::new(
        SelectionStrategy::Random,
        StdDuration::from_secs(10),
    ));
    pool.upsert_keys(&[BAD_KEY.to_string(), GOOD_KEY.to_string()]);

    let config = ProbeConfig {
        enabled: true,
        health_path: "/v1/models".to_string(),
        interval_seconds: 1,
        timeout_seconds: 5,
    };
    let handle = HealthProber::new(
        reqwest::Client::new(),
        pool.clone(),
        &format!("http://{}", upstream),
        &config,
    )
    .spawn();

    let health_of = |key: &str| {
        pool.snapshot()
            .into_iter()
            .find(|s| s.key == key)
            .map(|s| s.healthy)
    };

    // The first probe round fires as soon as the loop starts.
    tokio::time::sleep(StdDuration::from_millis(500)).await;
    assert_eq!(health_of(BAD_KEY), Some(false));
    assert_eq!(health_of(GOOD_KEY), Some(true));

    // Once the upstream accepts the key again, a later round restores
    // its health flag without any live traffic.
    accept_all.store(true, Ordering::SeqCst);
    tokio::time::sleep(StdDuration::from_millis(1500)).await;
    assert_eq!(health_of(BAD_KEY), Some(true));

    handle.abort();
}

#[tokio::test]
async fn static_pool_overrides_caller_credentials() {
    let upstream = spawn_upstream(UpstreamState::default()).await;
    let proxy = spawn_proxy(upstream, vec![GOOD_KEY.to_string()]).await;

    // No Authorization header needed; the static pool supplies the key
    // and the upstream sees it as the bearer credential.
    let resp = reqwest::Client::new()
        .get(proxy_url(proxy, "/v1/models"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers()
            .get("x-served-key")
            .and_then(|v| v.to_str().ok()),
        Some(GOOD_KEY)
    );
}

#[tokio::test]
async fn request_body_is_forwarded() {
    let upstream = spawn_upstream(UpstreamState::default()).await;
    let proxy = spawn_proxy(upstream, vec![GOOD_KEY.to_string()]).await;

    let payload = r#"{"model":"test-model","messages":[{"role":"user","content":"hi"}]}"#;
    let resp = reqwest::Client::new()
        .post(proxy_url(proxy, "/v1/chat/completions"))
        .header("content-type", "application/json")
        .body(payload)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), payload);
}

#[tokio::test]
async fn health_endpoint_tracks_pool_eligibility() {
    let upstream = spawn_upstream(UpstreamState::default()).await;
    let proxy = spawn_proxy(upstream, vec![BAD_KEY.to_string()]).await;
    let client = reqwest::Client::new();

    // Fresh pool: eligible.
    let resp = client.get(proxy_url(proxy, "/health")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "Service is healthy");

    // The only key gets rejected and cools down: unhealthy.
    let resp = client.get(proxy_url(proxy, "/v1/models")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let resp = client.get(proxy_url(proxy, "/health")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    assert_eq!(resp.text().await.unwrap(), "Service is unhealthy");
}
