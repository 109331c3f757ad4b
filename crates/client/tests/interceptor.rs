//! Interceptor behaviour tests against an in-process stub backend.
//!
//! The stub speaks just enough of the auth API to script the interesting
//! cases: it counts refresh calls, can be told to fail them, and records
//! every `Authorization` header seen on the protected route.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use moviehub_client::{ApiClient, ApiClientBuilder, ClientError, ClientSession};

// ---------------------------------------------------------------------------
// Stub backend
// ---------------------------------------------------------------------------

struct StubState {
    /// Number of times `/api/auth/refresh` was called.
    refresh_calls: AtomicUsize,
    /// When set, refresh answers 401 instead of renewing.
    fail_refresh: AtomicBool,
    /// Artificial latency inside the refresh handler, to widen the window
    /// in which concurrent requests pile up behind one refresh.
    refresh_delay_ms: AtomicU64,
    /// Access-token lifetime (seconds) granted by `/api/auth/login`.
    login_ttl_secs: AtomicU64,
    /// When set, logout answers 500.
    fail_logout: AtomicBool,
    /// Authorization header of every request to `/api/widgets`, in order.
    seen_bearers: Mutex<Vec<Option<String>>>,
}

impl StubState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
            refresh_delay_ms: AtomicU64::new(0),
            login_ttl_secs: AtomicU64::new(300),
            fail_logout: AtomicBool::new(false),
            seen_bearers: Mutex::new(Vec::new()),
        })
    }
}

fn auth_body(token: &str, ttl: chrono::Duration) -> serde_json::Value {
    json!({
        "token": token,
        "refreshToken": "refresh-0",
        "email": "alice@example.com",
        "expiresAt": (Utc::now() + ttl).to_rfc3339(),
    })
}

async fn stub_login(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    let ttl = chrono::Duration::seconds(state.login_ttl_secs.load(Ordering::SeqCst) as i64);
    Json(auth_body("login-token", ttl))
}

async fn stub_refresh(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    let call = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

    if state.fail_refresh.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid refresh token"})),
        );
    }

    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    // Long-lived replacement so one renewal settles the test.
    (
        StatusCode::OK,
        Json(auth_body(
            &format!("token-{call}"),
            chrono::Duration::minutes(5),
        )),
    )
}

async fn stub_logout(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    if state.fail_logout.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Something went wrong"})),
        );
    }
    (StatusCode::OK, Json(json!({"message": "Logged out successfully"})))
}

/// Protected resource. Accepts any bearer token except `stale`, which
/// simulates a token the server no longer honours.
async fn stub_widgets(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    state
        .seen_bearers
        .lock()
        .expect("bearer log poisoned")
        .push(bearer.clone());

    match bearer.as_deref() {
        Some("Bearer stale") | None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid or expired token"})),
        ),
        Some(_) => (StatusCode::OK, Json(json!({"ok": true}))),
    }
}

async fn spawn_stub(state: Arc<StubState>) -> String {
    let app = Router::new()
        .route("/api/auth/login", post(stub_login))
        .route("/api/auth/refresh", post(stub_refresh))
        .route("/api/auth/logout", post(stub_logout))
        .route("/api/widgets", get(stub_widgets))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub listener");
    let addr = listener.local_addr().expect("stub local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub serve");
    });
    format!("http://{addr}")
}

/// Put a session straight into the client's store, bypassing login.
fn seed_session(client: &ApiClient, access_token: &str, expires_in: chrono::Duration) {
    client
        .session_store()
        .save(ClientSession {
            access_token: access_token.to_string(),
            refresh_token: "refresh-0".to_string(),
            expires_at: Utc::now() + expires_in,
            email: "alice@example.com".to_string(),
        })
        .expect("seed session");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_valid_token_is_attached_without_refresh() {
    let state = StubState::new();
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);
    seed_session(&client, "good", chrono::Duration::minutes(5));

    let response = client
        .send(reqwest::Method::GET, "/api/widgets", None)
        .await
        .expect("request succeeds");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 0);
    let seen = state.seen_bearers.lock().unwrap().clone();
    assert_eq!(seen, vec![Some("Bearer good".to_string())]);
}

#[tokio::test]
async fn test_rejected_token_triggers_refresh_and_single_replay() {
    let state = StubState::new();
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);
    // Token that still looks valid locally but the server rejects.
    seed_session(&client, "stale", chrono::Duration::minutes(5));

    let response = client
        .send(reqwest::Method::GET, "/api/widgets", None)
        .await
        .expect("replay succeeds");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);

    // Original attempt with the stale token, then one replay with the
    // renewed one.
    let seen = state.seen_bearers.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            Some("Bearer stale".to_string()),
            Some("Bearer token-1".to_string()),
        ]
    );

    // The renewed session is persisted.
    let session = client.session_store().get().expect("session kept");
    assert_eq!(session.access_token, "token-1");
    assert_eq!(session.refresh_token, "refresh-0");
}

#[tokio::test]
async fn test_concurrent_requests_share_one_refresh() {
    let state = StubState::new();
    state.refresh_delay_ms.store(150, Ordering::SeqCst);
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);
    seed_session(&client, "stale", chrono::Duration::minutes(5));

    let (a, b) = futures::join!(
        client.send(reqwest::Method::GET, "/api/widgets", None),
        client.send(reqwest::Method::GET, "/api/widgets", None),
    );

    assert_eq!(a.expect("first request succeeds").status(), reqwest::StatusCode::OK);
    assert_eq!(b.expect("second request succeeds").status(), reqwest::StatusCode::OK);

    // Both 401s funnelled through a single refresh call.
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_preemptive_refresh_near_expiry() {
    let state = StubState::new();
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);
    // Eight seconds left: inside the 10-second preemptive window for
    // short-lived tokens.
    seed_session(&client, "good", chrono::Duration::seconds(8));

    let response = client
        .send(reqwest::Method::GET, "/api/widgets", None)
        .await
        .expect("request succeeds");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);

    // The soon-to-expire token was never sent; the request went out with
    // the renewed one.
    let seen = state.seen_bearers.lock().unwrap().clone();
    assert_eq!(seen, vec![Some("Bearer token-1".to_string())]);
}

#[tokio::test]
async fn test_expired_token_sent_bare_then_recovered() {
    let state = StubState::new();
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);
    seed_session(&client, "long-gone", chrono::Duration::seconds(-10));

    let response = client
        .send(reqwest::Method::GET, "/api/widgets", None)
        .await
        .expect("request recovers");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);

    // Expired token is not attached; the bare request 401s and the replay
    // carries the renewed token.
    let seen = state.seen_bearers.lock().unwrap().clone();
    assert_eq!(seen, vec![None, Some("Bearer token-1".to_string())]);
}

#[tokio::test]
async fn test_failed_refresh_clears_session_and_notifies() {
    let state = StubState::new();
    state.fail_refresh.store(true, Ordering::SeqCst);
    let base_url = spawn_stub(state.clone()).await;

    let expired_hook_fired = Arc::new(AtomicBool::new(false));
    let hook_flag = expired_hook_fired.clone();
    let client = ApiClientBuilder::new(base_url)
        .on_session_expired(move || {
            hook_flag.store(true, Ordering::SeqCst);
        })
        .build();
    seed_session(&client, "stale", chrono::Duration::minutes(5));

    let result = client.send(reqwest::Method::GET, "/api/widgets", None).await;

    // The caller sees the original rejection, not the refresh failure.
    assert_matches!(
        result,
        Err(ClientError::Http { status, .. }) if status == reqwest::StatusCode::UNAUTHORIZED
    );

    // Local session is gone and the embedding app was told to re-login.
    assert!(client.session_store().get().is_none());
    assert!(expired_hook_fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_logout_clears_session_even_when_server_errors() {
    let state = StubState::new();
    state.fail_logout.store(true, Ordering::SeqCst);
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);
    seed_session(&client, "good", chrono::Duration::minutes(5));

    let result = client.logout().await;

    assert_matches!(
        result,
        Err(ClientError::Http { status, .. })
            if status == reqwest::StatusCode::INTERNAL_SERVER_ERROR
    );
    // A dead backend must not trap the user in a half-logged-out session.
    assert!(client.session_store().get().is_none());
}

#[tokio::test]
async fn test_login_arms_proactive_refresh_timer() {
    let state = StubState::new();
    // Three-second token: the timer fires at 70% of its life (~2.1s).
    state.login_ttl_secs.store(3, Ordering::SeqCst);
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);

    let session = client
        .login("alice@example.com", "hunter22")
        .await
        .expect("login succeeds");
    assert_eq!(session.access_token, "login-token");

    tokio::time::sleep(Duration::from_millis(2800)).await;

    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 1);
    let renewed = client.session_store().get().expect("session kept");
    assert_eq!(renewed.access_token, "token-1");
}

#[tokio::test]
async fn test_logout_cancels_proactive_refresh_timer() {
    let state = StubState::new();
    state.login_ttl_secs.store(3, Ordering::SeqCst);
    let base_url = spawn_stub(state.clone()).await;
    let client = ApiClient::new(base_url);

    client
        .login("alice@example.com", "hunter22")
        .await
        .expect("login succeeds");
    client.logout().await.expect("logout succeeds");

    tokio::time::sleep(Duration::from_millis(3000)).await;

    // The timer armed at login must not fire after logout.
    assert_eq!(state.refresh_calls.load(Ordering::SeqCst), 0);
}
