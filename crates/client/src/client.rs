//! The API client and its request interceptor.
//!
//! [`ApiClient`] wraps a `reqwest::Client` and makes token renewal invisible
//! to callers issuing ordinary requests:
//!
//! 1. Auth endpoints (login, register, refresh) pass through with no bearer
//!    credential.
//! 2. Other requests attach the stored access token; when the token is
//!    inside the preemptive-refresh window it is renewed first.
//! 3. A `401` answer with a stored credential triggers a reactive refresh
//!    and exactly one replay of the original request.
//! 4. If the refresh itself fails, the local session is cleared, the
//!    session-expired hook fires, and the failure surfaces to the caller.
//!
//! Refreshes are single-flight via [`RefreshGate`]; see
//! [`single_flight`](crate::single_flight). A cancellable timer renews the
//! token proactively ahead of expiry; it is rescheduled whenever the
//! session is replaced and cancelled when the session is cleared.

use std::sync::{Arc, Mutex};

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, RefreshError};
use crate::models::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, UserProfile};
use crate::session::{ClientSession, SessionStore};
use crate::single_flight::{self, Flight, RefreshGate, RefreshOutcome};

/// Builder for [`ApiClient`].
pub struct ApiClientBuilder {
    base_url: String,
    store: Option<Arc<SessionStore>>,
    on_session_expired: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ApiClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            store: None,
            on_session_expired: None,
        }
    }

    /// Use the given session store instead of a fresh in-memory one.
    pub fn session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Hook invoked when the session is forcibly ended (irrecoverable
    /// refresh failure). The embedding application typically routes the
    /// user to its login entry point here.
    pub fn on_session_expired(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_session_expired = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> ApiClient {
        ApiClient {
            inner: Arc::new(ClientInner {
                http: reqwest::Client::new(),
                base_url: self.base_url.trim_end_matches('/').to_string(),
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(SessionStore::in_memory())),
                gate: RefreshGate::new(),
                timer: Mutex::new(None),
                on_session_expired: self.on_session_expired,
            }),
        }
    }
}

/// Cheaply cloneable handle to the shared client state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    /// Base URL without a trailing slash.
    base_url: String,
    store: Arc<SessionStore>,
    gate: RefreshGate,
    timer: Mutex<Option<RefreshTimer>>,
    on_session_expired: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Handle to the scheduled proactive refresh task.
struct RefreshTimer {
    cancel: CancellationToken,
}

/// Auth endpoints that must never carry the current access token. Matched
/// exactly so resource paths that merely contain an auth-like segment still
/// go through the interceptor.
fn is_auth_endpoint(path: &str) -> bool {
    matches!(
        path,
        "/api/auth/login" | "/api/auth/register" | "/api/auth/refresh"
    )
}

/// Preemptive-refresh window: how close to expiry a token may get before a
/// request triggers a refresh up front instead of risking a 401.
///
/// Short-lived tokens get a proportionally larger margin (10s when under
/// two minutes remain) than long-lived ones (5s).
fn preemptive_threshold(remaining: chrono::Duration) -> chrono::Duration {
    if remaining < chrono::Duration::minutes(2) {
        chrono::Duration::seconds(10)
    } else {
        chrono::Duration::seconds(5)
    }
}

/// Delay before the proactive timer fires, derived from the remaining token
/// life: short tokens (under two minutes) refresh at 70% of their life,
/// longer ones one minute before expiry, with a two-second floor.
fn refresh_timer_delay(remaining: chrono::Duration) -> std::time::Duration {
    let millis = remaining.num_milliseconds();
    let target = if millis < 120_000 {
        (millis * 7) / 10
    } else {
        millis - 60_000
    };
    std::time::Duration::from_millis(target.max(2_000) as u64)
}

impl ApiClient {
    /// Shorthand for a builder with defaults.
    pub fn new(base_url: impl Into<String>) -> Self {
        ApiClientBuilder::new(base_url).build()
    }

    /// The session store backing this client.
    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.inner.store
    }

    // -----------------------------------------------------------------------
    // Auth operations
    // -----------------------------------------------------------------------

    /// Create an account and sign in.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<ClientSession, ClientError> {
        let body = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            confirm_password: confirm_password.to_string(),
        };
        let response = self
            .inner
            .http
            .post(self.url("/api/auth/register"))
            .json(&body)
            .send()
            .await?;
        let auth: AuthResponse = expect_json(response).await?;
        self.adopt_session(auth)
    }

    /// Sign in with email + password.
    pub async fn login(&self, email: &str, password: &str) -> Result<ClientSession, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self
            .inner
            .http
            .post(self.url("/api/auth/login"))
            .json(&body)
            .send()
            .await?;
        let auth: AuthResponse = expect_json(response).await?;
        self.adopt_session(auth)
    }

    /// Sign out: revoke the refresh token server-side and drop local state.
    ///
    /// Local state is cleared even when the server call fails, so a dead
    /// backend can never trap the user in a half-logged-out session.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let bearer = self.inner.store.get().map(|s| s.access_token);

        let result = async {
            let mut request = self.inner.http.post(self.url("/api/auth/logout"));
            if let Some(token) = &bearer {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            Ok(())
        }
        .await;

        self.drop_session(false);
        result
    }

    /// Fetch the signed-in user's profile.
    pub async fn current_user(&self) -> Result<UserProfile, ClientError> {
        let response = self.send(Method::GET, "/api/auth/me", None).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.drop_session(true);
        }
        expect_json(response).await
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Single-flight: if a refresh is already pending this call suspends on
    /// its outcome instead of issuing a second one. On failure the local
    /// session is cleared and the session-expired hook fires.
    pub async fn refresh_session(&self) -> Result<ClientSession, RefreshError> {
        // A leader dropped mid-refresh (its caller was cancelled) releases
        // followers with `Cancelled`; allow one more cycle before giving up.
        for _ in 0..2 {
            match self.inner.gate.begin() {
                Flight::Leader(leader) => {
                    let outcome = self.perform_refresh().await;
                    leader.finish(outcome.clone());
                    return outcome;
                }
                Flight::Follower(receiver) => {
                    match single_flight::await_outcome(receiver).await {
                        Err(RefreshError::Cancelled) => continue,
                        outcome => return outcome,
                    }
                }
            }
        }
        Err(RefreshError::Cancelled)
    }

    // -----------------------------------------------------------------------
    // Intercepted requests
    // -----------------------------------------------------------------------

    /// GET `path` and decode the JSON response body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self.send(Method::GET, path, None).await?;
        expect_json(response).await
    }

    /// Send `body` as JSON to `path` and decode the JSON response body.
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let value = serde_json::to_value(body)?;
        let response = self.send(Method::POST, path, Some(value)).await?;
        expect_json(response).await
    }

    /// Issue a request through the interceptor.
    ///
    /// Non-401 errors pass straight through to the caller; a 401 with a
    /// stored session triggers one refresh and one replay.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        if is_auth_endpoint(path) {
            return Ok(self.raw_request(method, path, body.as_ref(), None).await?);
        }

        let stored = self.inner.store.get();
        let mut bearer = None;
        if let Some(session) = &stored {
            let remaining = session.time_until_expiry();
            if remaining > chrono::Duration::zero() && remaining < preemptive_threshold(remaining)
            {
                tracing::debug!(
                    seconds_left = remaining.num_seconds(),
                    "Access token near expiry, refreshing preemptively"
                );
                let fresh = self.refresh_session().await?;
                bearer = Some(fresh.access_token);
            } else if session.is_access_token_valid() {
                bearer = Some(session.access_token.clone());
            }
            // Already expired: send without a credential and let the 401
            // path below recover.
        }

        let response = self
            .raw_request(method.clone(), path, body.as_ref(), bearer.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && stored.is_some() {
            tracing::debug!(%path, "Received 401, attempting token refresh");
            match self.refresh_session().await {
                Ok(fresh) => {
                    // Replay exactly once with the renewed credential.
                    let retry = self
                        .raw_request(method, path, body.as_ref(), Some(&fresh.access_token))
                        .await?;
                    return Ok(retry);
                }
                Err(refresh_err) => {
                    tracing::warn!(error = %refresh_err, "Refresh after 401 failed, ending session");
                    // The refresh path already cleared the session; surface
                    // the original rejection.
                    return Err(error_from_response(response).await);
                }
            }
        }

        Ok(response)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.inner.base_url, path)
    }

    async fn raw_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.inner.http.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request.send().await
    }

    /// The actual refresh call, run only by the single-flight leader.
    async fn perform_refresh(&self) -> RefreshOutcome {
        let Some(current) = self.inner.store.get() else {
            self.drop_session(true);
            return Err(RefreshError::MissingToken);
        };

        let body = RefreshRequest {
            refresh_token: current.refresh_token,
        };
        let response = match self
            .inner
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.drop_session(true);
                return Err(RefreshError::Transport(e.to_string()));
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::warn!(status, "Refresh rejected, ending session");
            self.drop_session(true);
            return Err(RefreshError::Rejected { status });
        }

        let auth: AuthResponse = match response.json().await {
            Ok(auth) => auth,
            Err(e) => {
                self.drop_session(true);
                return Err(RefreshError::Transport(e.to_string()));
            }
        };

        let session = ClientSession {
            access_token: auth.token,
            refresh_token: auth.refresh_token,
            expires_at: auth.expires_at,
            email: auth.email,
        };
        if let Err(e) = self.inner.store.save(session.clone()) {
            return Err(RefreshError::Storage(e.to_string()));
        }
        self.schedule_refresh_timer(&session);
        tracing::debug!("Access token refreshed");
        Ok(session)
    }

    /// Store a freshly issued session and arm the proactive timer.
    fn adopt_session(&self, auth: AuthResponse) -> Result<ClientSession, ClientError> {
        let session = ClientSession {
            access_token: auth.token,
            refresh_token: auth.refresh_token,
            expires_at: auth.expires_at,
            email: auth.email,
        };
        self.inner.store.save(session.clone())?;
        self.schedule_refresh_timer(&session);
        Ok(session)
    }

    /// Clear local state. `notify` fires the session-expired hook; explicit
    /// logout skips it.
    fn drop_session(&self, notify: bool) {
        if let Err(e) = self.inner.store.clear() {
            tracing::warn!(error = %e, "Failed to clear session storage");
        }
        self.cancel_refresh_timer();
        if notify {
            if let Some(hook) = &self.inner.on_session_expired {
                hook();
            }
        }
    }

    /// (Re)arm the proactive refresh timer for the given session.
    ///
    /// Any previous timer is cancelled first so a stale timer can never
    /// fire against a replaced or cleared session.
    fn schedule_refresh_timer(&self, session: &ClientSession) {
        self.cancel_refresh_timer();

        let remaining = session.time_until_expiry();
        if remaining <= chrono::Duration::zero() {
            return;
        }
        let delay = refresh_timer_delay(remaining);

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        // The task holds only a weak handle: a dropped client tears its
        // timer down instead of being kept alive by it.
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        let client = ApiClient { inner };
                        tracing::debug!("Automatic token refresh triggered");
                        if let Err(e) = client.refresh_session().await {
                            tracing::warn!(error = %e, "Automatic token refresh failed");
                        }
                    }
                }
            }
        });

        *self.inner.timer.lock().expect("timer lock poisoned") = Some(RefreshTimer { cancel });
    }

    fn cancel_refresh_timer(&self) {
        if let Some(timer) = self
            .inner
            .timer
            .lock()
            .expect("timer lock poisoned")
            .take()
        {
            timer.cancel.cancel();
        }
    }
}

/// Decode a success body, or map an error status to [`ClientError::Http`].
async fn expect_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    Ok(response.json::<T>().await?)
}

/// Build a [`ClientError::Http`] from an error response, preferring the
/// backend's `{"error": ...}` message over the raw body.
async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let message = match response.text().await {
        Ok(text) => match serde_json::from_str::<crate::models::ApiErrorBody>(&text) {
            Ok(body) => body.error,
            Err(_) if !text.is_empty() => text,
            Err(_) => status.to_string(),
        },
        Err(_) => status.to_string(),
    };
    ClientError::Http { status, message }
}
