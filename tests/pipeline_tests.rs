//! Tests for the client request pipeline against a scripted in-process server.
//!
//! Tests cover:
//! - One refresh call for many concurrent 401s
//! - Every failed call settles with the new token or the refresh error
//! - Replays that fail again are rejected, not re-queued
//! - The session is cleared once per failed refresh
//! - A 401 arriving after its refresh failed gets the same error
//! - Logout idempotency
//! - Login, pass-through of non-401 responses and token absorption

use couponpass::client::{
    ApiClient, ApiRequest, ApiResponse, AuthFailure, ClientConfig, ClientError, IssuedTokens,
    KeyValueStore, MemoryStore, Session, SessionController, TokenRefresher, Transport,
    UserSummary,
};
use couponpass::identity::Provider;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request as the server saw it.
#[derive(Debug, Clone)]
struct Seen {
    path: String,
    bearer: Option<String>,
    is_replay: bool,
}

/// Accepts only its current access token and rotates tokens on refresh.
struct MockServer {
    valid_access: Mutex<Option<String>>,
    valid_refresh: Mutex<Option<String>>,
    /// Reject every business call, even with a fresh token.
    reject_all: bool,
    routes: Mutex<HashMap<String, ApiResponse>>,
    log: Mutex<Vec<Seen>>,
    refresh_calls: AtomicUsize,
    refresh_delay: Duration,
    /// Per-path delay before a business call is answered.
    delays: Mutex<HashMap<String, Duration>>,
}

impl MockServer {
    fn new(valid_refresh: &str) -> Self {
        Self {
            valid_access: Mutex::new(None),
            valid_refresh: Mutex::new(Some(valid_refresh.to_string())),
            reject_all: false,
            routes: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            refresh_delay: Duration::from_millis(50),
            delays: Mutex::new(HashMap::new()),
        }
    }

    fn rejecting_all(mut self) -> Self {
        self.reject_all = true;
        self
    }

    fn route(&self, path: &str, response: ApiResponse) {
        self.routes.lock().unwrap().insert(path.to_string(), response);
    }

    fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    fn seen(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status,
        headers: HeaderMap::new(),
        body: serde_json::to_vec(&body).unwrap(),
    }
}

impl Transport for MockServer {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<ApiResponse, ClientError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let delay = self.delays.lock().unwrap().get(&request.path).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.log.lock().unwrap().push(Seen {
                path: request.path.clone(),
                bearer: request.bearer().map(str::to_string),
                is_replay: request.is_replay,
            });

            if let Some(response) = self.routes.lock().unwrap().get(&request.path) {
                return Ok(response.clone());
            }

            let valid = self.valid_access.lock().unwrap().clone();
            let authorized = !self.reject_all && valid.is_some() && request.bearer() == valid.as_deref();
            if authorized {
                Ok(json_response(
                    StatusCode::OK,
                    serde_json::json!({"ok": true, "path": request.path}),
                ))
            } else {
                Ok(json_response(
                    StatusCode::UNAUTHORIZED,
                    serde_json::json!({"error": "Access token expired", "reason": "access_expired"}),
                ))
            }
        })
    }
}

impl TokenRefresher for MockServer {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<IssuedTokens, ClientError>> {
        Box::pin(async move {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.refresh_delay).await;

            let expected = self.valid_refresh.lock().unwrap().clone();
            if expected.as_deref() != Some(refresh_token) {
                return Err(ClientError::Unauthorized(AuthFailure::RefreshExpired));
            }

            let tokens = IssuedTokens {
                access_token: format!("A{}", n + 1),
                refresh_token: format!("R{}", n + 1),
            };
            *self.valid_access.lock().unwrap() = Some(tokens.access_token.clone());
            *self.valid_refresh.lock().unwrap() = Some(tokens.refresh_token.clone());
            Ok(tokens)
        })
    }
}

/// Counts storage mutations, so a second logout can be shown to do nothing.
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    mutations: AtomicUsize,
    removals: AtomicUsize,
}

impl KeyValueStore for CountingStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<bool, ClientError> {
        let removed = self.inner.remove(key)?;
        if removed {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            self.removals.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

fn user() -> UserSummary {
    UserSummary {
        user_id: "kakao_u1".into(),
        provider: Provider::Kakao,
        nickname: Some("Kakao user".into()),
        is_admin: false,
    }
}

/// A client logged in as `u1` with `A1`/`R1`, where `A1` has already expired.
fn logged_in_client(server: Arc<MockServer>, store: Arc<dyn KeyValueStore>) -> Arc<ApiClient> {
    let session = Arc::new(SessionController::new(store));
    session.login(user(), "A1", "R1").unwrap();
    Arc::new(ApiClient::with_parts(
        &ClientConfig::default(),
        session,
        server.clone(),
        server,
    ))
}

async fn fire_concurrently(client: &Arc<ApiClient>, paths: &[&str]) -> Vec<Result<ApiResponse, ClientError>> {
    let handles: Vec<_> = paths
        .iter()
        .map(|path| {
            let client = client.clone();
            let path = path.to_string();
            tokio::spawn(async move { client.get(&path).await })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expired_access_token_refreshes_once_for_concurrent_calls() {
    let server = Arc::new(MockServer::new("R1"));
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let paths = ["/coupons", "/coupons/mine", "/registrations"];
    let results = fire_concurrently(&client, &paths).await;

    for result in &results {
        let response = result.as_ref().unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }
    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(client.coordinator().refresh_count(), 1);

    // Each call was re-sent once with the new token
    let seen = server.seen();
    for path in paths {
        let replays: Vec<_> = seen
            .iter()
            .filter(|s| s.path == path && s.is_replay)
            .collect();
        assert_eq!(replays.len(), 1, "{path} replayed once");
        assert_eq!(replays[0].bearer.as_deref(), Some("A2"));
    }

    let session = client.session().session();
    assert_eq!(session.access_token.as_deref(), Some("A2"));
    assert_eq!(session.refresh_token.as_deref(), Some("R2"));
    assert!(session.is_authenticated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_failures_single_flight() {
    let server = Arc::new(MockServer::new("R1"));
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let paths: Vec<String> = (0..25).map(|i| format!("/coupons/{i}")).collect();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let results = fire_concurrently(&client, &path_refs).await;

    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|r| r.status == StatusCode::OK)));
    assert_eq!(server.refresh_calls(), 1);
}

#[tokio::test]
async fn test_expired_refresh_token_clears_session() {
    let server = Arc::new(MockServer::new("R-other"));
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let err = client.get("/coupons").await.unwrap_err();
    assert_eq!(err, ClientError::Unauthorized(AuthFailure::RefreshExpired));
    assert!(err.is_auth_failure());

    let session = client.session().session();
    assert_eq!(session, Session::default());
    assert_eq!(session.access_token, None);
    assert_eq!(session.refresh_token, None);
    assert!(!session.is_authenticated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_refresh_rejects_all_and_clears_session_once() {
    let server = Arc::new(MockServer::new("R-other"));
    let store = Arc::new(CountingStore::default());
    let client = logged_in_client(server.clone(), store.clone());

    let results = fire_concurrently(&client, &["/coupons", "/registrations", "/coupons/mine"]).await;

    for result in results {
        assert_eq!(
            result.unwrap_err(),
            ClientError::Unauthorized(AuthFailure::RefreshExpired)
        );
    }
    assert_eq!(server.refresh_calls(), 1);
    // One logout: the cookie and the credential document removed once each
    assert_eq!(store.removals.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_401_after_failed_refresh_gets_same_error() {
    let server = Arc::new(MockServer::new("R-other"));
    // Answered well after the 50ms refresh has failed and cleared the session
    server.delay("/coupons/slow", Duration::from_millis(300));
    let store = Arc::new(CountingStore::default());
    let client = logged_in_client(server.clone(), store.clone());

    let results = fire_concurrently(&client, &["/coupons", "/coupons/slow"]).await;

    for result in results {
        assert_eq!(
            result.unwrap_err(),
            ClientError::Unauthorized(AuthFailure::RefreshExpired)
        );
    }
    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(client.coordinator().refresh_count(), 1);
    assert_eq!(store.removals.load(Ordering::SeqCst), 2);
    assert_eq!(client.session().session(), Session::default());
}

#[tokio::test]
async fn test_logout_during_refresh_stays_logged_out() {
    let server = Arc::new(MockServer::new("R1"));
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.get("/coupons").await }
    });
    while !client.coordinator().is_refreshing() {
        tokio::task::yield_now().await;
    }
    assert!(client.logout().unwrap());

    assert_eq!(pending.await.unwrap().unwrap_err(), ClientError::RefreshAborted);
    assert_eq!(server.refresh_calls(), 1);
    assert_eq!(client.session().session(), Session::default());
}

#[tokio::test]
async fn test_replay_rejection_does_not_loop() {
    let server = Arc::new(MockServer::new("R1").rejecting_all());
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let err = client.get("/coupons").await.unwrap_err();
    assert_eq!(err, ClientError::Unauthorized(AuthFailure::ReplayRejected));
    assert_eq!(server.refresh_calls(), 1);

    let seen = server.seen();
    assert_eq!(seen.len(), 2);
    assert!(!seen[0].is_replay);
    assert!(seen[1].is_replay);
}

#[tokio::test]
async fn test_caller_marked_replay_is_never_refreshed() {
    let server = Arc::new(MockServer::new("R1"));
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let mut request = ApiRequest::get("/coupons");
    request.is_replay = true;
    request.set_bearer("A0").unwrap();

    let err = client.execute(request).await.unwrap_err();
    assert_eq!(err, ClientError::Unauthorized(AuthFailure::ReplayRejected));
    assert_eq!(server.refresh_calls(), 0);
    assert_eq!(server.seen()[0].bearer.as_deref(), Some("A0"));
}

#[tokio::test]
async fn test_retried_request_passes_401_through() {
    let server = Arc::new(MockServer::new("R1"));
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let mut request = ApiRequest::get("/coupons");
    request.retried = true;

    let response = client.execute(request).await.unwrap();
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(server.refresh_calls(), 0);
}

#[tokio::test]
async fn test_valid_token_needs_no_refresh() {
    let server = Arc::new(MockServer::new("R1"));
    *server.valid_access.lock().unwrap() = Some("A1".into());
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let response = client.get("/coupons").await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(server.refresh_calls(), 0);
    assert_eq!(server.seen()[0].bearer.as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_non_401_errors_pass_through() {
    let server = Arc::new(MockServer::new("R1"));
    server.route(
        "/coupons",
        json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({"success": false, "message": "Coupon service down"}),
        ),
    );
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));

    let response = client.get("/coupons").await.unwrap();
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.error_for_status().unwrap_err(),
        ClientError::Http {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Coupon service down".into()
        }
    );
    assert_eq!(server.refresh_calls(), 0);
    assert!(client.session().session().is_authenticated);
}

#[tokio::test]
async fn test_network_errors_surface_verbatim() {
    struct Unreachable;

    impl Transport for Unreachable {
        fn send<'a>(&'a self, _request: &'a ApiRequest) -> BoxFuture<'a, Result<ApiResponse, ClientError>> {
            Box::pin(async { Err(ClientError::NetworkUnreachable("connection refused".into())) })
        }
    }

    let server = Arc::new(MockServer::new("R1"));
    let session = Arc::new(SessionController::new(Arc::new(MemoryStore::new())));
    session.login(user(), "A1", "R1").unwrap();
    let client = ApiClient::with_parts(&ClientConfig::default(), session, Arc::new(Unreachable), server.clone());

    let err = client.get("/coupons").await.unwrap_err();
    assert_eq!(err, ClientError::NetworkUnreachable("connection refused".into()));
    assert_eq!(server.refresh_calls(), 0);
    assert!(client.session().session().is_authenticated);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let server = Arc::new(MockServer::new("R1"));
    let store = Arc::new(CountingStore::default());
    let client = logged_in_client(server, store.clone());

    assert!(client.logout().unwrap());
    let after_first = store.mutations.load(Ordering::SeqCst);

    assert!(!client.logout().unwrap());
    assert_eq!(store.mutations.load(Ordering::SeqCst), after_first);
    assert_eq!(client.session().session(), Session::default());
}

#[tokio::test]
async fn test_request_after_logout_refreshes_nothing() {
    let server = Arc::new(MockServer::new("R1"));
    let client = logged_in_client(server.clone(), Arc::new(MemoryStore::new()));
    client.logout().unwrap();

    let err = client.get("/coupons").await.unwrap_err();
    assert_eq!(err, ClientError::Unauthorized(AuthFailure::RefreshMissing));
    assert_eq!(server.refresh_calls(), 0);
    assert_eq!(server.seen()[0].bearer, None);
}

#[tokio::test]
async fn test_login_stores_session() {
    let server = Arc::new(MockServer::new("R1"));
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-refresh-token"),
        HeaderValue::from_static("R1"),
    );
    server.route(
        "/auth/kakao/callback",
        ApiResponse {
            status: StatusCode::OK,
            headers,
            body: serde_json::to_vec(&serde_json::json!({
                "success": true,
                "user": {"userId": "kakao_u1", "provider": "kakao", "nickname": "Kakao user", "isAdmin": false},
                "accessToken": "A1",
                "refreshToken": "R1",
                "message": "Login successful"
            }))
            .unwrap(),
        },
    );

    let session = Arc::new(SessionController::new(Arc::new(MemoryStore::new())));
    let mut changes = session.subscribe();
    let client = ApiClient::with_parts(&ClientConfig::default(), session, server.clone(), server.clone());

    let user = client.login(Provider::Kakao, "code").await.unwrap();
    assert_eq!(user.user_id, "kakao_u1");

    let stored = client.session().session();
    assert_eq!(stored.access_token.as_deref(), Some("A1"));
    assert_eq!(stored.refresh_token.as_deref(), Some("R1"));
    assert!(stored.is_authenticated);
    assert!(changes.has_changed().unwrap());
    assert!(changes.borrow_and_update().is_authenticated);
}

#[tokio::test]
async fn test_login_errors_are_classified() {
    let server = Arc::new(MockServer::new("R1"));
    server.route(
        "/auth/kakao/callback",
        json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({"success": false, "error": "Bad request", "message": "Authorization code is required"}),
        ),
    );
    server.route(
        "/auth/naver/callback",
        json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({"success": false, "error": "Internal server error", "message": "Identity provider error"}),
        ),
    );
    let session = Arc::new(SessionController::new(Arc::new(MemoryStore::new())));
    let client = ApiClient::with_parts(&ClientConfig::default(), session, server.clone(), server);

    assert_eq!(
        client.login(Provider::Kakao, "").await.unwrap_err(),
        ClientError::Validation("Authorization code is required".into())
    );
    assert_eq!(
        client.login(Provider::Naver, "code").await.unwrap_err(),
        ClientError::UpstreamIdentityProvider("Identity provider error".into())
    );
    assert!(!client.session().session().is_authenticated);
}

#[tokio::test]
async fn test_tokens_on_ordinary_responses_are_absorbed() {
    let server = Arc::new(MockServer::new("R1"));
    *server.valid_access.lock().unwrap() = Some("A1".into());
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-refresh-token"),
        HeaderValue::from_static("R-rotated"),
    );
    server.route(
        "/coupons",
        ApiResponse {
            status: StatusCode::OK,
            headers,
            body: b"{}".to_vec(),
        },
    );
    let client = logged_in_client(server, Arc::new(MemoryStore::new()));

    client.get("/coupons").await.unwrap();

    let session = client.session().session();
    assert_eq!(session.refresh_token.as_deref(), Some("R-rotated"));
    assert_eq!(session.access_token.as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_refresh_header_sent_on_business_calls() {
    let server = Arc::new(MockServer::new("R1"));
    *server.valid_access.lock().unwrap() = Some("A1".into());

    struct Capture {
        inner: Arc<MockServer>,
        headers: Mutex<Vec<HeaderMap>>,
    }

    impl Transport for Capture {
        fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<ApiResponse, ClientError>> {
            self.headers.lock().unwrap().push(request.headers.clone());
            self.inner.send(request)
        }
    }

    let capture = Arc::new(Capture {
        inner: server.clone(),
        headers: Mutex::new(Vec::new()),
    });
    let session = Arc::new(SessionController::new(Arc::new(MemoryStore::new())));
    session.login(user(), "A1", "R1").unwrap();
    let client = ApiClient::with_parts(&ClientConfig::default(), session, capture.clone(), server);

    client.get("/coupons").await.unwrap();
    let sent = capture.headers.lock().unwrap();
    assert_eq!(sent[0].get("x-refresh-token").unwrap(), "R1");
}
