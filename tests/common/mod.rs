#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response, header},
};
use couponpass::{
    ServerConfig,
    db::Database,
    identity::{IdentityProvider, Provider, ProviderProfile, StaticIdentityProvider},
    jwt::JwtConfig,
    rate_limit::RateLimitConfig,
};
use std::sync::Arc;

pub const TEST_JWT_SECRET: &[u8] = b"test-jwt-secret-for-couponpass-tests";

pub const TEST_ORIGIN: &str = "http://localhost:4000";

/// Everything a router-level test needs to reach behind the HTTP surface.
pub struct TestApp {
    pub app: axum::Router,
    pub db: Database,
    pub jwt: JwtConfig,
    pub identity: Arc<StaticIdentityProvider>,
}

pub async fn create_test_app() -> TestApp {
    TestAppBuilder::new().build().await
}

/// Builder for test apps with non-default limits or lifetimes.
pub struct TestAppBuilder {
    rate_limit: RateLimitConfig,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            rate_limit: RateLimitConfig::with_quota(1000, 1000),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 30 * 24 * 60 * 60,
        }
    }

    pub fn with_rate_limit(mut self, per_second: u32, burst: u32) -> Self {
        self.rate_limit = RateLimitConfig::with_quota(per_second, burst);
        self
    }

    pub fn with_access_ttl(mut self, secs: u64) -> Self {
        self.access_ttl_secs = secs;
        self
    }

    pub async fn build(self) -> TestApp {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let identity = Arc::new(StaticIdentityProvider::new());
        let jwt = JwtConfig::new(TEST_JWT_SECRET)
            .with_lifetimes(self.access_ttl_secs, self.refresh_ttl_secs);
        let config = self.config(db.clone(), identity.clone());

        TestApp {
            app: couponpass::create_app(&config),
            db,
            jwt,
            identity,
        }
    }

    pub fn config(self, db: Database, identity: Arc<dyn IdentityProvider>) -> ServerConfig {
        ServerConfig {
            db,
            jwt_secret: TEST_JWT_SECRET.to_vec(),
            access_ttl_secs: self.access_ttl_secs,
            refresh_ttl_secs: self.refresh_ttl_secs,
            secure_cookies: false, // Tests run on plain HTTP
            allowed_origins: vec![TEST_ORIGIN.to_string()],
            identity,
            rate_limit: self.rate_limit,
        }
    }
}

pub fn profile(provider_id: &str, nickname: Option<&str>) -> ProviderProfile {
    ProviderProfile {
        provider_id: provider_id.to_string(),
        nickname: nickname.map(str::to_string),
        email: Some(format!("{provider_id}@example.com")),
        profile_image_url: None,
    }
}

pub fn callback_request(provider: &str, code: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/auth/{provider}/callback"))
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ORIGIN, TEST_ORIGIN)
        .body(Body::from(format!(r#"{{"code": "{code}"}}"#)))
        .unwrap()
}

pub fn refresh_request(refresh_token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri("/auth/refresh");
    if let Some(token) = refresh_token {
        builder = builder.header(header::COOKIE, format!("refreshToken={token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn bearer_get(uri: &str, access_token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub fn header_str<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Register a code and log in through the router, returning the login body.
pub async fn login(test: &TestApp, provider: Provider, provider_id: &str) -> serde_json::Value {
    use tower::ServiceExt;

    let code = format!("code-{provider_id}-{}", uuid::Uuid::new_v4());
    test.identity
        .register_code(provider, &code, profile(provider_id, None));
    let response = test
        .app
        .clone()
        .oneshot(callback_request(provider.as_str(), &code))
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    body_json(response).await
}
