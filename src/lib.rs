pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod db;
pub mod identity;
pub mod issuer;
pub mod jwt;
pub mod rate_limit;

use api::create_api_router;
use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use db::Database;
use identity::IdentityProvider;
use issuer::TokenIssuer;
use jwt::JwtConfig;
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Access token lifetime in seconds
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl_secs: u64,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// Origins allowed to call the API with credentials
    pub allowed_origins: Vec<String>,
    /// Performs the OAuth code exchange on login
    pub identity: Arc<dyn IdentityProvider>,
    /// Per-IP limits for the auth endpoints
    pub rate_limit: RateLimitConfig,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(
        JwtConfig::new(&config.jwt_secret)
            .with_lifetimes(config.access_ttl_secs, config.refresh_ttl_secs),
    );
    let issuer = Arc::new(TokenIssuer::new(jwt, config.db.users()));

    create_api_router(
        config.db.clone(),
        issuer,
        config.identity.clone(),
        config.secure_cookies,
        Arc::new(config.rate_limit.clone()),
    )
    .layer(cors_layer(&config.allowed_origins))
}

/// CORS policy: credentialed requests from the configured origins, with the
/// token headers exposed so browser clients can read rotated tokens.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(api::REFRESH_TOKEN_HEADER),
        ])
        .expose_headers([
            HeaderName::from_static(api::ACCESS_TOKEN_HEADER),
            HeaderName::from_static(api::REFRESH_TOKEN_HEADER),
        ])
}

/// Run the server on the given listener until SIGINT/SIGTERM.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down");
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> (tokio::task::JoinHandle<()>, SocketAddr) {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    let local_addr = listener.local_addr().expect("Failed to get local address");

    let handle = tokio::spawn(async move {
        let app = create_app(&config);
        let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, make_service).await.ok();
    });

    (handle, local_addr)
}
