mod auth;
mod error;

use axum::Router;
use std::sync::Arc;

use crate::db::{Database, UserStore};
use crate::identity::IdentityProvider;
use crate::issuer::TokenIssuer;
use crate::rate_limit::RateLimitConfig;

pub use auth::{ACCESS_TOKEN_HEADER, AuthState, REFRESH_TOKEN_HEADER};
pub use error::{ApiError, ResultExt};

/// Create the API router.
pub fn create_api_router(
    db: Database,
    issuer: Arc<TokenIssuer<UserStore>>,
    identity: Arc<dyn IdentityProvider>,
    secure_cookies: bool,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = AuthState {
        db,
        issuer,
        identity,
        secure_cookies,
    };

    Router::new().nest("/auth", auth::router(auth_state, rate_limit_config))
}
