//! Authentication endpoints.
//!
//! - POST `/{provider}/callback` - Exchange an OAuth code, log in, mint a token pair
//! - POST `/refresh` - Exchange the refresh cookie for a rotated token pair
//! - GET `/me` - Identity of the bearer (stateless check)
//! - PATCH `/user/{user_id}/nickname` - Change a nickname (self or admin)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::{ApiError, ResultExt};
use crate::auth::{BearerAuth, REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, refresh_cookie};
use crate::db::{Database, User, UserStore};
use crate::identity::{IdentityError, IdentityProvider, Provider, redirect_uri};
use crate::impl_has_auth_backend;
use crate::issuer::{IssuerError, TokenIssuer};
use crate::jwt::{SubjectClaims, TokenPair};
use crate::rate_limit::{RateLimitConfig, rate_limit_auth};

/// Response header carrying a newly issued access token.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Response header carrying a newly issued refresh token.
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

const MAX_NICKNAME_CHARS: usize = 20;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub issuer: Arc<TokenIssuer<UserStore>>,
    pub identity: Arc<dyn IdentityProvider>,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState, rate_limit_config: Arc<RateLimitConfig>) -> Router {
    let limited = Router::new()
        .route("/{provider}/callback", post(provider_callback))
        .route("/refresh", post(refresh_tokens))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            rate_limit_config,
            rate_limit_auth,
        ));

    let protected = Router::new()
        .route("/me", get(me))
        .route("/user/{user_id}/nickname", patch(update_nickname))
        .with_state(state);

    Router::new().merge(limited).merge(protected)
}

/// User as returned to the client after login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthUser {
    user_id: String,
    provider: Provider,
    nickname: Option<String>,
    is_admin: bool,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            provider: user.provider,
            nickname: user.nickname.clone(),
            is_admin: user.is_admin(),
        }
    }
}

#[derive(Deserialize)]
struct CallbackRequest {
    code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    success: bool,
    user: AuthUser,
    access_token: String,
    refresh_token: String,
    message: &'static str,
}

async fn provider_callback(
    State(state): State<AuthState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CallbackRequest>,
) -> Result<Response, ApiError> {
    let provider: Provider = provider
        .parse()
        .map_err(|e: IdentityError| ApiError::bad_request(e.to_string()))?;

    let code = payload.code.trim();
    if code.is_empty() {
        return Err(ApiError::bad_request("Authorization code is required"));
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let redirect = redirect_uri(origin, host, provider);

    let profile = state
        .identity
        .exchange(provider, code, &redirect)
        .await
        .map_err(|e| match e {
            IdentityError::Exchange(_) | IdentityError::Unsupported(_) => {
                warn!(%provider, error = %e, "Code exchange rejected");
                ApiError::bad_request(e.to_string())
            }
            IdentityError::Upstream(_) => {
                error!(%provider, error = %e, "Identity provider failed");
                ApiError::internal("Identity provider error")
            }
        })?;

    let user = state
        .db
        .users()
        .upsert_from_profile(provider, &profile)
        .await
        .db_err("Failed to find or create user")?;

    let pair = state
        .issuer
        .mint_pair(&SubjectClaims {
            user_id: user.user_id.clone(),
            provider: user.provider,
        })
        .map_err(|e| {
            error!(error = %e, "Failed to mint tokens");
            ApiError::internal("Failed to generate token")
        })?;

    info!(user_id = %user.user_id, %provider, "User logged in");

    let cookie = refresh_cookie(
        &pair.refresh_token,
        state.issuer.jwt().refresh_ttl(),
        state.secure_cookies,
    );
    let body = LoginResponse {
        success: true,
        user: AuthUser::from(&user),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token.clone(),
        message: "Login successful",
    };

    Ok((
        StatusCode::OK,
        AppendHeaders([
            (header::HeaderName::from_static(REFRESH_TOKEN_HEADER), pair.refresh_token),
            (header::SET_COOKIE, cookie),
        ]),
        Json(body),
    )
        .into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    success: bool,
    message: &'static str,
    access_token: String,
    refresh_token: String,
}

#[derive(Serialize)]
struct RefreshFailure {
    success: bool,
    message: &'static str,
    reason: &'static str,
}

/// Rotate the token pair. The refresh token comes from the cookie only;
/// tokens are returned both as headers and in the body.
async fn refresh_tokens(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    let Some(refresh_token) =
        get_cookie(&headers, REFRESH_COOKIE_NAME).filter(|token| !token.is_empty())
    else {
        return refresh_failure(&state, "refresh_missing", "Refresh token missing");
    };

    match state.issuer.refresh(refresh_token).await {
        Ok((user, pair)) => {
            info!(user_id = %user.user_id, "Tokens refreshed");
            refresh_success(&state, pair)
        }
        Err(IssuerError::Expired) => {
            refresh_failure(&state, "refresh_expired", "Refresh token expired")
        }
        Err(IssuerError::Invalid) => {
            refresh_failure(&state, "refresh_invalid", "Invalid refresh token")
        }
        Err(IssuerError::SubjectNotFound) => {
            warn!("Refresh token subject no longer exists");
            refresh_failure(&state, "subject_not_found", "User not found")
        }
        Err(e @ (IssuerError::Directory(_) | IssuerError::Signing(_))) => {
            error!(error = %e, "Token refresh failed");
            ApiError::internal("Token refresh failed").into_response()
        }
    }
}

fn refresh_success(state: &AuthState, pair: TokenPair) -> Response {
    let cookie = refresh_cookie(
        &pair.refresh_token,
        state.issuer.jwt().refresh_ttl(),
        state.secure_cookies,
    );
    let body = RefreshResponse {
        success: true,
        message: "Tokens refreshed",
        access_token: pair.access_token.clone(),
        refresh_token: pair.refresh_token.clone(),
    };

    (
        StatusCode::OK,
        AppendHeaders([
            (header::HeaderName::from_static(ACCESS_TOKEN_HEADER), pair.access_token),
            (header::HeaderName::from_static(REFRESH_TOKEN_HEADER), pair.refresh_token),
            (header::SET_COOKIE, cookie),
        ]),
        Json(body),
    )
        .into_response()
}

fn refresh_failure(state: &AuthState, reason: &'static str, message: &'static str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(RefreshFailure {
            success: false,
            message,
            reason,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    user_id: String,
    provider: Provider,
}

async fn me(BearerAuth(auth): BearerAuth) -> impl IntoResponse {
    Json(MeResponse {
        user_id: auth.subject.user_id,
        provider: auth.subject.provider,
    })
}

#[derive(Deserialize)]
struct UpdateNicknameRequest {
    nickname: String,
}

#[derive(Serialize)]
struct UpdateNicknameResponse {
    success: bool,
    user: AuthUser,
}

async fn update_nickname(
    State(state): State<AuthState>,
    BearerAuth(auth): BearerAuth,
    Path(user_id): Path<String>,
    Json(payload): Json<UpdateNicknameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if auth.user_id() != user_id {
        let caller = state
            .db
            .users()
            .get_by_user_id(auth.user_id())
            .await
            .db_err("Failed to get user")?;
        if !caller.is_some_and(|u| u.is_admin()) {
            return Err(ApiError::forbidden("Cannot change another user's nickname"));
        }
    }

    let nickname = payload.nickname.trim();
    if nickname.is_empty() {
        return Err(ApiError::bad_request("Nickname cannot be empty"));
    }
    if nickname.chars().count() > MAX_NICKNAME_CHARS {
        return Err(ApiError::bad_request(format!(
            "Nickname cannot be longer than {} characters",
            MAX_NICKNAME_CHARS
        )));
    }

    let updated = state
        .db
        .users()
        .update_nickname(&user_id, nickname)
        .await
        .db_err("Failed to update nickname")?;
    if !updated {
        return Err(ApiError::not_found("User not found"));
    }

    let user = state
        .db
        .users()
        .get_by_user_id(&user_id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(UpdateNicknameResponse {
        success: true,
        user: AuthUser::from(&user),
    }))
}
