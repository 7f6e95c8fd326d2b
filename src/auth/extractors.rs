//! Axum extractors for authentication.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::api::REFRESH_TOKEN_HEADER;
use crate::issuer::IssuerError;

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Extractor for endpoints that require a valid access token.
///
/// Verification is stateless: the user directory is not consulted, so an
/// expired access token is the only thing that makes this fail for a user
/// who still holds one. Clients are expected to refresh on the 401.
pub struct BearerAuth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or(ApiAuthError::new(AuthErrorKind::NotAuthenticated))?;

        let subject = state.issuer().verify_access(token).map_err(|e| {
            let kind = match e {
                IssuerError::Expired => AuthErrorKind::AccessExpired,
                _ => AuthErrorKind::AccessInvalid,
            };
            tracing::debug!(reason = kind.reason(), "Rejected access token");
            ApiAuthError::new(kind)
        })?;

        if parts.headers.contains_key(REFRESH_TOKEN_HEADER) {
            tracing::debug!(user_id = %subject.user_id, "Request carries refresh token header");
        }

        Ok(BearerAuth(AuthenticatedUser { subject }))
    }
}
