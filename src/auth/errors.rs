//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Why a bearer credential was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NotAuthenticated,
    AccessExpired,
    AccessInvalid,
}

impl AuthErrorKind {
    /// Machine-readable reason sent alongside the message.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::AccessExpired => "access_expired",
            Self::AccessInvalid => "access_invalid",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "Not authenticated",
            Self::AccessExpired => "Access token expired",
            Self::AccessInvalid => "Invalid access token",
        }
    }
}

/// API authentication error, always a 401 with a JSON body.
#[derive(Debug)]
pub struct ApiAuthError {
    pub kind: AuthErrorKind,
}

impl ApiAuthError {
    pub(super) fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
            reason: &'static str,
        }

        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: self.kind.message(),
                reason: self.kind.reason(),
            }),
        )
            .into_response()
    }
}
