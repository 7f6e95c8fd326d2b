//! Errors surfaced by the client pipeline.

use reqwest::StatusCode;

/// Why an authorization attempt failed. Displays as its wire `reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    /// The access token expired; recovered by a refresh.
    #[error("access_expired")]
    AccessExpired,
    /// No refresh token is stored.
    #[error("refresh_missing")]
    RefreshMissing,
    #[error("refresh_expired")]
    RefreshExpired,
    #[error("refresh_invalid")]
    RefreshInvalid,
    /// The refresh token's user no longer exists.
    #[error("subject_not_found")]
    SubjectNotFound,
    /// A request replayed with a freshly issued access token was rejected again.
    #[error("replay_rejected")]
    ReplayRejected,
}

impl AuthFailure {
    /// Map the `reason` field of a 401 body to a failure kind.
    pub fn from_reason(reason: &str) -> Option<Self> {
        match reason {
            "access_expired" => Some(Self::AccessExpired),
            "refresh_missing" => Some(Self::RefreshMissing),
            "refresh_expired" => Some(Self::RefreshExpired),
            "refresh_invalid" => Some(Self::RefreshInvalid),
            "subject_not_found" => Some(Self::SubjectNotFound),
            _ => None,
        }
    }
}

/// Client error. `Clone` because a single refresh outcome is delivered to
/// every request waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unauthorized: {0}")]
    Unauthorized(AuthFailure),

    #[error("Identity provider error: {0}")]
    UpstreamIdentityProvider(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Token refresh was abandoned before it settled")]
    RefreshAborted,
}

impl ClientError {
    /// True for failures that require the user to log in again.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::RefreshAborted)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() || e.is_body() {
            ClientError::Decode(e.to_string())
        } else if e.is_builder() {
            ClientError::Validation(e.to_string())
        } else {
            ClientError::NetworkUnreachable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}
