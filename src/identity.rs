//! Identity provider interface.
//!
//! The OAuth authorization-code exchange itself is delegated to an
//! [`IdentityProvider`] implementation; this crate only consumes the resulting
//! profile to find or create the application user.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Supported OAuth identity providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Kakao,
    Google,
    Naver,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Kakao => "kakao",
            Provider::Google => "google",
            Provider::Naver => "naver",
        }
    }

    /// Nickname used when the provider profile does not carry one.
    pub fn default_nickname(&self) -> &'static str {
        match self {
            Provider::Kakao => "Kakao user",
            Provider::Google => "Google user",
            Provider::Naver => "Naver user",
        }
    }

    /// Application user id for a provider-scoped id, e.g. `kakao_12345`.
    pub fn user_id(&self, provider_id: &str) -> String {
        format!("{}_{}", self.as_str(), provider_id)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kakao" => Ok(Provider::Kakao),
            "google" => Ok(Provider::Google),
            "naver" => Ok(Provider::Naver),
            other => Err(IdentityError::Unsupported(other.to_string())),
        }
    }
}

/// Profile data returned by a successful code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Provider-scoped user id
    pub provider_id: String,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The authorization code was rejected (bad, reused, or wrong redirect URI)
    #[error("Authorization code exchange failed: {0}")]
    Exchange(String),
    /// The provider was unreachable or answered with something unexpected
    #[error("Identity provider error: {0}")]
    Upstream(String),
    #[error("Unsupported identity provider: {0}")]
    Unsupported(String),
}

/// Exchanges an authorization code for the user's provider profile.
pub trait IdentityProvider: Send + Sync + 'static {
    fn exchange<'a>(
        &'a self,
        provider: Provider,
        code: &'a str,
        redirect_uri: &'a str,
    ) -> BoxFuture<'a, Result<ProviderProfile, IdentityError>>;
}

/// Provider backed by a fixed table of one-shot authorization codes.
#[derive(Default)]
pub struct StaticIdentityProvider {
    codes: Mutex<HashMap<(Provider, String), ProviderProfile>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code that exchanges once for `profile`.
    pub fn register_code(&self, provider: Provider, code: &str, profile: ProviderProfile) {
        if let Ok(mut codes) = self.codes.lock() {
            codes.insert((provider, code.to_string()), profile);
        }
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn exchange<'a>(
        &'a self,
        provider: Provider,
        code: &'a str,
        _redirect_uri: &'a str,
    ) -> BoxFuture<'a, Result<ProviderProfile, IdentityError>> {
        let result = self
            .codes
            .lock()
            .map_err(|_| IdentityError::Upstream("code table poisoned".into()))
            .and_then(|mut codes| {
                codes
                    .remove(&(provider, code.to_string()))
                    .ok_or_else(|| IdentityError::Exchange("unknown or used code".into()))
            });
        Box::pin(async move { result })
    }
}

/// Placeholder used when no provider credentials are configured.
pub struct UnconfiguredIdentityProvider;

impl IdentityProvider for UnconfiguredIdentityProvider {
    fn exchange<'a>(
        &'a self,
        provider: Provider,
        _code: &'a str,
        _redirect_uri: &'a str,
    ) -> BoxFuture<'a, Result<ProviderProfile, IdentityError>> {
        Box::pin(async move {
            Err(IdentityError::Upstream(format!(
                "{provider} OAuth is not configured"
            )))
        })
    }
}

/// Build the OAuth redirect URI from the request origin.
pub fn redirect_uri(origin: Option<&str>, host: Option<&str>, provider: Provider) -> String {
    let origin = match (origin, host) {
        (Some(origin), _) => origin.trim_end_matches('/').to_string(),
        (None, Some(host)) => format!("https://{host}"),
        (None, None) => String::new(),
    };
    format!("{origin}/auth/callback/{provider}")
}
