//! Network seams of the client: business calls and the refresh call.

use futures::future::BoxFuture;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::error::{AuthFailure, ClientError};
use super::pipeline::ClientConfig;
use super::request::{ApiRequest, ApiResponse};
use crate::api::{ACCESS_TOKEN_HEADER, REFRESH_TOKEN_HEADER};
use crate::auth::REFRESH_COOKIE_NAME;

/// Path of the refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Tokens returned by a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Sends one request and returns the response, whatever its status.
pub trait Transport: Send + Sync {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<ApiResponse, ClientError>>;
}

/// Exchanges a refresh token for a new pair.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<IssuedTokens, ClientError>>;
}

/// reqwest transport with a fixed per-request timeout.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Validation(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// A refresher sharing this transport's connection pool.
    pub fn refresher(&self) -> HttpRefresher {
        HttpRefresher {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

fn join_url(base_url: &Url, path: &str) -> Result<Url, ClientError> {
    base_url
        .join(path)
        .map_err(|e| ClientError::Validation(format!("Invalid request path {path}: {e}")))
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BoxFuture<'a, Result<ApiResponse, ClientError>> {
        Box::pin(async move {
            let url = join_url(&self.base_url, &request.path)?;
            let mut builder = self
                .client
                .request(request.method.clone(), url)
                .headers(request.headers.clone());
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();

            debug!(method = %request.method, path = %request.path, %status, "Response received");
            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}

/// Calls `POST /auth/refresh` with the refresh token as the `refreshToken` cookie.
#[derive(Clone)]
pub struct HttpRefresher {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenRefresher for HttpRefresher {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<IssuedTokens, ClientError>> {
        Box::pin(async move {
            let url = join_url(&self.base_url, REFRESH_PATH)?;
            let mut cookie = HeaderValue::from_str(&format!("{REFRESH_COOKIE_NAME}={refresh_token}"))
                .map_err(|_| ClientError::Unauthorized(AuthFailure::RefreshInvalid))?;
            cookie.set_sensitive(true);

            let response = self
                .client
                .post(url)
                .header(COOKIE, cookie)
                .header(CONTENT_TYPE, "application/json")
                .send()
                .await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();
            let response = ApiResponse {
                status,
                headers,
                body,
            };

            if status == StatusCode::UNAUTHORIZED {
                let failure = response
                    .reason()
                    .and_then(|r| AuthFailure::from_reason(&r))
                    .unwrap_or(AuthFailure::RefreshInvalid);
                return Err(ClientError::Unauthorized(failure));
            }
            let response = response.error_for_status()?;

            issued_tokens(&response)
        })
    }
}

/// Tokens from the response headers, falling back to the JSON body.
fn issued_tokens(response: &ApiResponse) -> Result<IssuedTokens, ClientError> {
    let body: Option<RefreshBody> = response.json().ok();
    let (body_access, body_refresh) = match body {
        Some(body) => (body.access_token, body.refresh_token),
        None => (None, None),
    };

    let access_token = response
        .header(ACCESS_TOKEN_HEADER)
        .map(str::to_string)
        .or(body_access)
        .ok_or_else(|| ClientError::Decode("Refresh response carried no access token".into()))?;
    let refresh_token = response
        .header(REFRESH_TOKEN_HEADER)
        .map(str::to_string)
        .or(body_refresh)
        .ok_or_else(|| ClientError::Decode("Refresh response carried no refresh token".into()))?;

    Ok(IssuedTokens {
        access_token,
        refresh_token,
    })
}
