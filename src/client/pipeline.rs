//! The authenticated request pipeline.
//!
//! decorate → send → absorb issued tokens → on 401, recover through the
//! refresh coordinator and replay once with the new access token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use super::coordinator::RefreshCoordinator;
use super::decorator::RequestDecorator;
use super::error::{AuthFailure, ClientError};
use super::request::{ApiRequest, ApiResponse};
use super::session::{SessionController, UserSummary};
use super::store::KeyValueStore;
use super::transport::{HttpTransport, TokenRefresher, Transport};
use crate::api::{ACCESS_TOKEN_HEADER, REFRESH_TOKEN_HEADER};
use crate::identity::Provider;

const DEFAULT_BASE_URL: &str = "http://localhost:5000";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    /// Applied to every business call and to the refresh call.
    pub timeout: Duration,
    /// Send the refresh token as `X-Refresh-Token` on business calls.
    pub send_refresh_header: bool,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            send_refresh_header: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"))
    }
}

#[derive(Serialize)]
struct CallbackRequest<'a> {
    code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody {
    user: UserSummary,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionController>,
    decorator: RequestDecorator,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    /// HTTP client over reqwest with the session persisted in `store`.
    pub fn new(config: &ClientConfig, store: Arc<dyn KeyValueStore>) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(config)?;
        let refresher = transport.refresher();
        Ok(Self::with_parts(
            config,
            Arc::new(SessionController::new(store)),
            Arc::new(transport),
            Arc::new(refresher),
        ))
    }

    pub fn with_parts(
        config: &ClientConfig,
        session: Arc<SessionController>,
        transport: Arc<dyn Transport>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            transport,
            decorator: RequestDecorator::new(session.clone(), config.send_refresh_header),
            coordinator: RefreshCoordinator::new(session.clone(), refresher, config.timeout),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send an authenticated request. A 401 caused by an expired access
    /// token is recovered transparently; any other status is returned as is.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.decorator.decorate(&mut request);
        let response = self.send(&request).await?;

        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if request.is_replay {
            warn!(path = %request.path, "Replayed request rejected");
            return Err(ClientError::Unauthorized(AuthFailure::ReplayRejected));
        }
        if request.retried {
            return Ok(response);
        }

        request.retried = true;
        let failed_with = request.bearer().map(str::to_string);
        let access_token = self.coordinator.recover(failed_with.as_deref()).await?;

        let mut replay = request;
        replay.is_replay = true;
        replay.set_bearer(&access_token)?;
        self.decorator.decorate(&mut replay);

        let response = self.send(&replay).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            warn!(path = %replay.path, "Replayed request rejected");
            return Err(ClientError::Unauthorized(AuthFailure::ReplayRejected));
        }
        Ok(response)
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<ApiResponse, ClientError> {
        self.execute(ApiRequest::post_json(path, body)?).await
    }

    pub async fn patch_json<T: Serialize>(&self, path: &str, body: &T) -> Result<ApiResponse, ClientError> {
        self.execute(ApiRequest::patch_json(path, body)?).await
    }

    /// Complete an OAuth login by handing the authorization code to the
    /// server, then store the issued session.
    pub async fn login(&self, provider: Provider, code: &str) -> Result<UserSummary, ClientError> {
        let path = format!("/auth/{provider}/callback");
        let request = ApiRequest::post_json(path, &CallbackRequest { code })?;
        let response = self.send(&request).await?;

        match response.status {
            StatusCode::BAD_REQUEST => {
                let message = response.message().unwrap_or_else(|| "Invalid login request".into());
                return Err(ClientError::Validation(message));
            }
            status if status.is_server_error() => {
                let message = response.message().unwrap_or_else(|| "Identity provider error".into());
                return Err(ClientError::UpstreamIdentityProvider(message));
            }
            _ => {}
        }
        let response = response.error_for_status()?;

        let body: LoginBody = response.json()?;
        let refresh_token = response
            .header(REFRESH_TOKEN_HEADER)
            .map(str::to_string)
            .or(body.refresh_token)
            .ok_or_else(|| ClientError::Decode("Login response carried no refresh token".into()))?;

        self.session
            .login(body.user.clone(), &body.access_token, &refresh_token)?;
        info!(user_id = %body.user.user_id, %provider, "Login complete");
        Ok(body.user)
    }

    /// Clear the local session. Returns whether anything was stored.
    pub fn logout(&self) -> Result<bool, ClientError> {
        self.session.logout()
    }

    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let response = self.transport.send(request).await?;
        let access = response.header(ACCESS_TOKEN_HEADER);
        let refresh = response.header(REFRESH_TOKEN_HEADER);
        if access.is_some() || refresh.is_some() {
            self.session.absorb_issued_tokens(access, refresh)?;
        }
        Ok(response)
    }
}
