//! Request decorator: puts the stored access token on outbound requests.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::{debug, warn};

use super::session::SessionController;
use crate::api::REFRESH_TOKEN_HEADER;

pub struct RequestDecorator {
    session: Arc<SessionController>,
    send_refresh_header: bool,
}

impl RequestDecorator {
    pub fn new(session: Arc<SessionController>, send_refresh_header: bool) -> Self {
        Self {
            session,
            send_refresh_header,
        }
    }

    /// Attach `Authorization: Bearer <access>` unless the request is a
    /// replay, whose bearer was set by the refresh path. The token is read
    /// from the credential store on every call.
    pub fn decorate(&self, request: &mut super::ApiRequest) {
        if !request.is_replay {
            match self.session.access_token() {
                Some(token) => {
                    if request.set_bearer(&token).is_ok() {
                        debug!(
                            path = %request.path,
                            expires_in = ?remaining_lifetime(&token),
                            "Attached access token"
                        );
                    } else {
                        warn!(path = %request.path, "Stored access token is not a valid header value");
                    }
                }
                None => debug!(path = %request.path, "No access token, sending unauthenticated"),
            }
        }

        if self.send_refresh_header {
            if let Some(value) = self
                .session
                .refresh_token()
                .and_then(|t| HeaderValue::from_str(&t).ok())
            {
                request
                    .headers
                    .insert(HeaderName::from_static(REFRESH_TOKEN_HEADER), value);
            }
        }
    }
}

/// Seconds until the token's `exp`, read from the unverified payload.
/// Only used for logging.
fn remaining_lifetime(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
    Some(exp - now)
}
