//! Session controller: the only writer of the credential and cookie stores.
//!
//! Every change is published on a `watch` channel so observers (a UI layer,
//! tests) see the session without sharing mutable state with the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use super::error::ClientError;
use super::store::{CookieStore, CredentialStore, KeyValueStore, PersistedAuth};
use crate::identity::Provider;

/// User as returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub user_id: String,
    pub provider: Provider,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// Partial user update merged into the stored user.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub nickname: Option<String>,
    pub is_admin: Option<bool>,
}

/// Snapshot of the persisted session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_authenticated: bool,
    pub user: Option<UserSummary>,
}

pub struct SessionController {
    credentials: CredentialStore,
    cookies: CookieStore,
    changes: watch::Sender<Session>,
    /// Serializes writers so a logout never interleaves with a refresh write.
    write_lock: Mutex<()>,
    /// Bumped by every login and logout. A refresh started under an older
    /// generation must not write its tokens.
    generation: AtomicU64,
}

impl SessionController {
    /// Credential and cookie stores on one backend.
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self::with_stores(CredentialStore::new(kv.clone()), CookieStore::new(kv))
    }

    pub fn with_stores(credentials: CredentialStore, cookies: CookieStore) -> Self {
        let initial = read_session(&credentials, &cookies);
        let (changes, _) = watch::channel(initial);
        Self {
            credentials,
            cookies,
            changes,
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current session, read from the stores.
    pub fn session(&self) -> Session {
        read_session(&self.credentials, &self.cookies)
    }

    /// Access token straight from the credential store.
    pub fn access_token(&self) -> Option<String> {
        self.credentials.access_token()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.cookies.refresh_token()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.changes.subscribe()
    }

    /// Current session generation; changes on every login and logout.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store a fresh login. The refresh token is written first; losing it is
    /// the costlier failure.
    pub fn login(
        &self,
        user: UserSummary,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cookies.set_refresh_token(refresh_token)?;
        let user_id = user.user_id.clone();
        self.credentials.save(&PersistedAuth {
            access_token: Some(access_token.to_string()),
            is_authenticated: true,
            user: Some(user),
        })?;

        info!(%user_id, "Logged in");
        self.publish();
        Ok(())
    }

    /// Store a rotated pair, keeping the user.
    pub fn apply_refresh(&self, access_token: &str, refresh_token: &str) -> Result<(), ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_refreshed(access_token, refresh_token)
    }

    /// Store a pair obtained by a refresh that started under `generation`.
    /// Returns false, writing nothing, if the session was logged out or
    /// replaced by a new login since.
    pub fn apply_refresh_for(
        &self,
        generation: u64,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<bool, ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.generation() != generation {
            debug!("Session changed during refresh, dropping issued tokens");
            return Ok(false);
        }
        self.write_refreshed(access_token, refresh_token)?;
        Ok(true)
    }

    /// Clear the session only if it is still the one a refresh started
    /// under. Returns whether anything was removed.
    pub fn logout_for(&self, generation: u64) -> Result<bool, ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.generation() != generation {
            return Ok(false);
        }
        self.clear()
    }

    fn write_refreshed(&self, access_token: &str, refresh_token: &str) -> Result<(), ClientError> {
        self.cookies.set_refresh_token(refresh_token)?;
        let mut auth = self.credentials.load();
        auth.access_token = Some(access_token.to_string());
        auth.is_authenticated = true;
        self.credentials.save(&auth)?;

        self.publish();
        Ok(())
    }

    /// Persist tokens a server attached to an ordinary response.
    /// A refresh token alone only updates the cookie store.
    pub fn absorb_issued_tokens(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), ClientError> {
        match (access_token, refresh_token) {
            (Some(access), Some(refresh)) => self.apply_refresh(access, refresh),
            (Some(access), None) => {
                let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
                let mut auth = self.credentials.load();
                if auth.access_token.as_deref() == Some(access) {
                    return Ok(());
                }
                auth.access_token = Some(access.to_string());
                self.credentials.save(&auth)?;
                debug!("Stored access token from response header");
                self.publish();
                Ok(())
            }
            (None, Some(refresh)) => {
                let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
                if self.cookies.refresh_token().as_deref() == Some(refresh) {
                    return Ok(());
                }
                self.cookies.set_refresh_token(refresh)?;
                debug!("Stored refresh token from response header");
                self.publish();
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    /// Clear both stores. Returns whether anything was removed; calling it
    /// again performs no storage mutation.
    pub fn logout(&self) -> Result<bool, ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.clear()
    }

    fn clear(&self) -> Result<bool, ClientError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let removed_refresh = self.cookies.remove()?;
        let removed_credentials = self.credentials.clear()?;
        let changed = removed_refresh || removed_credentials;

        if changed {
            info!("Session cleared");
            self.publish();
        }
        Ok(changed)
    }

    /// Merge a partial update into the stored user. Returns false when no
    /// user is stored.
    pub fn update_user(&self, update: UserUpdate) -> Result<bool, ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut auth = self.credentials.load();
        let Some(user) = auth.user.as_mut() else {
            return Ok(false);
        };
        if let Some(nickname) = update.nickname {
            user.nickname = Some(nickname);
        }
        if let Some(is_admin) = update.is_admin {
            user.is_admin = is_admin;
        }
        self.credentials.save(&auth)?;

        self.publish();
        Ok(true)
    }

    fn publish(&self) {
        self.changes
            .send_replace(read_session(&self.credentials, &self.cookies));
    }
}

fn read_session(credentials: &CredentialStore, cookies: &CookieStore) -> Session {
    let auth = credentials.load();
    let refresh_token = cookies.refresh_token();
    Session {
        is_authenticated: auth.is_authenticated
            && auth.access_token.is_some()
            && refresh_token.is_some(),
        access_token: auth.access_token,
        refresh_token,
        user: auth.user,
    }
}
