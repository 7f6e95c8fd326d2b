//! Single-flight token refresh.
//!
//! The first request to observe a 401 while no refresh is running becomes the
//! leader and performs the refresh. Requests failing while it runs queue a
//! oneshot sender and wait; the leader settles every waiter with the same
//! outcome before the state returns to `Idle`. The check-and-set of the state
//! happens under one lock, so this holds on a multi-threaded runtime.
//!
//! A failed flight is remembered together with the access token it failed
//! for, so a 401 for that token arriving after the flight settled gets the
//! same error instead of starting a second refresh.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::error::{AuthFailure, ClientError};
use super::session::SessionController;
use super::transport::TokenRefresher;

/// Result handed to every request waiting on a refresh: the new access token.
type Outcome = Result<String, ClientError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Outcome>>,
    },
}

struct Inner {
    state: RefreshState,
    /// Access token of the last failed flight and the error it ended with.
    last_failure: Option<(String, ClientError)>,
}

enum Role {
    Leader,
    Follower(oneshot::Receiver<Outcome>),
    /// Another refresh already replaced the token the request was sent with.
    Stale(String),
    /// The refresh for this token already failed.
    Failed(ClientError),
}

pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
    session: Arc<SessionController>,
    refresher: Arc<dyn TokenRefresher>,
    timeout: Duration,
    refresh_count: AtomicUsize,
}

impl RefreshCoordinator {
    pub fn new(
        session: Arc<SessionController>,
        refresher: Arc<dyn TokenRefresher>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RefreshState::Idle,
                last_failure: None,
            }),
            session,
            refresher,
            timeout,
            refresh_count: AtomicUsize::new(0),
        }
    }

    /// Number of refresh calls sent to the token issuer.
    pub fn refresh_count(&self) -> usize {
        self.refresh_count.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock_inner().state, RefreshState::Refreshing { .. })
    }

    /// Obtain a new access token for a request that got a 401 while carrying
    /// `failed_with`. Concurrent callers share one refresh.
    pub async fn recover(&self, failed_with: Option<&str>) -> Result<String, ClientError> {
        let role = {
            let mut inner = self.lock_inner();
            let Inner {
                state,
                last_failure,
            } = &mut *inner;
            match state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!(queued = waiters.len(), "Waiting for in-flight refresh");
                    Role::Follower(rx)
                }
                RefreshState::Idle => match (self.session.access_token(), last_failure.as_ref()) {
                    (Some(current), _) if failed_with != Some(current.as_str()) => {
                        Role::Stale(current)
                    }
                    (None, Some((token, err))) if failed_with == Some(token.as_str()) => {
                        Role::Failed(err.clone())
                    }
                    _ => {
                        *state = RefreshState::Refreshing {
                            waiters: Vec::new(),
                        };
                        Role::Leader
                    }
                },
            }
        };

        match role {
            Role::Stale(current) => {
                debug!("Token already rotated, replaying without refresh");
                Ok(current)
            }
            Role::Failed(err) => {
                debug!(error = %err, "Refresh for this token already failed");
                Err(err)
            }
            Role::Follower(rx) => rx.await.unwrap_or(Err(ClientError::RefreshAborted)),
            Role::Leader => {
                let mut flight = Flight {
                    coordinator: self,
                    failed_with: failed_with.map(str::to_string),
                    outcome: None,
                };
                let outcome = self.run_refresh().await;
                flight.outcome = Some(outcome.clone());
                drop(flight);
                outcome
            }
        }
    }

    async fn run_refresh(&self) -> Outcome {
        let generation = self.session.generation();
        let Some(refresh_token) = self.session.refresh_token() else {
            warn!("No refresh token stored");
            self.clear_session(generation);
            return Err(ClientError::Unauthorized(AuthFailure::RefreshMissing));
        };

        info!("Refreshing access token");
        self.refresh_count.fetch_add(1, Ordering::SeqCst);

        let result = match tokio::time::timeout(self.timeout, self.refresher.refresh(&refresh_token)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout),
        };

        match result {
            Ok(tokens) => {
                match self.session.apply_refresh_for(
                    generation,
                    &tokens.access_token,
                    &tokens.refresh_token,
                ) {
                    Ok(true) => {
                        info!("Access token refreshed");
                        Ok(tokens.access_token)
                    }
                    Ok(false) => {
                        warn!("Session ended during refresh, discarding new tokens");
                        Err(ClientError::RefreshAborted)
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to store refreshed tokens");
                        self.clear_session(generation);
                        Err(e)
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.clear_session(generation);
                Err(e)
            }
        }
    }

    /// Log out after a failed refresh, unless the session already changed.
    fn clear_session(&self, generation: u64) {
        if let Err(e) = self.session.logout_for(generation) {
            error!(error = %e, "Failed to clear session after refresh failure");
        }
    }

    /// Return to `Idle` and settle every queued waiter.
    fn settle(&self, failed_with: Option<String>, outcome: Outcome) {
        let waiters = {
            let mut inner = self.lock_inner();
            inner.last_failure = match (&outcome, failed_with) {
                (Err(ClientError::RefreshAborted), _) | (Ok(_), _) | (_, None) => None,
                (Err(e), Some(token)) => Some((token, e.clone())),
            };
            match mem::replace(&mut inner.state, RefreshState::Idle) {
                RefreshState::Refreshing { waiters } => waiters,
                RefreshState::Idle => Vec::new(),
            }
        };

        if !waiters.is_empty() {
            debug!(count = waiters.len(), ok = outcome.is_ok(), "Settling queued requests");
        }
        for waiter in waiters {
            // A waiter whose request was dropped no longer listens
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the flight when the leader finishes, or rejects the waiters with
/// `RefreshAborted` if the leader's future is dropped mid-refresh.
struct Flight<'a> {
    coordinator: &'a RefreshCoordinator,
    failed_with: Option<String>,
    outcome: Option<Outcome>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(Err(ClientError::RefreshAborted));
        self.coordinator.settle(self.failed_with.take(), outcome);
    }
}
