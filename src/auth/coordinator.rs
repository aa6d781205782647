// Refresh coordination for authentication failures

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use super::credentials::CredentialStore;
use super::refresh;
use super::session::SessionEvents;
use crate::error::{ClientError, RefreshError};
use crate::http_client::{ApiRequest, ApiResponse, Transport};

type RefreshOutcome = Result<String, RefreshError>;

/// Shared between every in-flight request of one coordinator
#[derive(Default)]
struct RefreshState {
    /// A refresh call is outstanding
    refreshing: bool,

    /// Requests parked until that refresh settles
    pending: Vec<oneshot::Sender<RefreshOutcome>>,

    /// Bumped every time a refresh settles
    generation: u64,
}

impl RefreshState {
    fn queue(&mut self) -> oneshot::Receiver<RefreshOutcome> {
        let (sender, receiver) = oneshot::channel();
        self.pending.push(sender);
        receiver
    }
}

/// What a request that hit an authentication failure does next
enum Ticket<'a> {
    /// Perform the refresh
    Lead(RefreshGuard<'a>),
    /// Wait for the outstanding refresh
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// Credentials changed after the request was sent; replay with these
    Replay(String),
    /// Credentials were cleared after the request was sent
    Expired,
}

/// Post-receive hook recovering from expired access tokens.
///
/// At most one refresh call is outstanding per coordinator. Requests failing
/// while it runs are queued and settled together when it completes: replayed
/// with the new token on success, rejected with the refresh error otherwise.
/// Each request is replayed at most once.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    session: SessionEvents,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        transport: Arc<dyn Transport>,
        session: SessionEvents,
    ) -> Self {
        Self {
            store,
            transport,
            session,
            state: Mutex::new(RefreshState::default()),
        }
    }

    /// True while a refresh call is outstanding
    pub fn is_refreshing(&self) -> bool {
        lock_state(&self.state).refreshing
    }

    /// Number of requests queued behind the outstanding refresh
    pub fn pending_requests(&self) -> usize {
        lock_state(&self.state).pending.len()
    }

    /// Evaluate a response for `request`.
    ///
    /// Anything but 401/403 is returned unchanged. An authentication failure
    /// on a request that was already replayed is terminal. Otherwise the
    /// request is replayed once with a fresh access token and the replay's
    /// response becomes the result.
    pub async fn handle_response(
        &self,
        mut request: ApiRequest,
        response: ApiResponse,
    ) -> Result<ApiResponse, ClientError> {
        if !response.is_auth_failure() {
            return Ok(response);
        }

        if request.retried {
            return Err(unauthorized(&request, &response));
        }

        tracing::warn!(
            request_id = %request.request_id,
            status = response.status.as_u16(),
            path = %request.path,
            "Received authentication failure, recovering session"
        );

        let token = self.recover(&request).await?;

        request.retried = true;
        request.set_bearer(&token);

        tracing::debug!(request_id = %request.request_id, "Replaying request with new token");
        let replayed = self.transport.send(&request).await?;

        if replayed.is_auth_failure() {
            return Err(unauthorized(&request, &replayed));
        }

        Ok(replayed)
    }

    /// Obtain an access token to replay `request` with
    async fn recover(&self, request: &ApiRequest) -> Result<String, ClientError> {
        match self.enter(request.bearer_token()) {
            Ticket::Replay(token) => Ok(token),
            Ticket::Expired => Err(ClientError::SessionExpired),
            Ticket::Wait(receiver) => {
                tracing::debug!(
                    request_id = %request.request_id,
                    "Refresh already in progress, queueing request"
                );
                match receiver.await {
                    Ok(Ok(token)) => Ok(token),
                    Ok(Err(e)) => Err(ClientError::RefreshFailed(e)),
                    Err(_) => Err(ClientError::RefreshFailed(RefreshError::Interrupted)),
                }
            }
            Ticket::Lead(guard) => self.refresh(guard).await,
        }
    }

    /// Decide whether to lead, wait or replay.
    ///
    /// The stored token is read without holding the state lock. If a refresh
    /// settled during that read the decision is retried with a fresh read.
    fn enter(&self, sent_token: Option<&str>) -> Ticket<'_> {
        loop {
            let generation = {
                let mut state = lock_state(&self.state);
                if state.refreshing {
                    return Ticket::Wait(state.queue());
                }
                state.generation
            };

            let current = self.store.access_token();

            let mut state = lock_state(&self.state);
            if state.refreshing {
                return Ticket::Wait(state.queue());
            }
            if state.generation != generation {
                continue;
            }

            // A refresh that settled after this request went out has already
            // stored new tokens, or cleared them on failure.
            match (sent_token, current) {
                (Some(sent), Some(current)) if sent != current => return Ticket::Replay(current),
                (None, Some(current)) => return Ticket::Replay(current),
                (Some(_), None) => return Ticket::Expired,
                _ => {}
            }

            state.refreshing = true;
            return Ticket::Lead(RefreshGuard {
                state: &self.state,
                settled: false,
            });
        }
    }

    async fn refresh(&self, guard: RefreshGuard<'_>) -> Result<String, ClientError> {
        let outcome = match self.store.refresh_token() {
            Some(refresh_token) => {
                refresh::refresh_credentials(self.transport.as_ref(), &refresh_token).await
            }
            None => Err(RefreshError::MissingRefreshToken),
        };

        match outcome {
            Ok(pair) => {
                if let Err(e) = self.store.set(&pair) {
                    tracing::error!("Failed to persist refreshed credentials: {:#}", e);
                }

                let queued = guard.settle(Ok(pair.access_token.clone()));
                tracing::info!(queued, "Session refreshed, releasing queued requests");

                Ok(pair.access_token)
            }
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);

                if let Err(clear_err) = self.store.clear() {
                    tracing::error!("Failed to clear credentials: {:#}", clear_err);
                }

                let queued = guard.settle(Err(e.clone()));
                tracing::debug!(queued, "Rejected queued requests");

                self.session.expired();

                Err(ClientError::RefreshFailed(e))
            }
        }
    }
}

/// Returns the coordinator to idle when dropped.
///
/// If the leading request is dropped before settling, queued requests are
/// rejected with `RefreshError::Interrupted`.
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl RefreshGuard<'_> {
    /// Go idle and deliver `outcome` to every queued request.
    /// Returns how many were queued.
    fn settle(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        release(self.state, outcome)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Refresh abandoned before completion");
            release(self.state, Err(RefreshError::Interrupted));
        }
    }
}

fn release(state: &Mutex<RefreshState>, outcome: RefreshOutcome) -> usize {
    let waiters = {
        let mut state = lock_state(state);
        state.refreshing = false;
        state.generation += 1;
        std::mem::take(&mut state.pending)
    };

    let count = waiters.len();
    for waiter in waiters {
        // Receiver is gone if the queued request was dropped
        let _ = waiter.send(outcome.clone());
    }
    count
}

// The state is left consistent between statements, so a poisoned lock is still usable.
fn lock_state(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unauthorized(request: &ApiRequest, response: &ApiResponse) -> ClientError {
    tracing::warn!(
        request_id = %request.request_id,
        status = response.status.as_u16(),
        "Authentication failed after retry"
    );
    ClientError::Unauthorized {
        status: response.status.as_u16(),
        message: response.text(),
    }
}
