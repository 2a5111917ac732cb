// Single-flight session refresh
//
// Every caller that needs a fresh credential while a refresh is outstanding
// awaits the same shared future; a new network refresh starts only from Idle.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::attacher::CredentialAttacher;
use super::store::CredentialStore;
use super::types::Session;
use crate::clock::Clock;
use crate::transport::Transport;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    /// Nothing to refresh with
    #[error("No refresh session")]
    MissingCredential,

    #[error("Refresh rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Refresh request failed: {0}")]
    Transport(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("Credential store failure: {0}")]
    Store(String),

    /// The session was signed out or replaced while the refresh was in flight
    #[error("Session changed during refresh")]
    Superseded,
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
}

/// Settled result of one refresh episode
#[derive(Debug, Clone)]
pub struct Episode {
    /// Monotonic episode number, starting at 1
    pub epoch: u64,
    /// The session after a successful refresh
    pub outcome: Result<Session, RefreshError>,
}

type SharedRefresh = Shared<BoxFuture<'static, Episode>>;

#[derive(Default)]
struct Inner {
    pending: Option<SharedRefresh>,
    /// Epoch of the last settled episode
    epoch: u64,
    last: Option<Episode>,
    /// Episodes at or below this epoch belong to a session that has since been replaced
    floor: u64,
}

/// Single-flight refresh of the access credential
pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    attacher: Arc<dyn CredentialAttacher>,
    clock: Arc<dyn Clock>,
    refresh_url: String,
    inner: Mutex<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        attacher: Arc<dyn CredentialAttacher>,
        clock: Arc<dyn Clock>,
        refresh_url: String,
    ) -> Self {
        Self {
            transport,
            store,
            attacher,
            clock,
            refresh_url,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The guarded data is replaced wholesale, so a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> RefreshState {
        match self.lock().pending {
            Some(ref pending) if pending.peek().is_none() => RefreshState::Refreshing,
            _ => RefreshState::Idle,
        }
    }

    /// Epoch of the most recently settled episode (0 before the first refresh)
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Whether `epoch` was started for the session that is current now
    pub fn is_current(&self, epoch: u64) -> bool {
        epoch > self.lock().floor
    }

    /// Forget in-flight and settled episodes after a sign-in or sign-out
    ///
    /// A refresh still running finishes on its own, but its episode is no
    /// longer current and is never reused.
    pub fn reset(&self) {
        let mut inner = self.lock();
        // A pending episode always carries `epoch + 1`, settled or not
        if inner.pending.take().is_some() {
            inner.epoch += 1;
        }
        inner.floor = inner.epoch;
        inner.last = None;
        tracing::debug!(floor = inner.floor, "Refresh coordinator reset");
    }

    /// Obtain a fresh credential, joining an in-flight refresh when there is one
    ///
    /// `observed_epoch` is the epoch the caller saw before sending the request
    /// that failed. If an episode has settled since then, its result is returned
    /// without starting another refresh.
    pub async fn acquire_fresh_credential(&self, observed_epoch: Option<u64>) -> Episode {
        let shared = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            if let (Some(observed), Some(last)) = (observed_epoch, inner.last.as_ref()) {
                if inner.epoch > observed {
                    tracing::debug!(
                        observed_epoch = observed,
                        epoch = inner.epoch,
                        "Refresh already settled since request was sent, reusing result"
                    );
                    return last.clone();
                }
            }

            match inner.pending.clone() {
                Some(pending) => {
                    tracing::debug!("Refresh in flight, awaiting shared result");
                    pending
                }
                None => {
                    let epoch = inner.epoch + 1;
                    let refresh = Self::run_refresh(
                        self.transport.clone(),
                        self.store.clone(),
                        self.attacher.clone(),
                        self.clock.clone(),
                        self.refresh_url.clone(),
                        epoch,
                    )
                    .boxed()
                    .shared();
                    inner.pending = Some(refresh.clone());
                    refresh
                }
            }
        };

        let episode = shared.await;

        let mut inner = self.lock();
        if inner.epoch < episode.epoch {
            inner.epoch = episode.epoch;
            inner.last = Some(episode.clone());
            inner.pending = None;
        }

        episode
    }

    async fn run_refresh(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        attacher: Arc<dyn CredentialAttacher>,
        clock: Arc<dyn Clock>,
        url: String,
        epoch: u64,
    ) -> Episode {
        tracing::info!(epoch, mode = ?attacher.mode(), "Refreshing session...");

        // A panic must not poison the shared future every caller is waiting on
        let outcome = AssertUnwindSafe(exchange(
            transport.as_ref(),
            store.as_ref(),
            attacher.as_ref(),
            clock.as_ref(),
            &url,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(RefreshError::InvalidResponse(
                "refresh aborted while handling the response".to_string(),
            ))
        });

        match outcome {
            Ok(_) => tracing::info!(epoch, "Session refreshed"),
            Err(ref e) => tracing::error!(epoch, error = %e, "Session refresh failed"),
        }

        Episode { epoch, outcome }
    }
}

/// One refresh round trip; leaves the store untouched on failure
async fn exchange(
    transport: &dyn Transport,
    store: &dyn CredentialStore,
    attacher: &dyn CredentialAttacher,
    clock: &dyn Clock,
    url: &str,
) -> Result<Session, RefreshError> {
    let session = store
        .read()
        .map_err(|e| RefreshError::Store(format!("{:#}", e)))?;

    let request = attacher.refresh_request(url, &session)?;

    let response = transport
        .execute(request)
        .await
        .map_err(|e| RefreshError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            message: response.text(),
        });
    }

    let grant = attacher.token_grant(&response, clock.now())?;

    store
        .update_access(&session, &grant)
        .map_err(|e| RefreshError::Store(format!("{:#}", e)))?
        .ok_or(RefreshError::Superseded)
}
