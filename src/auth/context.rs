//! Session state machine.
//!
//! `AuthContext` is the one process-wide authentication context: constructed
//! once at startup, shared as `Arc<AuthContext>`, and mutated only through
//! the operations defined here and in the re-auth/dispatcher modules. UI
//! collaborators read the snapshot getters and never touch state directly.
//!
//! Interior state lives behind a `std::sync::Mutex` that is never held
//! across an await, so a logout may interleave with an in-flight hydration;
//! the generation counter makes late hydration results harmless.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::{ApiError, RequestExecutor};

use super::reauth::{RetryFn, RetryFuture};
use super::session::{derive_warehouses, Permissions, Session, Warehouse};
use super::store::{CredentialStore, DurableSession};

// ============================================================================
// Constants
// ============================================================================

/// Minimum wall-clock duration of hydration in milliseconds.
/// Even an instant permissions fetch keeps the loading state visible this
/// long so it never flickers.
const MIN_HYDRATION_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    LoggedOut,
    Authenticating,
    LoggedIn,
}

/// User-facing error surfaced by the dispatcher. Persistent errors (version
/// mismatch) should stay on screen until explicitly dismissed; transient ones
/// are ordinary toasts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserError {
    pub message: String,
    pub persistent: bool,
}

impl UserError {
    pub(crate) fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), persistent: false }
    }

    pub(crate) fn persistent(message: impl Into<String>) -> Self {
        Self { message: message.into(), persistent: true }
    }
}

pub(crate) struct AuthState {
    pub(crate) status: AuthStatus,
    pub(crate) session: Option<Session>,
    pub(crate) permissions: Option<Permissions>,
    pub(crate) warehouses: Vec<Warehouse>,
    pub(crate) user_error: Option<UserError>,
    pub(crate) reauth_visible: bool,
    pub(crate) pending_retry: Option<RetryFn>,
    /// Bumped on every login and logout; hydration results carrying a stale
    /// generation are discarded instead of resurrecting a cleared session.
    pub(crate) generation: u64,
}

pub struct AuthContext {
    pub(crate) executor: Arc<dyn RequestExecutor>,
    pub(crate) store: CredentialStore,
    min_hydration: Duration,
    state: Mutex<AuthState>,
}

impl AuthContext {
    /// Build the process-wide context. Call once at startup, before any
    /// screen that depends on auth status renders.
    pub fn new(executor: Arc<dyn RequestExecutor>, store: CredentialStore) -> Arc<Self> {
        Self::with_min_hydration(executor, store, Duration::from_millis(MIN_HYDRATION_MS))
    }

    pub fn with_min_hydration(
        executor: Arc<dyn RequestExecutor>,
        store: CredentialStore,
        min_hydration: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            store,
            min_hydration,
            state: Mutex::new(AuthState {
                status: AuthStatus::LoggedOut,
                session: None,
                permissions: None,
                warehouses: Vec::new(),
                user_error: None,
                reauth_visible: false,
                pending_retry: None,
                generation: 0,
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AuthState> {
        // A panic while holding the lock leaves plain data, not broken
        // invariants; recover instead of propagating the poison.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Snapshot getters =====

    pub fn status(&self) -> AuthStatus {
        self.lock().status
    }

    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn permissions(&self) -> Option<Permissions> {
        self.lock().permissions.clone()
    }

    pub fn warehouses(&self) -> Vec<Warehouse> {
        self.lock().warehouses.clone()
    }

    pub fn user_error(&self) -> Option<UserError> {
        self.lock().user_error.clone()
    }

    pub fn reauth_visible(&self) -> bool {
        self.lock().reauth_visible
    }

    pub fn clear_user_error(&self) {
        self.lock().user_error = None;
    }

    // ===== State machine operations =====

    /// Authenticate. On success the status moves to `Authenticating`; the
    /// caller (or a UI effect) then drives [`hydrate`](Self::hydrate). On
    /// failure the classified error is propagated and nothing transitions.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let device_token = self.store.device_token(username);
        info!(username, "Authenticating");

        let session = self
            .executor
            .login(username, password, &device_token)
            .await?;

        if let Err(e) = self.store.set_last_username(username) {
            warn!(error = %e, "Failed to persist last username");
        }

        let mut state = self.lock();
        state.session = Some(session);
        state.permissions = None;
        state.warehouses.clear();
        state.user_error = None;
        state.generation += 1;
        state.status = AuthStatus::Authenticating;
        Ok(())
    }

    /// Post-login hydration: fetch permissions, derive warehouses, persist
    /// the durable record and move to `LoggedIn`. No-op unless the context is
    /// `Authenticating` with a session. The transition is gated on both the
    /// fetch and the minimum-duration timer completing, whichever is slower.
    ///
    /// Failures are routed through the dispatcher with a continuation that
    /// re-runs hydration, so a re-auth-recoverable failure resumes here.
    ///
    /// Takes the context by `Arc` so the continuation can own a handle;
    /// callers hold an `Arc` anyway and clone it per drive.
    pub async fn hydrate(self: Arc<Self>) {
        let (generation, token) = {
            let state = self.lock();
            match (&state.status, &state.session) {
                (AuthStatus::Authenticating, Some(session)) => {
                    (state.generation, session.session_token.clone())
                }
                _ => return,
            }
        };

        let fetch = self.executor.fetch_permissions(&token);
        let (result, ()) = tokio::join!(fetch, tokio::time::sleep(self.min_hydration));

        match result {
            Ok(permissions) => self.apply_hydration(generation, permissions),
            Err(e) => {
                warn!(error = %e, "Hydration failed");
                let ctx = Arc::clone(&self);
                let retry: RetryFn = Box::new(move || ctx.hydrate_boxed());
                self.dispatch_error(e, Some(retry)).await;
            }
        }
    }

    /// Boxed [`hydrate`](Self::hydrate), used as the retry continuation when
    /// hydration itself fails. The explicit return type cuts the recursion
    /// a self-referential `hydrate` future would otherwise create.
    fn hydrate_boxed(self: Arc<Self>) -> RetryFuture {
        Box::pin(async move { self.hydrate().await })
    }

    fn apply_hydration(&self, generation: u64, permissions: Permissions) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!("Discarding hydration result from a superseded session");
            return;
        }
        let Some(session) = state.session.clone() else {
            return;
        };

        let warehouses = derive_warehouses(&permissions);
        state.permissions = Some(permissions.clone());
        state.warehouses = warehouses.clone();
        state.status = AuthStatus::LoggedIn;
        drop(state);

        info!(warehouses = warehouses.len(), "Session hydrated");
        let record = DurableSession::new(session, permissions, warehouses);
        if let Err(e) = self.store.save_session(&record) {
            warn!(error = %e, "Failed to persist session record");
        }
    }

    /// Best-effort server-side logout, then an unconditional local wipe.
    /// Always succeeds locally regardless of the network outcome.
    pub async fn logout(&self) {
        let token = self
            .lock()
            .session
            .as_ref()
            .map(|s| s.session_token.clone());

        if let Some(token) = token {
            if let Err(e) = self.executor.logout(&token).await {
                warn!(error = %e, "Server-side logout failed; clearing local session anyway");
            }
        }

        {
            let mut state = self.lock();
            state.session = None;
            state.permissions = None;
            state.warehouses.clear();
            state.reauth_visible = false;
            state.pending_retry = None;
            state.generation += 1;
            state.status = AuthStatus::LoggedOut;
        }

        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "Failed to clear session record");
        }
        info!("Logged out");
    }

    /// Restore the persisted session on process start. A present record goes
    /// straight to `LoggedIn` (no re-hydration); anything else starts
    /// logged out.
    pub fn restore_session(&self) {
        match self.store.load_session() {
            Some(record) => {
                let mut state = self.lock();
                state.session = Some(record.session);
                state.permissions = Some(record.permissions);
                state.warehouses = record.warehouses;
                state.status = AuthStatus::LoggedIn;
                drop(state);
                info!("Session restored from disk");
            }
            None => {
                self.lock().status = AuthStatus::LoggedOut;
                debug!("No persisted session; starting logged out");
            }
        }
    }

    /// Authenticated call with the current session's token and secondary
    /// identifier. Callers must route failures through
    /// [`dispatch_error`](Self::dispatch_error), passing a retry continuation
    /// when the call is safely replayable.
    pub async fn authenticated_call(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        let (token, secondary) = {
            let state = self.lock();
            match state.session {
                Some(ref session) => (
                    session.session_token.clone(),
                    session.secondary_session_id.clone(),
                ),
                None => return Err(ApiError::Unauthorized),
            }
        };
        self.executor
            .call(&token, secondary.as_deref(), endpoint, payload)
            .await
    }

    // ===== Last-known warehouse hints =====

    pub fn last_warehouse(&self) -> Option<i64> {
        let user_id = self.lock().session.as_ref().map(|s| s.user_id)?;
        self.store.last_warehouse(user_id)
    }

    pub fn set_last_warehouse(&self, code: i64) {
        let user_id = self.lock().session.as_ref().map(|s| s.user_id);
        if let Some(user_id) = user_id {
            if let Err(e) = self.store.set_last_warehouse(user_id, code) {
                warn!(error = %e, "Failed to persist last warehouse");
            }
        }
    }
}
