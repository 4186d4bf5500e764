//! Re-authentication coordinator.
//!
//! When an authenticated call fails because the remote system no longer
//! accepts the session (but it is recoverable, unlike a full expiry), the
//! dispatcher lands here: the user-visible flow pauses behind a password
//! prompt, and on success the interrupted operation is replayed exactly once.
//!
//! The pending retry is a single slot. If a second re-auth trigger arrives
//! while one is pending, the first retry is kept and the new one dropped with
//! a warning; the UI only ever shows one prompt at a time.

use std::future::Future;
use std::pin::Pin;

use tracing::{info, warn};

use crate::api::ApiError;

use super::context::{AuthContext, AuthStatus, UserError};
use super::store::DurableSession;

pub type RetryFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Deferred replay of the operation that triggered the re-auth pause.
/// Continuations route their own failures back through `dispatch_error`, so a
/// replay that fails again re-enters the normal path.
pub type RetryFn = Box<dyn FnOnce() -> RetryFuture + Send>;

/// Shown when re-authentication fails for any non-fatal reason
const WRONG_PASSWORD_MESSAGE: &str = "Senha incorreta";

impl AuthContext {
    /// Pause the current flow behind the re-auth prompt, storing `retry` for
    /// replay after a successful [`confirm_reauth`](Self::confirm_reauth).
    pub fn request_reauth(&self, retry: RetryFn) {
        let mut state = self.lock();
        if state.pending_retry.is_some() {
            warn!("Re-auth already pending; keeping the first retry and dropping the new one");
        } else {
            state.pending_retry = Some(retry);
        }
        state.reauth_visible = true;
    }

    /// Re-establish the session with a freshly entered password, without
    /// forcing a logout/login round trip. On success the refreshed session is
    /// merged with the permissions and warehouses already held, the prompt is
    /// dismissed and the pending retry (if any) is invoked exactly once. The
    /// status follows the held data: `LoggedIn` when hydrated permissions are
    /// still present, `Authenticating` otherwise so hydration is re-driven.
    ///
    /// On failure the prompt stays up with a wrong-password message and the
    /// pending retry is retained for the next attempt; a version mismatch
    /// instead takes the fatal path.
    pub async fn confirm_reauth(&self, password: &str) -> Result<(), ApiError> {
        let username = self
            .lock()
            .session
            .as_ref()
            .map(|s| s.username.clone())
            .or_else(|| self.store.last_username());

        let Some(username) = username else {
            // Nobody to re-authenticate as; the session is gone for good
            warn!("Re-auth requested with no known username");
            self.session_expired().await;
            return Err(ApiError::Unauthorized);
        };

        let device_token = self.store.device_token(&username);
        match self.executor.login(&username, password, &device_token).await {
            Ok(session) => {
                let (retry, record) = {
                    let mut state = self.lock();
                    state.session = Some(session.clone());
                    state.reauth_visible = false;
                    state.user_error = None;
                    // A session cleared before the confirm (e.g. by logout) must
                    // not leave a live session behind a logged-out status
                    state.status = if state.permissions.is_some() {
                        AuthStatus::LoggedIn
                    } else {
                        AuthStatus::Authenticating
                    };
                    let retry = state.pending_retry.take();
                    // Merge: refreshed session, previously hydrated data
                    let record = state.permissions.clone().map(|permissions| {
                        DurableSession::new(session, permissions, state.warehouses.clone())
                    });
                    (retry, record)
                };

                if let Some(record) = record {
                    if let Err(e) = self.store.save_session(&record) {
                        warn!(error = %e, "Failed to persist refreshed session");
                    }
                }
                info!(username, "Re-authentication succeeded");

                if let Some(retry) = retry {
                    retry().await;
                }
                Ok(())
            }
            Err(ApiError::VersionMismatch) => {
                self.fatal_version_mismatch().await;
                Err(ApiError::VersionMismatch)
            }
            Err(e) => {
                warn!(error = %e, "Re-authentication failed");
                self.lock().user_error = Some(UserError::transient(WRONG_PASSWORD_MESSAGE));
                Err(e)
            }
        }
    }

    /// Dismiss the prompt without re-authenticating. Terminal: the pending
    /// retry is discarded, never invoked, and the user is logged out.
    pub async fn cancel_reauth(&self) {
        {
            let mut state = self.lock();
            state.reauth_visible = false;
            state.pending_retry = None;
        }
        self.logout().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::super::context::AuthStatus;
    use super::super::test_support::{test_context, MockExecutor};
    use super::*;

    /// Counting continuation for asserting replay semantics
    fn counting_retry(counter: &Arc<AtomicUsize>) -> RetryFn {
        let counter = Arc::clone(counter);
        Box::new(move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    async fn logged_in_context(
        mock: Arc<MockExecutor>,
    ) -> (Arc<AuthContext>, tempfile::TempDir) {
        let (ctx, dir) = test_context(mock);
        ctx.login("maria", "s3cret").await.expect("login");
        ctx.clone().hydrate().await;
        assert_eq!(ctx.status(), AuthStatus::LoggedIn);
        (ctx, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_replays_the_pending_operation_exactly_once() {
        let mock = Arc::new(MockExecutor::new());
        let (ctx, _dir) = logged_in_context(mock).await;

        let replays = Arc::new(AtomicUsize::new(0));
        ctx.dispatch_error(ApiError::ReauthRequired, Some(counting_retry(&replays)))
            .await;

        assert!(ctx.reauth_visible());
        assert_eq!(ctx.status(), AuthStatus::LoggedIn);
        assert_eq!(replays.load(Ordering::SeqCst), 0);

        ctx.confirm_reauth("s3cret").await.expect("re-auth");

        assert_eq!(replays.load(Ordering::SeqCst), 1);
        assert!(!ctx.reauth_visible());
        assert_eq!(ctx.status(), AuthStatus::LoggedIn);
        // The refreshed session kept the hydrated data
        assert_eq!(ctx.warehouses().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_password_keeps_prompt_and_retry_for_the_next_attempt() {
        let mock = Arc::new(MockExecutor::new());
        let (ctx, _dir) = logged_in_context(mock.clone()).await;

        let replays = Arc::new(AtomicUsize::new(0));
        ctx.dispatch_error(ApiError::ReauthRequired, Some(counting_retry(&replays)))
            .await;

        mock.fail_next_login(ApiError::Unauthorized);
        let result = ctx.confirm_reauth("typo").await;
        assert!(result.is_err());

        let error = ctx.user_error().expect("wrong-password message");
        assert_eq!(error.message, WRONG_PASSWORD_MESSAGE);
        assert!(!error.persistent);
        assert!(ctx.reauth_visible());
        assert_eq!(replays.load(Ordering::SeqCst), 0);

        // Second attempt with the right password still replays the original
        ctx.confirm_reauth("s3cret").await.expect("re-auth");
        assert_eq!(replays.load(Ordering::SeqCst), 1);
        assert!(ctx.user_error().is_none());
        // Initial login, failed confirm, successful confirm
        assert_eq!(mock.login_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_never_invokes_the_retry_and_forces_logout() {
        let mock = Arc::new(MockExecutor::new());
        let (ctx, _dir) = logged_in_context(mock).await;

        let replays = Arc::new(AtomicUsize::new(0));
        ctx.dispatch_error(ApiError::ReauthRequired, Some(counting_retry(&replays)))
            .await;

        ctx.cancel_reauth().await;

        assert_eq!(ctx.status(), AuthStatus::LoggedOut);
        assert!(!ctx.reauth_visible());
        assert_eq!(replays.load(Ordering::SeqCst), 0);

        // A later confirm finds no pending retry to replay
        ctx.confirm_reauth("s3cret").await.expect("re-auth");
        assert_eq!(replays.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_concurrent_trigger_keeps_the_first_retry() {
        let mock = Arc::new(MockExecutor::new());
        let (ctx, _dir) = logged_in_context(mock).await;

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        ctx.request_reauth(counting_retry(&first));
        ctx.request_reauth(counting_retry(&second));

        ctx.confirm_reauth("s3cret").await.expect("re-auth");

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_after_logout_uses_the_last_known_username() {
        let mock = Arc::new(MockExecutor::new());
        let (ctx, _dir) = logged_in_context(mock.clone()).await;

        ctx.logout().await;
        assert!(ctx.session().is_none());

        ctx.confirm_reauth("s3cret").await.expect("re-auth");
        let session = ctx.session().expect("refreshed session");
        assert_eq!(session.username, "maria");
        // No hydrated data survived the logout, so the refreshed session must
        // go back through hydration instead of sitting behind a login screen
        assert_eq!(ctx.status(), AuthStatus::Authenticating);
        ctx.clone().hydrate().await;
        assert_eq!(ctx.status(), AuthStatus::LoggedIn);
        assert_eq!(ctx.warehouses().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn version_mismatch_during_confirm_takes_the_fatal_path() {
        let mock = Arc::new(MockExecutor::new());
        let (ctx, _dir) = logged_in_context(mock.clone()).await;

        let replays = Arc::new(AtomicUsize::new(0));
        ctx.dispatch_error(ApiError::ReauthRequired, Some(counting_retry(&replays)))
            .await;

        mock.fail_next_login(ApiError::VersionMismatch);
        let result = ctx.confirm_reauth("s3cret").await;
        assert!(matches!(result, Err(ApiError::VersionMismatch)));

        assert_eq!(ctx.status(), AuthStatus::LoggedOut);
        assert!(!ctx.reauth_visible());
        assert_eq!(replays.load(Ordering::SeqCst), 0);
        let error = ctx.user_error().expect("persistent message");
        assert!(error.persistent);
    }
}
