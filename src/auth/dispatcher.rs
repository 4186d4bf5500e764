//! Error classifier and dispatcher.
//!
//! The single funnel for every authenticated operation's failure path. UI
//! code never interprets an [`ApiError`] itself: it hands the error (and,
//! when the operation is safely replayable, a retry continuation) to
//! [`AuthContext::dispatch_error`], which routes it by priority.

use tracing::{error, warn};

use crate::api::ApiError;

use super::context::{AuthContext, AuthStatus, UserError};
use super::reauth::RetryFn;

/// Persistent message for a rejected client build
const VERSION_MISMATCH_MESSAGE: &str =
    "Versão do aplicativo desatualizada. Atualize para continuar.";

/// Shown when the session cannot be recovered without a fresh login
const SESSION_EXPIRED_MESSAGE: &str = "Sessão expirada. Faça login novamente.";

impl AuthContext {
    /// Route a classified failure. Priority order:
    ///
    /// 1. Version mismatch: persistent error, forced logout, no retry ever.
    /// 2. Re-auth required with a retry: pause behind the re-auth prompt.
    /// 3. Re-auth required without a retry, or unauthorized: session expired,
    ///    forced logout.
    /// 4. Everything else: transient user-facing message, no transition.
    pub async fn dispatch_error(&self, failure: ApiError, retry: Option<RetryFn>) {
        match failure {
            ApiError::VersionMismatch => {
                error!("Server rejected this client version");
                self.fatal_version_mismatch().await;
            }
            ApiError::ReauthRequired => match retry {
                Some(retry) => self.request_reauth(retry),
                None => self.session_expired().await,
            },
            ApiError::Unauthorized => self.session_expired().await,
            other => {
                warn!(error = %other, "Surfacing operation failure to the user");
                self.lock().user_error = Some(UserError::transient(other.to_string()));
            }
        }
    }

    pub(crate) async fn fatal_version_mismatch(&self) {
        {
            let mut state = self.lock();
            state.reauth_visible = false;
            state.pending_retry = None;
            state.user_error = Some(UserError::persistent(VERSION_MISMATCH_MESSAGE));
        }
        if self.status() != AuthStatus::LoggedOut {
            self.logout().await;
        }
    }

    pub(crate) async fn session_expired(&self) {
        self.lock().user_error = Some(UserError::transient(SESSION_EXPIRED_MESSAGE));
        self.logout().await;
    }
}
