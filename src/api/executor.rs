//! The request-execution seam.
//!
//! The session core never talks to the network directly; it orchestrates an
//! implementation of [`RequestExecutor`]. The shipping implementation is
//! [`HttpExecutor`](super::HttpExecutor); tests substitute a scripted mock.

use async_trait::async_trait;

use crate::auth::{Permissions, Session};

use super::ApiError;

#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Authenticate and return a fresh session. `device_token` identifies
    /// this installation; the store generates and memoizes it per username.
    async fn login(
        &self,
        username: &str,
        password: &str,
        device_token: &str,
    ) -> Result<Session, ApiError>;

    /// Fetch the capability/warehouse permission set for the session.
    async fn fetch_permissions(&self, token: &str) -> Result<Permissions, ApiError>;

    /// Execute an authenticated call. Transactional endpoints additionally
    /// require the secondary session identifier; executors must fail with
    /// [`ApiError::ReauthRequired`] when it is needed but absent.
    async fn call(
        &self,
        token: &str,
        secondary_session_id: Option<&str>,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ApiError>;

    /// Best-effort server-side logout. Callers ignore failures.
    async fn logout(&self, token: &str) -> Result<(), ApiError>;
}
