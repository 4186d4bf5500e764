//! Scriptable executor and context fixtures for the auth tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::api::{ApiError, RequestExecutor};

use super::context::AuthContext;
use super::session::{Permissions, Session};
use super::store::CredentialStore;

/// Mock executor: succeeds by default, with per-call failure scripting.
/// Default permissions carry two warehouses so hydration derives a non-empty
/// list.
pub(crate) struct MockExecutor {
    login_failures: Mutex<VecDeque<ApiError>>,
    permission_failures: Mutex<VecDeque<ApiError>>,
    fail_next_logout: AtomicBool,
    permissions_gate: Mutex<Option<Arc<Notify>>>,
    login_calls: AtomicUsize,
    permission_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl MockExecutor {
    pub(crate) fn new() -> Self {
        Self {
            login_failures: Mutex::new(VecDeque::new()),
            permission_failures: Mutex::new(VecDeque::new()),
            fail_next_logout: AtomicBool::new(false),
            permissions_gate: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            permission_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_next_login(&self, failure: ApiError) {
        self.login_failures.lock().unwrap().push_back(failure);
    }

    pub(crate) fn fail_next_permissions(&self, failure: ApiError) {
        self.permission_failures.lock().unwrap().push_back(failure);
    }

    pub(crate) fn fail_next_logout(&self) {
        self.fail_next_logout.store(true, Ordering::SeqCst);
    }

    /// Make the next permissions fetch wait until the returned handle is
    /// notified, so tests can interleave a logout with an in-flight hydration.
    pub(crate) fn gate_permissions(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.permissions_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn permission_calls(&self) -> usize {
        self.permission_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    async fn login(
        &self,
        username: &str,
        _password: &str,
        _device_token: &str,
    ) -> Result<Session, ApiError> {
        let call = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(failure) = self.login_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        Ok(Session {
            user_id: 42,
            username: username.to_string(),
            session_token: format!("tok-{}", call),
            secondary_session_id: Some(format!("sec-{}", call)),
            is_test_environment: false,
        })
    }

    async fn fetch_permissions(&self, _token: &str) -> Result<Permissions, ApiError> {
        self.permission_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.permissions_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(failure) = self.permission_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        Ok(Permissions {
            warehouse_codes: "1, 2".to_string(),
            warehouse_names: "1 - ATACADO, 2 - PRODUTO ACABADO".to_string(),
            capabilities: Default::default(),
        })
    }

    async fn call(
        &self,
        _token: &str,
        _secondary_session_id: Option<&str>,
        _endpoint: &str,
        _payload: serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        Ok(serde_json::json!({}))
    }

    async fn logout(&self, _token: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_logout.swap(false, Ordering::SeqCst) {
            return Err(ApiError::Server("logout indisponível".to_string()));
        }
        Ok(())
    }
}

/// Context over a fresh temp-dir store. The `TempDir` must be kept alive for
/// the duration of the test.
pub(crate) fn test_context(executor: Arc<MockExecutor>) -> (Arc<AuthContext>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp store dir");
    let store = CredentialStore::new(dir.path().to_path_buf()).expect("create store");
    let ctx = AuthContext::new(executor, store);
    (ctx, dir)
}
