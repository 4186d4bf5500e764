//! File-backed credential store.
//!
//! Persists the durable session record, small last-known hints (last
//! username, per-user last warehouse), and per-username device tokens, one
//! pretty-printed JSON file per record under the app cache directory.
//!
//! Storage failures are soft by design: callers log and fall back to safe
//! defaults instead of failing the auth flow.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use super::session::{Permissions, Session, Warehouse};

/// Durable session record file name
const SESSION_FILE: &str = "session.json";

/// Last-known-context hints file name
const HINTS_FILE: &str = "hints.json";

/// Per-username device token file name
const DEVICES_FILE: &str = "devices.json";

/// Optional stable installation identifier, written by the platform shell.
/// Read-only from this crate's point of view.
const INSTALL_ID_FILE: &str = "install_id";

/// Length of generated device tokens
const DEVICE_TOKEN_LEN: usize = 32;

/// The whole authenticated state, persisted as one slot so restore-on-start
/// can skip hydration entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurableSession {
    pub session: Session,
    pub permissions: Permissions,
    pub warehouses: Vec<Warehouse>,
    pub saved_at: DateTime<Utc>,
}

impl DurableSession {
    pub fn new(session: Session, permissions: Permissions, warehouses: Vec<Warehouse>) -> Self {
        Self {
            session,
            permissions,
            warehouses,
            saved_at: Utc::now(),
        }
    }
}

/// Last-known hints. Not authentication-critical; losing this file only
/// costs the user a pre-filled form field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hints {
    last_username: Option<String>,
    #[serde(default)]
    last_warehouse: HashMap<i64, i64>,
}

pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn load_file<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", name))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", name))?;
        Ok(Some(value))
    }

    fn save_file<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let contents = serde_json::to_string_pretty(value)?;
        std::fs::write(self.path(name), contents)
            .with_context(|| format!("Failed to write {}", name))?;
        Ok(())
    }

    // ===== Durable session record =====

    /// Load the persisted session record. An unparsable record is treated as
    /// absent: the user simply logs in again.
    pub fn load_session(&self) -> Option<DurableSession> {
        match self.load_file(SESSION_FILE) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable session record");
                None
            }
        }
    }

    pub fn save_session(&self, record: &DurableSession) -> Result<()> {
        self.save_file(SESSION_FILE, record)
    }

    pub fn clear_session(&self) -> Result<()> {
        let path = self.path(SESSION_FILE);
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session record")?;
        }
        Ok(())
    }

    // ===== Hints =====

    fn hints(&self) -> Hints {
        match self.load_file(HINTS_FILE) {
            Ok(Some(hints)) => hints,
            Ok(None) => Hints::default(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable hints file");
                Hints::default()
            }
        }
    }

    pub fn last_username(&self) -> Option<String> {
        self.hints().last_username
    }

    pub fn set_last_username(&self, username: &str) -> Result<()> {
        let mut hints = self.hints();
        hints.last_username = Some(username.to_string());
        self.save_file(HINTS_FILE, &hints)
    }

    pub fn last_warehouse(&self, user_id: i64) -> Option<i64> {
        self.hints().last_warehouse.get(&user_id).copied()
    }

    pub fn set_last_warehouse(&self, user_id: i64, code: i64) -> Result<()> {
        let mut hints = self.hints();
        hints.last_warehouse.insert(user_id, code);
        self.save_file(HINTS_FILE, &hints)
    }

    // ===== Device tokens =====

    fn install_id(&self) -> Option<String> {
        let path = self.path(INSTALL_ID_FILE);
        let id = std::fs::read_to_string(path).ok()?;
        let id = id.trim();
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }

    fn device_tokens(&self) -> HashMap<String, String> {
        match self.load_file(DEVICES_FILE) {
            Ok(Some(tokens)) => tokens,
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable device token file");
                HashMap::new()
            }
        }
    }

    /// Device token for a username, resolved through an ordered fallback
    /// chain: the stable installation identifier when the platform provides
    /// one, else the token previously generated for this username, else a
    /// fresh random token which is then memoized.
    pub fn device_token(&self, username: &str) -> String {
        if let Some(id) = self.install_id() {
            return id;
        }

        let mut tokens = self.device_tokens();
        if let Some(token) = tokens.get(username) {
            return token.clone();
        }

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(DEVICE_TOKEN_LEN)
            .map(char::from)
            .collect();

        tokens.insert(username.to_string(), token.clone());
        if let Err(e) = self.save_file(DEVICES_FILE, &tokens) {
            // Token still works for this process, it just will not survive a restart
            warn!(error = %e, "Failed to persist device token");
        }
        token
    }
}
