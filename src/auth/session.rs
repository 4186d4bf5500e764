//! Session and permission data model.
//!
//! `Session` is created by a successful login and owned exclusively by the
//! [`AuthContext`](super::AuthContext); `Permissions` comes back from the
//! post-login hydration fetch and is re-derived into the warehouse list on
//! every hydration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub session_token: String,
    /// Secondary identifier required by transactional endpoints. Absent on
    /// older backends; its absence is itself a re-auth condition for those
    /// endpoints.
    #[serde(default)]
    pub secondary_session_id: Option<String>,
    #[serde(default)]
    pub is_test_environment: bool,
}

/// Capability flags plus the two comma-delimited warehouse fields, exactly as
/// the backend returns them. Everything besides the warehouse fields is
/// opaque to this crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default)]
    pub warehouse_codes: String,
    #[serde(default)]
    pub warehouse_names: String,
    #[serde(flatten)]
    pub capabilities: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub code: i64,
    pub name: String,
}

/// Derive the warehouse list by pairing the comma-delimited code and name
/// lists positionally. A missing name falls back to a synthetic label; a code
/// that does not parse as an integer is skipped.
pub fn derive_warehouses(permissions: &Permissions) -> Vec<Warehouse> {
    let names: Vec<&str> = if permissions.warehouse_names.trim().is_empty() {
        Vec::new()
    } else {
        permissions.warehouse_names.split(',').map(str::trim).collect()
    };

    let mut warehouses = Vec::new();
    for (i, raw) in permissions.warehouse_codes.split(',').enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let code: i64 = match raw.parse() {
            Ok(code) => code,
            Err(_) => {
                warn!(code = raw, "Skipping unparsable warehouse code");
                continue;
            }
        };
        let name = match names.get(i) {
            Some(name) if !name.is_empty() => (*name).to_string(),
            _ => format!("Armazém {}", code),
        };
        warehouses.push(Warehouse { code, name });
    }
    warehouses
}
