//! Core library for the Armazém warehouse client.
//!
//! Owns the session/authentication lifecycle and the API-failure-recovery
//! protocol: a persisted session restored on startup, backend-driven
//! re-authentication that pauses the current flow and transparently replays
//! the interrupted operation once, and a single dispatcher that classifies
//! every API failure (fatal version mismatch, recoverable re-auth demand,
//! session expiry, generic). Screens, navigation and theming live in the
//! embedding app; they call into [`AuthContext`] and react to its state.
//!
//! Typical wiring at process start:
//!
//! ```no_run
//! use std::sync::Arc;
//! use armazem_core::{AuthContext, Config, CredentialStore, HttpExecutor};
//!
//! # async fn wire() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let executor = Arc::new(HttpExecutor::new(&config)?);
//! let store = CredentialStore::new(config.cache_dir()?)?;
//! let ctx = AuthContext::new(executor, store);
//! ctx.restore_session();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, HttpExecutor, RequestExecutor};
pub use auth::{
    AuthContext, AuthStatus, CredentialStore, DurableSession, Permissions, RetryFn, RetryFuture,
    Session, UserError, Warehouse,
};
pub use config::Config;
