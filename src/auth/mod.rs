//! Authentication: session state machine, re-authentication protocol,
//! error dispatch, and the credential store behind them.
//!
//! The entry point is [`AuthContext`]: one per process, constructed at
//! startup. UI collaborators call its operations and react to its snapshot
//! getters; every authenticated failure they catch goes back in through
//! [`AuthContext::dispatch_error`].

pub mod context;
pub mod dispatcher;
pub mod reauth;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{AuthContext, AuthStatus, UserError};
pub use reauth::{RetryFn, RetryFuture};
pub use session::{derive_warehouses, Permissions, Session, Warehouse};
pub use store::{CredentialStore, DurableSession};
