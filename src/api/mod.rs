//! API layer: failure classification, the request-execution seam, and the
//! reqwest transport that implements it.

pub mod client;
pub mod error;
pub mod executor;

pub use client::HttpExecutor;
pub use error::ApiError;
pub use executor::RequestExecutor;
