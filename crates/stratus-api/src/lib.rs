//! Read-mostly API over a running grid search.
//!
//! [`ApiHandler`] is the seam; [`GridApiAdapter`] serves it from a
//! [`stratus_core::GridSearch`]. With feature `http`, [`HttpApi`] mounts it on
//! an axum router.

mod error;
pub use error::ApiError;

mod handler;
pub use handler::{ApiHandler, CostSummary};

mod adapter;
pub use adapter::GridApiAdapter;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpApi;

#[cfg(feature = "http")]
pub use axum;
