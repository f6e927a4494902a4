//! `adk-catalog-server` serves [`adk_catalog`] over HTTP.
//! Startup reconciliation runs in the background; `/health` and `/` report
//! its progress.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::ApiError;
pub use server::{AppState, app_router, run_server};
