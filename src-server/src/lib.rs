//! Cloakscope HTTP service
//!
//! Thin shell over the workspace crates: it authenticates triggers, turns
//! requests into divergence tests or worker tasks, and records each
//! invocation as a job run. Core logic lives in the `crates/` directory.
//!
//! # Routes
//!
//! - `GET /health`
//! - `POST /v1/divergence-test` `{ adId, targetUrl }`
//! - `POST /v1/worker/run` `{ taskType, scheduleType? }`, signed or bearer

pub mod app;
pub mod error;
pub mod handlers;
pub mod state;
pub mod worker;

pub use app::build_router;
pub use error::ApiError;
pub use state::AppState;
pub use worker::{run_task, WorkerReport};

/// Initialize tracing subscriber for logging
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cloakscope=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
