//! HTTP application wiring (Axum router + runner wiring).
//!
//! - `routes/`: HTTP handlers
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;
use tracing::{debug, warn};

use jobward_core::{ErrorKind, JobId, SystemClock};
use jobward_infra::{Dispatcher, FileEventStore, Runner};

use crate::config::ServerConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Shared handler state: the dispatcher over the on-disk store plus config.
pub struct AppState {
    pub dispatcher: Dispatcher<FileEventStore>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let runner = Runner::new(FileEventStore::new(&config.root), Arc::new(SystemClock))
            .with_lease_ttl(config.lease_ttl);
        Self::with_runner(config, runner)
    }

    /// Use a preconfigured runner (custom adapters, clock or facts).
    pub fn with_runner(config: ServerConfig, runner: Runner<FileEventStore>) -> Self {
        Self {
            dispatcher: Dispatcher::new(runner),
            config,
        }
    }

    pub fn runner(&self) -> &Runner<FileEventStore> {
        self.dispatcher.runner()
    }

    /// Advance `job_id` on a blocking worker without waiting for it.
    pub fn spawn_advance(&self, job_id: JobId) {
        let runner = self.runner().clone();
        let worker = self.config.worker_id.clone();
        tokio::task::spawn_blocking(move || match runner.advance(&job_id, &worker) {
            Ok(state) => debug!(job_id = %job_id, status = %state.status, "background advance finished"),
            Err(e) if e.kind() == ErrorKind::LeaseHeld => {
                debug!(job_id = %job_id, "background advance skipped: job is leased elsewhere")
            }
            Err(e) => warn!(job_id = %job_id, error = %e, "background advance failed"),
        });
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(state: AppState) -> Router {
    let auth_state = middleware::AuthState {
        token: state.config.auth_token.as_deref().map(Arc::from),
    };
    let body_limit = state.config.max_body_bytes;
    let state = Arc::new(state);

    // Job routes: bearer auth when a token is configured.
    let protected = routes::router()
        .layer(Extension(state))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .fallback(routes::system::not_found)
        .layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(body_limit)))
}
