//! # formgate-api — Axum Service Layer
//!
//! Wires `formgate-core` validation and envelopes to HTTP. Handlers run
//! inside the dispatcher, which turns every outcome of a managed request,
//! faults and panics included, into a response envelope.
//!
//! ## Routes
//!
//! | Path | Module | Managed |
//! |------|--------|---------|
//! | `/health/liveness`, `/health/readiness` | this module | never |
//! | `/message/{category}/{part1}[/{part2}]` | [`routes::messages`] | sniffed |
//! | `/signup/` | [`routes::signup`] | always |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → CatchPanic → LoginGate → Handler
//! ```
//!
//! Health probes and message pages sit outside the login gate so error
//! pages stay reachable. Unmatched routes fall back to the `error/404`
//! message page.
//!
//! ## Crate Policy
//!
//! - Sits at the top of the dependency DAG; depends on `formgate-core`.
//! - No validation logic in route handlers. Forms are declared with
//!   `formgate-core` types and processed by [`views::FormView`].
//! - Every managed response goes through [`dispatch::dispatch`].

pub mod auth;
pub mod dispatch;
pub mod error;
pub mod extractors;
pub mod messaging;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod views;

use axum::middleware::from_fn;
use axum::Router;

use crate::auth::LoginGate;
use crate::error::StartupError;

pub use dispatch::{dispatch, Envelope, Management, Reply};
pub use error::AppFault;
pub use state::{AppConfig, AppState};

/// Assemble the full application router with all routes and middleware.
///
/// Fails only if a built-in view is misconfigured.
pub fn app(state: AppState) -> Result<Router, StartupError> {
    let gate = LoginGate::from_config(&state.config);
    let metrics = state.metrics.clone();
    let diagnostic = state.config.diagnostic;

    // Gated form routes.
    let gated = Router::new()
        .merge(routes::signup::router()?)
        .layer(from_fn(auth::login_gate_middleware))
        .layer(axum::Extension(routes::signup::MANAGEMENT));

    let pages = Router::new()
        .merge(routes::messages::router())
        .merge(gated)
        .fallback(routes::messages::not_found)
        .layer(middleware::panic::layer(diagnostic))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(axum::Extension(gate))
        .layer(axum::Extension(metrics))
        .with_state(state);

    // Unauthenticated health probes.
    let health = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness));

    Ok(Router::new().merge(health).merge(pages))
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: returns 200 when the application is ready to serve.
async fn readiness() -> &'static str {
    "ready"
}
