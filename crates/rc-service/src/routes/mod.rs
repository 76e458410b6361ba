//! HTTP routes for the Room Controller.

use crate::handlers;
use crate::services::{AuthCalloutService, StateSyncBridge};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Upper bound for every route except the callout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
pub struct AppState {
    /// Database connection pool, used by the health check.
    pub pool: PgPool,

    pub callout: AuthCalloutService,

    pub state_sync: StateSyncBridge,

    /// Cancelled when the process shuts down; callouts run under child
    /// tokens of it.
    pub shutdown: CancellationToken,
}

/// Build the application routes.
///
/// - `POST /internal/auth/callout` - authorization callout
/// - `POST /internal/recorder/events` - recorder signals
/// - `POST /internal/rooms/status` - room running-state transitions
/// - `POST /internal/rooms/:sid/participants` - participant counters
/// - `GET /health` - liveness with database ping
/// - `GET /metrics` - Prometheus scrape
///
/// The callout route sits outside the request timeout. Every callout must
/// end in a signed envelope, and a timeout would drop the handler and answer
/// with an empty 408 instead; the callout is bounded by its cancellation
/// token.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let callout_routes = Router::new()
        .route("/internal/auth/callout", post(handlers::auth_callout))
        .with_state(state.clone());

    let internal_routes = Router::new()
        .route("/internal/recorder/events", post(handlers::recorder_event))
        .route("/internal/rooms/status", post(handlers::update_room_status))
        .route(
            "/internal/rooms/:sid/participants",
            post(handlers::update_participants),
        )
        .route("/health", get(handlers::health_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    internal_routes
        .merge(metrics_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .merge(callout_routes)
        .layer(TraceLayer::new_for_http())
}
