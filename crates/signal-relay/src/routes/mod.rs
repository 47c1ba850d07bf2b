//! HTTP routes for the signal relay.
//!
//! Defines the Axum router and application state.

use crate::auth::IdentityVerifier;
use crate::bus::{BusPublisher, ChannelNames};
use crate::config::Config;
use crate::handlers;
use crate::observability::{health_router, HealthState};
use crate::registry::{AdminViewers, ConnectionRegistry};
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Rooms attached on this worker.
    pub registry: Arc<ConnectionRegistry>,

    /// Admin event subscribers on this worker.
    pub admins: Arc<AdminViewers>,

    /// Bus the signaling endpoint publishes to.
    pub publisher: Arc<dyn BusPublisher>,

    /// Identity collaborator for bearer tokens.
    pub verifier: Arc<dyn IdentityVerifier>,

    /// Bus channel naming.
    pub channels: ChannelNames,

    /// Service configuration.
    pub config: Config,

    /// Parent of every connection's cancellation token. Cancelled on shutdown.
    pub shutdown_token: CancellationToken,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/api/v1/ws/ws` - Signaling WebSocket (hosts and viewers)
/// - `/api/v1/ws/events` - Admin event WebSocket
/// - `/health` - Liveness probe
/// - `/ready` - Readiness probe (bus subscription held, not draining)
/// - `/metrics` - Prometheus metrics, when a recorder handle is supplied
/// - TraceLayer for request logging
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: Option<PrometheusHandle>,
) -> Router {
    let ws_routes = Router::new()
        .route("/api/v1/ws/ws", get(handlers::signaling_upgrade))
        .route("/api/v1/ws/events", get(handlers::events_upgrade))
        .with_state(state);

    let mut app = ws_routes.merge(health_router(health_state));

    if let Some(handle) = metrics_handle {
        let metrics_routes = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
        app = app.merge(metrics_routes);
    }

    app.layer(TraceLayer::new_for_http())
}
