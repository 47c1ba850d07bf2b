//! Health endpoints for the signal relay.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (can this worker relay across workers?)
//!
//! # Readiness
//!
//! A worker is ready while its bus bridge holds an active subscription and
//! it is not shutting down. Without a subscription, sockets on this worker
//! would only ever hear from peers on the same worker, so the load balancer
//! should stop routing new connections here.
//!
//! Once [`HealthState::begin_drain`] has been called readiness stays false,
//! even if the bridge reports a subscription again before it exits.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Liveness and readiness flags shared by the bridge, `main` and the probes.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    bus_subscribed: AtomicBool,
    draining: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live, no subscription, not draining).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            bus_subscribed: AtomicBool::new(false),
            draining: AtomicBool::new(false),
        }
    }

    /// Record that the bus bridge has an active subscription.
    pub fn set_ready(&self) {
        self.bus_subscribed.store(true, Ordering::SeqCst);
    }

    /// Record that the bus subscription is gone.
    pub fn set_not_ready(&self) {
        self.bus_subscribed.store(false, Ordering::SeqCst);
    }

    /// Enter shutdown. Readiness is false from here on.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.bus_subscribed.load(Ordering::SeqCst) && !self.draining.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn probe(state: Arc<HealthState>, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");

        health_router(state)
            .oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_health_state_default() {
        let state = HealthState::new();
        assert!(state.is_live());
        assert!(!state.is_ready(), "No bus subscription yet");
    }

    #[test]
    fn test_ready_follows_bus_subscription() {
        let state = HealthState::new();

        state.set_ready();
        assert!(state.is_ready());

        state.set_not_ready();
        assert!(!state.is_ready());
    }

    #[test]
    fn test_drain_overrides_subscription() {
        let state = HealthState::new();
        state.set_ready();

        state.begin_drain();
        assert!(!state.is_ready());

        // A late resubscription must not flip a draining worker back to ready.
        state.set_ready();
        assert!(!state.is_ready());
        assert!(state.is_live());
    }

    #[test]
    fn test_health_state_thread_safety() {
        let state = Arc::new(HealthState::new());

        let state_clone = Arc::clone(&state);
        std::thread::spawn(move || state_clone.set_ready())
            .join()
            .expect("Thread should complete");

        assert!(state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let state = Arc::new(HealthState::new());
        assert_eq!(probe(state, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_endpoint_transitions() {
        let state = Arc::new(HealthState::new());
        assert_eq!(
            probe(Arc::clone(&state), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.set_ready();
        assert_eq!(probe(Arc::clone(&state), "/ready").await, StatusCode::OK);

        state.begin_drain();
        assert_eq!(
            probe(Arc::clone(&state), "/ready").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let state = Arc::new(HealthState::new());
        assert_eq!(probe(state, "/unknown").await, StatusCode::NOT_FOUND);
    }
}
