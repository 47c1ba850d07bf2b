//! Signal Relay
//!
//! WebRTC signaling relay worker. Any number of workers may run behind a
//! load balancer; they coordinate only through the Redis bus.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the bus (Redis, or an in-process bus when `REDIS_URL` is unset)
//! 4. Create the connection registry and admin viewer set
//! 5. Spawn the bus bridge (readiness follows its subscription)
//! 6. Serve WebSocket, health and metrics routes
//! 7. Wait for shutdown signal
//!
//! # Shutdown
//!
//! Readiness drops first, then the root token is cancelled. Open sockets get
//! a 1001 close frame, the bridge unsubscribes, and the server stops
//! accepting connections.

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use signal_relay::auth::JwtIdentityVerifier;
use signal_relay::bus::{BusPublisher, BusSubscriber, ChannelNames, MemoryBus, RedisBus};
use signal_relay::config::Config;
use signal_relay::observability::{init_metrics_recorder, HealthState};
use signal_relay::registry::{AdminViewers, ConnectionRegistry};
use signal_relay::routes::{build_routes, AppState};
use signal_relay::tasks::BusBridge;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_relay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Signal Relay");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        worker_id = %config.worker_id,
        bind_address = %config.bind_address,
        room_channel_prefix = %config.room_channel_prefix,
        admin_channel = %config.admin_channel,
        offer_ttl_seconds = config.offer_ttl.map(|ttl| ttl.as_secs()),
        outbound_buffer = config.outbound_buffer,
        max_message_bytes = config.max_message_bytes,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    // Connect the bus
    let publisher: Arc<dyn BusPublisher>;
    let subscriber: Arc<dyn BusSubscriber>;
    if let Some(redis_url) = &config.redis_url {
        info!("Connecting to Redis...");
        let bus = Arc::new(RedisBus::connect(redis_url).await.map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?);
        info!("Redis connection established");
        publisher = bus.clone();
        subscriber = bus;
    } else {
        warn!("REDIS_URL not set, running as a single worker on an in-process bus");
        let bus = Arc::new(MemoryBus::new());
        publisher = bus.clone();
        subscriber = bus;
    }

    let health_state = Arc::new(HealthState::new());
    let registry = Arc::new(ConnectionRegistry::new(config.offer_ttl));
    let admins = Arc::new(AdminViewers::new());
    let channels = ChannelNames::from_config(&config);

    // Root token: cancelling it stops the bridge and every open socket
    let shutdown_token = CancellationToken::new();

    let bridge = BusBridge::new(
        subscriber,
        Arc::clone(&registry),
        Arc::clone(&admins),
        channels.clone(),
        Arc::clone(&health_state),
    )
    .with_retry_interval(config.bus_retry_interval)
    .spawn(&shutdown_token);
    info!("Bus bridge started");

    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let drain_period = config.drain_period;

    let verifier = Arc::new(JwtIdentityVerifier::new(
        &config.jwt_secret,
        config.jwt_clock_skew,
    ));
    let state = Arc::new(AppState {
        registry,
        admins,
        publisher,
        verifier,
        channels,
        config,
        shutdown_token: shutdown_token.clone(),
    });
    let app = build_routes(state, Arc::clone(&health_state), Some(prometheus_handle));

    // Bind listener before serving to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %bind_addr, "Failed to bind listener");
            format!("Failed to bind {bind_addr}: {e}")
        })?;
    info!(addr = %bind_addr, "Signal Relay listening");

    let server_health = Arc::clone(&health_state);
    let server_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");

            // Mark as not ready immediately so the load balancer stops routing here
            server_health.begin_drain();
            if !drain_period.is_zero() {
                info!(drain_seconds = drain_period.as_secs(), "Draining before closing sockets");
                tokio::time::sleep(drain_period).await;
            }

            // Closes open sockets (1001) and stops the bridge
            server_token.cancel();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    bridge.shutdown().await;

    info!("Signal Relay shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
