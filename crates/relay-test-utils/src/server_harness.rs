//! Test server harness for end-to-end testing
//!
//! Provides `TestRelayServer` for spawning real relay instances in tests.
//! Servers spawned with the same [`MemoryBus`] behave like separate workers
//! sharing one Redis.

use crate::token_builders::TEST_JWT_SECRET;
use signal_relay::auth::JwtIdentityVerifier;
use signal_relay::bus::{ChannelNames, MemoryBus};
use signal_relay::config::Config;
use signal_relay::observability::HealthState;
use signal_relay::registry::{AdminViewers, ConnectionRegistry};
use signal_relay::routes::{self, AppState};
use signal_relay::tasks::{BridgeHandle, BusBridge};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long the harness polls a condition before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test harness for spawning a signal relay in end-to-end tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_cross_worker() -> anyhow::Result<()> {
///     let bus = Arc::new(MemoryBus::new());
///     let worker_a = TestRelayServer::spawn_with_bus(Arc::clone(&bus), "relay-a").await?;
///     let worker_b = TestRelayServer::spawn_with_bus(bus, "relay-b").await?;
///     // host on worker_a, viewer on worker_b ...
///     Ok(())
/// }
/// ```
pub struct TestRelayServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    health: Arc<HealthState>,
    bus: Arc<MemoryBus>,
    shutdown_token: CancellationToken,
    bridge: Option<BridgeHandle>,
    _handle: JoinHandle<()>,
}

impl TestRelayServer {
    /// Spawn a relay with its own in-memory bus.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_bus(Arc::new(MemoryBus::new()), "relay-test").await
    }

    /// Spawn a relay worker on a shared bus.
    pub async fn spawn_with_bus(bus: Arc<MemoryBus>, worker_id: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(bus, worker_id, HashMap::new()).await
    }

    /// Spawn a relay worker with extra `RELAY_*` environment overrides.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the bus bridge and wait until it is subscribed
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(
        bus: Arc<MemoryBus>,
        worker_id: &str,
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("RELAY_JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
            ("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("RELAY_WORKER_ID".to_string(), worker_id.to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let health = Arc::new(HealthState::new());
        let registry = Arc::new(ConnectionRegistry::new(config.offer_ttl));
        let admins = Arc::new(AdminViewers::new());
        let channels = ChannelNames::from_config(&config);
        let shutdown_token = CancellationToken::new();

        let bridge = BusBridge::new(
            bus.clone(),
            Arc::clone(&registry),
            Arc::clone(&admins),
            channels.clone(),
            Arc::clone(&health),
        )
        .with_retry_interval(Duration::from_millis(50))
        .spawn(&shutdown_token);

        let verifier = Arc::new(JwtIdentityVerifier::new(
            &config.jwt_secret,
            config.jwt_clock_skew,
        ));
        let state = Arc::new(AppState {
            registry,
            admins,
            publisher: bus.clone(),
            verifier,
            channels,
            config,
            shutdown_token: shutdown_token.clone(),
        });

        // Build routes using the relay's real route builder
        let app = routes::build_routes(Arc::clone(&state), Arc::clone(&health), None);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        let server = Self {
            addr,
            state,
            health,
            bus,
            shutdown_token,
            bridge: Some(bridge),
            _handle: handle,
        };

        // Messages published before the bridge subscribes would be lost.
        let health = Arc::clone(&server.health);
        wait_until(move || health.is_ready())
            .await
            .map_err(|_| anyhow::anyhow!("Bus bridge did not subscribe in time"))?;

        Ok(server)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the base HTTP URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Signaling endpoint URL for `role`, `room_id` and `token`.
    pub fn signaling_url(&self, role: &str, room_id: &str, token: &str) -> String {
        format!(
            "ws://{}/api/v1/ws/ws?role={role}&room_id={room_id}&token={token}",
            self.addr
        )
    }

    /// Admin event endpoint URL. `None` omits the token parameter.
    pub fn events_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/api/v1/ws/events?token={token}", self.addr),
            None => format!("ws://{}/api/v1/ws/events", self.addr),
        }
    }

    /// The worker's room registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.state.registry
    }

    /// The worker's admin viewer set.
    pub fn admins(&self) -> &AdminViewers {
        &self.state.admins
    }

    /// The bus this worker publishes to and subscribes on.
    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    /// Health flags shared with the bridge.
    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Channel names this worker uses.
    pub fn channels(&self) -> &ChannelNames {
        &self.state.channels
    }

    /// Wait until exactly `count` signaling connections are attached here.
    pub async fn wait_for_connections(&self, count: usize) -> Result<(), anyhow::Error> {
        let state = Arc::clone(&self.state);
        wait_until(move || state.registry.connection_count() == count)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Expected {count} connections, found {}",
                    self.state.registry.connection_count()
                )
            })
    }

    /// Wait until exactly `count` admin viewers are subscribed here.
    pub async fn wait_for_admins(&self, count: usize) -> Result<(), anyhow::Error> {
        let state = Arc::clone(&self.state);
        wait_until(move || state.admins.len() == count)
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Expected {count} admin viewers, found {}",
                    self.state.admins.len()
                )
            })
    }

    /// Cancel the bridge and every open socket, then wait for the bridge.
    pub async fn shutdown(mut self) {
        self.health.begin_drain();
        self.shutdown_token.cancel();
        if let Some(bridge) = self.bridge.take() {
            bridge.shutdown().await;
        }
    }
}

impl Drop for TestRelayServer {
    fn drop(&mut self) {
        // Stops the bridge and open sockets, then the HTTP server task.
        self.shutdown_token.cancel();
        self._handle.abort();
    }
}

/// Poll `condition` every few milliseconds until it holds.
///
/// # Errors
///
/// Returns an error if it does not hold within five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<(), anyhow::Error> {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("condition not met within {:?}", WAIT_TIMEOUT))
}
