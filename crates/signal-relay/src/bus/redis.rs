//! Redis-backed bus.
//!
//! # Connection Pattern
//!
//! Publishing goes through a `ConnectionManager`, which multiplexes commands
//! over one connection and reconnects on its own. It is cheap to clone, so
//! each publish clones it instead of sharing it behind a lock.
//!
//! Subscribing needs a dedicated connection in pub/sub mode. Each
//! [`BusSubscriber::subscribe`] call opens a fresh one, issues `PSUBSCRIBE`
//! for the room pattern and `SUBSCRIBE` for the admin channel, and turns it
//! into a message stream. The stream ends when the connection drops; the
//! bridge then calls `subscribe` again.

use super::{BusMessage, BusPublisher, BusStream, BusSubscriber};
use crate::errors::RelayError;
use crate::observability::metrics;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client};
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use futures::StreamExt;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Redis pub/sub bus.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    /// Open a Redis client and establish the publishing connection.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Redis` if the URL is invalid or the server is
    /// unreachable.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, RelayError> {
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            // Note: Do NOT log redis_url as it may contain credentials
            // (e.g., redis://:password@host:port)
            error!(
                target: "relay.bus",
                error = %e,
                "Failed to open Redis client"
            );
            RelayError::Redis(format!("Failed to open Redis client: {e}"))
        })?;

        let publisher = ConnectionManager::new(client.clone()).await.map_err(|e| {
            error!(
                target: "relay.bus",
                error = %e,
                "Failed to connect to Redis"
            );
            RelayError::Redis(format!("Failed to connect to Redis: {e}"))
        })?;

        debug!(target: "relay.bus", "Redis bus connected");

        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl BusPublisher for RedisBus {
    #[instrument(skip_all, fields(channel = %channel))]
    async fn publish(&self, channel: &str, payload: String) -> Result<(), RelayError> {
        let mut conn = self.publisher.clone();
        let start = Instant::now();

        let receivers: i64 = conn.publish(channel, payload).await.map_err(|e| {
            warn!(
                target: "relay.bus",
                error = %e,
                channel = %channel,
                "Failed to publish to Redis"
            );
            RelayError::Redis(format!("Failed to publish: {e}"))
        })?;

        metrics::record_bus_publish_duration(start.elapsed());
        debug!(
            target: "relay.bus",
            channel = %channel,
            receivers = receivers,
            "Published to Redis"
        );

        Ok(())
    }
}

#[async_trait]
impl BusSubscriber for RedisBus {
    #[instrument(skip_all, fields(pattern = %pattern, admin_channel = %admin_channel))]
    async fn subscribe(
        &self,
        pattern: &str,
        admin_channel: &str,
    ) -> Result<BusStream, RelayError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            warn!(
                target: "relay.bus",
                error = %e,
                "Failed to open Redis pub/sub connection"
            );
            RelayError::Redis(format!("Failed to open pub/sub connection: {e}"))
        })?;

        pubsub.psubscribe(pattern).await.map_err(|e| {
            warn!(target: "relay.bus", error = %e, "PSUBSCRIBE failed");
            RelayError::Redis(format!("PSUBSCRIBE failed: {e}"))
        })?;

        pubsub.subscribe(admin_channel).await.map_err(|e| {
            warn!(target: "relay.bus", error = %e, "SUBSCRIBE failed");
            RelayError::Redis(format!("SUBSCRIBE failed: {e}"))
        })?;

        debug!(target: "relay.bus", "Redis subscriptions active");

        let stream = pubsub.into_on_message().map(|msg| BusMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });

        Ok(Box::pin(stream))
    }
}
