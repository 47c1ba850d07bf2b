//! Cross-worker bus bridge.
//!
//! One bridge task runs per worker for the whole process lifetime. It
//! subscribes to every room channel plus the admin channel and fans each
//! message out to the sockets attached to *this* worker. It never publishes.
//!
//! # Message Handling
//!
//! - Room channel: parse, strip the sender tag, cache offers, deliver to
//!   every local member of the room except the sender. Rooms with no local
//!   members are ignored.
//! - Admin channel: deliver the payload verbatim to every local admin viewer.
//!
//! # Bus Loss
//!
//! If subscribing fails or the stream ends, readiness is cleared and the
//! bridge resubscribes after `retry_interval`, forever, until cancelled.
//! Local connections keep working meanwhile; only cross-worker fan-out is
//! lost.

use crate::bus::{BusMessage, BusSubscriber, ChannelNames};
use crate::config::DEFAULT_BUS_RETRY_SECONDS;
use crate::observability::{metrics, HealthState};
use crate::protocol::SignalEnvelope;
use crate::registry::{AdminViewers, ConnectionRegistry, RoomDelivery};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Everything the bridge needs, assembled once at startup.
pub struct BusBridge {
    subscriber: Arc<dyn BusSubscriber>,
    registry: Arc<ConnectionRegistry>,
    admins: Arc<AdminViewers>,
    channels: ChannelNames,
    health: Arc<HealthState>,
    retry_interval: Duration,
}

/// Handle to the running bridge task.
pub struct BridgeHandle {
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Cancel the bridge and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            warn!(target: "relay.bridge", error = %e, "Bus bridge task ended abnormally");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl BusBridge {
    #[must_use]
    pub fn new(
        subscriber: Arc<dyn BusSubscriber>,
        registry: Arc<ConnectionRegistry>,
        admins: Arc<AdminViewers>,
        channels: ChannelNames,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            subscriber,
            registry,
            admins,
            channels,
            health,
            retry_interval: Duration::from_secs(DEFAULT_BUS_RETRY_SECONDS),
        }
    }

    /// Delay between resubscription attempts.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Spawn the bridge under a child of `parent_token`.
    #[must_use]
    pub fn spawn(self, parent_token: &CancellationToken) -> BridgeHandle {
        let cancel_token = parent_token.child_token();
        let task_token = cancel_token.clone();
        let task = tokio::spawn(
            self.run(task_token)
                .instrument(tracing::info_span!("bus_bridge")),
        );
        BridgeHandle { cancel_token, task }
    }

    async fn run(self, cancel_token: CancellationToken) {
        let pattern = self.channels.room_pattern();
        info!(
            target: "relay.bridge",
            pattern = %pattern,
            admin_channel = %self.channels.admin_channel(),
            "Bus bridge starting"
        );

        loop {
            let subscribed = tokio::select! {
                () = cancel_token.cancelled() => break,
                result = self.subscriber.subscribe(&pattern, self.channels.admin_channel()) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    self.health.set_ready();
                    info!(target: "relay.bridge", "Bus subscription active");

                    loop {
                        tokio::select! {
                            () = cancel_token.cancelled() => {
                                self.health.set_not_ready();
                                info!(target: "relay.bridge", "Bus bridge stopped");
                                return;
                            }
                            next = stream.next() => match next {
                                Some(message) => self.handle_message(&message),
                                None => break,
                            }
                        }
                    }

                    self.health.set_not_ready();
                    warn!(
                        target: "relay.bridge",
                        "Bus subscription lost, cross-worker fan-out unavailable until resubscribed"
                    );
                }
                Err(e) => {
                    self.health.set_not_ready();
                    warn!(
                        target: "relay.bridge",
                        error = %e,
                        retry_in_ms = self.retry_interval.as_millis(),
                        "Bus subscribe failed, will retry"
                    );
                }
            }

            tokio::select! {
                () = cancel_token.cancelled() => break,
                () = tokio::time::sleep(self.retry_interval) => {}
            }
            metrics::record_bus_reconnect();
        }

        self.health.set_not_ready();
        info!(target: "relay.bridge", "Bus bridge stopped");
    }

    /// Route one bus message to local sockets.
    ///
    /// Never fails: bad payloads are logged and dropped.
    pub(crate) fn handle_message(&self, message: &BusMessage) {
        let Some(payload) = message.payload_str() else {
            warn!(
                target: "relay.bridge",
                channel = %message.channel,
                "Dropping non-UTF-8 bus payload"
            );
            return;
        };

        if self.channels.is_admin(&message.channel) {
            let delivered = self.admins.broadcast(payload);
            metrics::record_messages_delivered("admin", delivered);
            debug!(target: "relay.bridge", delivered = delivered, "Admin event fanned out");
            return;
        }

        let Some(room_id) = self.channels.room_from_channel(&message.channel) else {
            debug!(
                target: "relay.bridge",
                channel = %message.channel,
                "Ignoring message on unexpected channel"
            );
            return;
        };

        let mut envelope = match SignalEnvelope::parse(payload) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!(target: "relay.bridge", room_id = %room_id, "Ignoring non-signaling message");
                return;
            }
            Err(e) => {
                warn!(
                    target: "relay.bridge",
                    room_id = %room_id,
                    error = %e,
                    "Dropping malformed bus payload"
                );
                return;
            }
        };

        let sender = envelope.untag();
        let kind = envelope.kind();
        let payload = envelope.into_json();

        match self
            .registry
            .relay_signal(room_id, kind, &payload, sender.as_deref())
        {
            RoomDelivery::NotLocal => {}
            RoomDelivery::Delivered { delivered, failed } => {
                metrics::record_messages_delivered("room", delivered);
                debug!(
                    target: "relay.bridge",
                    room_id = %room_id,
                    kind = kind.as_str(),
                    delivered = delivered,
                    failed = failed,
                    "Signal fanned out"
                );
            }
        }
    }
}
