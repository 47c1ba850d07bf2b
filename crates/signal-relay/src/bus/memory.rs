//! In-process bus backed by a `tokio::sync::broadcast` channel.
//!
//! Used when no `REDIS_URL` is configured (single worker) and in tests, where
//! several relay instances sharing one `MemoryBus` behave like several
//! workers sharing one Redis.

use super::{BusMessage, BusPublisher, BusStream, BusSubscriber};
use crate::errors::RelayError;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Messages buffered per subscriber before it starts lagging.
pub const MEMORY_BUS_CAPACITY: usize = 1024;

/// In-process pub/sub bus. Cheap to share behind an `Arc`.
pub struct MemoryBus {
    sender: Mutex<broadcast::Sender<BusMessage>>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(MEMORY_BUS_CAPACITY);
        Self {
            sender: Mutex::new(sender),
        }
    }

    fn sender(&self) -> broadcast::Sender<BusMessage> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// End every current subscription, as if the bus connection dropped.
    ///
    /// Existing streams terminate; later `subscribe` calls work normally.
    pub fn sever_subscriptions(&self) {
        let (fresh, _) = broadcast::channel(MEMORY_BUS_CAPACITY);
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        *sender = fresh;
        debug!(target: "relay.bus", "Memory bus subscriptions severed");
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender().receiver_count()
    }
}

/// Match a channel against a subscription pattern.
///
/// Only the trailing-`*` form the relay subscribes with is supported; any
/// other pattern matches by equality.
fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

#[async_trait]
impl BusPublisher for MemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), RelayError> {
        let message = BusMessage {
            channel: channel.to_string(),
            payload: payload.into_bytes(),
        };
        // No receivers is not an error: PUBLISH to an idle channel succeeds too.
        let _ = self.sender().send(message);
        Ok(())
    }
}

#[async_trait]
impl BusSubscriber for MemoryBus {
    async fn subscribe(
        &self,
        pattern: &str,
        admin_channel: &str,
    ) -> Result<BusStream, RelayError> {
        let receiver = self.sender().subscribe();
        let pattern = pattern.to_string();
        let admin_channel = admin_channel.to_string();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let pattern = pattern.clone();
            let admin_channel = admin_channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => {
                            if message.channel == admin_channel
                                || pattern_matches(&pattern, &message.channel)
                            {
                                return Some((message, receiver));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                target: "relay.bus",
                                skipped = skipped,
                                "Memory bus subscriber lagged, messages dropped"
                            );
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
