//! Cross-worker publish/subscribe bus.
//!
//! Workers share no memory. Every signaling message is published to a
//! per-room channel and every worker's bridge task receives it through one
//! pattern subscription, then fans it out to its own local sockets.
//!
//! # Channel Naming
//!
//! - `{prefix}{room_id}` - one channel per room (default prefix `webrtc_room_`)
//! - `{prefix}*` - pattern the bridge subscribes to
//! - `admin_events` - fixed channel for admin events published by other services
//!
//! Two implementations exist: [`RedisBus`] for multi-worker deployments and
//! [`MemoryBus`] for a single worker (and for tests that run several
//! registries against one bus).

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

use crate::config::Config;
use crate::errors::RelayError;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Concrete channel the message was published to (never the pattern).
    pub channel: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Payload as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Stream of bus messages. The stream ending means the subscription was lost.
pub type BusStream = BoxStream<'static, BusMessage>;

/// Publishing side of the bus, used by the signaling endpoint.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish `payload` to `channel`. Succeeds even with no subscribers.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), RelayError>;
}

/// Subscribing side of the bus, used by the bridge task.
#[async_trait]
pub trait BusSubscriber: Send + Sync {
    /// Subscribe to every channel matching `pattern` plus `admin_channel`.
    async fn subscribe(&self, pattern: &str, admin_channel: &str)
        -> Result<BusStream, RelayError>;
}

/// Channel naming scheme shared by publishers and the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    room_prefix: String,
    admin_channel: String,
}

impl ChannelNames {
    #[must_use]
    pub fn new(room_prefix: impl Into<String>, admin_channel: impl Into<String>) -> Self {
        Self {
            room_prefix: room_prefix.into(),
            admin_channel: admin_channel.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.room_channel_prefix.clone(),
            config.admin_channel.clone(),
        )
    }

    /// Channel carrying signaling for `room_id`.
    #[must_use]
    pub fn room_channel(&self, room_id: &str) -> String {
        format!("{}{room_id}", self.room_prefix)
    }

    /// Pattern matching every room channel.
    #[must_use]
    pub fn room_pattern(&self) -> String {
        format!("{}*", self.room_prefix)
    }

    /// Recover the room id from a room channel name.
    #[must_use]
    pub fn room_from_channel<'a>(&self, channel: &'a str) -> Option<&'a str> {
        channel
            .strip_prefix(self.room_prefix.as_str())
            .filter(|room| !room.is_empty())
    }

    #[must_use]
    pub fn is_admin(&self, channel: &str) -> bool {
        channel == self.admin_channel
    }

    #[must_use]
    pub fn admin_channel(&self) -> &str {
        &self.admin_channel
    }
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_ROOM_CHANNEL_PREFIX,
            crate::config::DEFAULT_ADMIN_CHANNEL,
        )
    }
}
