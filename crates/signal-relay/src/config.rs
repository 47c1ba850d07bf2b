//! Signal relay configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::jwt::{bounded_clock_skew, DEFAULT_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default prefix of the per-room bus channels.
pub const DEFAULT_ROOM_CHANNEL_PREFIX: &str = "webrtc_room_";

/// Default name of the fixed admin event channel.
pub const DEFAULT_ADMIN_CHANNEL: &str = "admin_events";

/// Default lifetime of a cached offer in seconds.
pub const DEFAULT_OFFER_TTL_SECONDS: u64 = 60;

/// Default per-connection outbound queue depth.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Default maximum inbound WebSocket message size (64KB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Default back-off between bus resubscription attempts.
pub const DEFAULT_BUS_RETRY_SECONDS: u64 = 2;

/// Minimum length of the token signing secret (HS256).
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Default worker ID prefix.
pub const DEFAULT_WORKER_ID_PREFIX: &str = "relay";

/// Signal relay configuration.
#[derive(Clone)]
pub struct Config {
    /// Shared secret for verifying HS256 bearer tokens.
    pub jwt_secret: SecretString,

    /// Redis URL for the cross-worker bus. `None` runs a single worker on an
    /// in-process bus. May contain credentials, so it is kept secret.
    pub redis_url: Option<SecretString>,

    /// HTTP/WebSocket bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Identifier of this worker process.
    pub worker_id: String,

    /// Prefix of per-room channels (default: "webrtc_room_").
    pub room_channel_prefix: String,

    /// Fixed admin event channel (default: "admin_events").
    pub admin_channel: String,

    /// Cached-offer lifetime. `None` keeps offers until the host leaves.
    pub offer_ttl: Option<Duration>,

    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,

    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_bytes: usize,

    /// Clock skew tolerance for token `iat` validation.
    pub jwt_clock_skew: Duration,

    /// Back-off between bus resubscription attempts.
    pub bus_retry_interval: Duration,

    /// Drain period after a shutdown signal.
    pub drain_period: Duration,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret", &"[REDACTED]")
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("worker_id", &self.worker_id)
            .field("room_channel_prefix", &self.room_channel_prefix)
            .field("admin_channel", &self.admin_channel)
            .field("offer_ttl", &self.offer_ttl)
            .field("outbound_buffer", &self.outbound_buffer)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("bus_retry_interval", &self.bus_retry_interval)
            .field("drain_period", &self.drain_period)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwt_secret = SecretString::from(
            vars.get("RELAY_JWT_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("RELAY_JWT_SECRET".to_string()))?
                .clone(),
        );

        if jwt_secret.expose_secret().len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "RELAY_JWT_SECRET must be at least {MIN_JWT_SECRET_LENGTH} bytes"
            )));
        }

        let redis_url = vars
            .get("REDIS_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let room_channel_prefix = vars
            .get("RELAY_ROOM_CHANNEL_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROOM_CHANNEL_PREFIX.to_string());

        // The prefix becomes part of a PSUBSCRIBE glob
        if room_channel_prefix.is_empty()
            || room_channel_prefix
                .chars()
                .any(|c| matches!(c, '*' | '?' | '[' | ']'))
        {
            return Err(ConfigError::InvalidValue(
                "RELAY_ROOM_CHANNEL_PREFIX must be non-empty and free of glob characters"
                    .to_string(),
            ));
        }

        let admin_channel = vars
            .get("RELAY_ADMIN_CHANNEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ADMIN_CHANNEL.to_string());

        if admin_channel.starts_with(&room_channel_prefix) {
            return Err(ConfigError::InvalidValue(
                "RELAY_ADMIN_CHANNEL must not match the room channel pattern".to_string(),
            ));
        }

        let offer_ttl_seconds = vars
            .get("RELAY_OFFER_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_OFFER_TTL_SECONDS);
        let offer_ttl = (offer_ttl_seconds > 0).then(|| Duration::from_secs(offer_ttl_seconds));

        let outbound_buffer = vars
            .get("RELAY_OUTBOUND_BUFFER")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_OUTBOUND_BUFFER);

        let max_message_bytes = vars
            .get("RELAY_MAX_MESSAGE_BYTES")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_MESSAGE_BYTES);

        let jwt_clock_skew = match vars.get("RELAY_JWT_CLOCK_SKEW_SECONDS") {
            Some(raw) => {
                let seconds: u64 = raw.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!("RELAY_JWT_CLOCK_SKEW_SECONDS: {e}"))
                })?;
                bounded_clock_skew(seconds)
                    .map_err(|e| ConfigError::InvalidValue(e.to_string()))?
            }
            None => DEFAULT_CLOCK_SKEW,
        };

        let bus_retry_interval = Duration::from_secs(
            vars.get("RELAY_BUS_RETRY_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_BUS_RETRY_SECONDS),
        );

        let drain_period = Duration::from_secs(
            vars.get("RELAY_DRAIN_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        );

        let worker_id = vars.get("RELAY_WORKER_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_WORKER_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            jwt_secret,
            redis_url,
            bind_address,
            worker_id,
            room_channel_prefix,
            admin_channel,
            offer_ttl,
            outbound_buffer,
            max_message_bytes,
            jwt_clock_skew,
            bus_retry_interval,
            drain_period,
        })
    }
}
