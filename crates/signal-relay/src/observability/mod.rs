//! Observability for the signal relay.
//!
//! # Privacy by Default
//!
//! Async entry points use `#[instrument(skip_all)]` with explicitly chosen
//! fields. Room ids and sender tags are logged; bearer tokens, principal ids
//! and signaling payloads (SDP, ICE candidates carry peer IP addresses) are
//! not.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_connections_active` | Gauge | `role` | Open WebSocket connections |
//! | `relay_rooms_active` | Gauge | none | Rooms in this worker's registry |
//! | `relay_admin_viewers_active` | Gauge | none | Admin event subscribers |
//! | `relay_messages_published_total` | Counter | `kind` | Signals published to the bus |
//! | `relay_messages_delivered_total` | Counter | `channel_kind` | Local deliveries by the bridge |
//! | `relay_delivery_failures_total` | Counter | none | Failed writes to one local socket |
//! | `relay_auth_rejections_total` | Counter | `reason` | Rejected connection attempts |
//! | `relay_host_takeovers_total` | Counter | none | Hosts evicted by a newer host |
//! | `relay_bus_reconnects_total` | Counter | none | Bridge resubscription attempts |
//! | `relay_malformed_messages_total` | Counter | none | Dropped unparseable frames |
//! | `relay_bus_publish_duration_seconds` | Histogram | none | Redis publish latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
