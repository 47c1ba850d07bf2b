//! Signal Relay Library
//!
//! WebRTC signaling relay for host/viewer screen-sharing sessions. A host
//! (the monitored device) and one or more viewers (administrators) exchange
//! offers, answers and ICE candidates through the relay to set up a direct
//! peer connection. The relay never touches media.
//!
//! # Architecture
//!
//! The relay runs as several independent workers that share no memory:
//!
//! ```text
//! client socket ──> signaling endpoint ──publish──> bus (Redis pub/sub)
//!                                                      │
//!                  ┌───────────────────────────────────┘
//!                  ▼  (every worker)
//!             bus bridge ──> connection registry ──> local sockets
//! ```
//!
//! - Inbound signals are tagged with the sender's tag and published to a
//!   per-room channel instead of being broadcast directly
//! - Each worker's bridge receives every room message and delivers it to its
//!   own members of that room, skipping the sender
//! - The latest offer per room is cached so late joiners still receive it
//!
//! # Modules
//!
//! - [`auth`] - Identity collaborator (HS256 JWT) and authorization policy
//! - [`bus`] - Pub/sub bus abstraction with Redis and in-memory backends
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types, HTTP status and close code mapping
//! - [`handlers`] - Signaling and admin event WebSocket endpoints
//! - [`observability`] - Metrics and health probes
//! - [`protocol`] - Wire types, close codes, room id validation
//! - [`registry`] - Per-worker rooms and the room state machine
//! - [`routes`] - Axum router and application state
//! - [`tasks`] - Background tasks (bus bridge)

pub mod auth;
pub mod bus;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod tasks;
