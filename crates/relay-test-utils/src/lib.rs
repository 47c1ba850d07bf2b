//! # Relay Test Utilities
//!
//! Shared test utilities for the signal relay.
//!
//! This crate provides:
//! - Server test harness (`TestRelayServer` for end-to-end tests)
//! - Token builders (`TestTokenBuilder` for HS256 bearer tokens)
//! - WebSocket client helpers (connect, send, receive, expect close)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestRelayServer::spawn().await?;
//!     let token = TestTokenBuilder::new().for_user("42").sign();
//!
//!     let mut host = connect(&server.signaling_url("host", "r1", &token)).await?;
//!     server.wait_for_connections(1).await?;
//!
//!     send_json(&mut host, &serde_json::json!({"type": "offer", "sdp": "A"})).await?;
//!     Ok(())
//! }
//! ```

pub mod server_harness;
pub mod token_builders;
pub mod ws_client;

// Re-export commonly used items
pub use server_harness::*;
pub use token_builders::*;
pub use ws_client::*;
