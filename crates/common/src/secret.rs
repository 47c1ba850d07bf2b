//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers used by the relay for bearer
//! credentials, the token signing secret and bus URLs that may embed a
//! password (`redis://:password@host:6379`).
//!
//! Anything that derives `Debug` while holding a `SecretString` prints
//! `[REDACTED]` instead of the value, so query parameters and config structs
//! can be logged with `?` without leaking credentials.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct SignalingQuery {
//!     room_id: String,
//!     token: SecretString,
//! }
//!
//! let query = SignalingQuery {
//!     room_id: "device-42".to_string(),
//!     token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! let logged = format!("{query:?}");
//! assert!(logged.contains("device-42"));
//! assert!(!logged.contains("eyJhbGciOi"));
//!
//! // Reading the value is always explicit.
//! let _raw: &str = query.token.expose_secret();
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
