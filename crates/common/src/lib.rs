//! Common utilities shared across the signal relay crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for bearer-token guards (size limits, clock skew, iat checks)
pub mod jwt;
