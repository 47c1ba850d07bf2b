//! Bearer-token guards shared by the relay's identity checks.
//!
//! These checks run around the signature verification done by the
//! identity verifier:
//! - Size limit, checked before any decoding
//! - Structural check (three dot-separated base64url segments)
//! - Clock skew bounds and `iat` validation
//!
//! Error messages are intentionally generic. Detailed reasons are logged at
//! debug level under the `common.jwt` target.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted token size in bytes (8KB).
///
/// Credentials arrive as a query parameter on the WebSocket upgrade, so this
/// also bounds the request line. Typical tokens are 200-500 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for `iat` (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound for configurable clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Errors from the pre- and post-verification guards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a three-segment base64url JWT.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// Configured clock skew exceeds [`MAX_CLOCK_SKEW`].
    #[error("Clock skew of {0}s exceeds the maximum of 600s")]
    ClockSkewTooLarge(u64),
}

/// Reject oversized or structurally invalid tokens before verification.
///
/// Does not verify the signature. Only the header segment is decoded, to
/// confirm the token is a JWT at all; the payload is left to the verifier.
///
/// # Errors
///
/// - `TokenTooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` if the token does not have three segments or the
///   header segment is not base64url-encoded JSON
pub fn check_token_shape(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut segments = token.split('.');
    let (Some(header), Some(_payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice::<serde_json::Value>(&header_bytes)
        .ok()
        .filter(serde_json::Value::is_object)
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "JWT header is not a JSON object");
            JwtValidationError::MalformedToken
        })?;

    Ok(())
}

/// Convert a configured skew in seconds into a bounded `Duration`.
///
/// # Errors
///
/// Returns `ClockSkewTooLarge` if `seconds` exceeds [`MAX_CLOCK_SKEW`].
pub fn bounded_clock_skew(seconds: u64) -> Result<Duration, JwtValidationError> {
    let skew = Duration::from_secs(seconds);
    if skew > MAX_CLOCK_SKEW {
        return Err(JwtValidationError::ClockSkewTooLarge(seconds));
    }
    Ok(skew)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat` is more than `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW, well within i64 range
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_wrap)]
mod tests {
    use super::*;

    fn token_with_header(header: &str) -> String {
        format!("{}.payload.signature", URL_SAFE_NO_PAD.encode(header))
    }

    #[test]
    fn test_limits() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
        assert_eq!(DEFAULT_CLOCK_SKEW, Duration::from_secs(300));
        assert_eq!(MAX_CLOCK_SKEW, Duration::from_secs(600));
    }

    #[test]
    fn test_check_token_shape_accepts_jwt() {
        let token = token_with_header(r#"{"alg":"HS256","typ":"JWT"}"#);
        assert!(check_token_shape(&token).is_ok());
    }

    #[test]
    fn test_check_token_shape_rejects_wrong_segment_count() {
        assert_eq!(
            check_token_shape("only.two"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            check_token_shape("a.b.c.d"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(check_token_shape(""), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_check_token_shape_rejects_bad_header() {
        assert_eq!(
            check_token_shape("!!!.payload.signature"),
            Err(JwtValidationError::MalformedToken)
        );
        let not_json = token_with_header("not json");
        assert_eq!(
            check_token_shape(&not_json),
            Err(JwtValidationError::MalformedToken)
        );
        let not_object = token_with_header("[1,2]");
        assert_eq!(
            check_token_shape(&not_object),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_check_token_shape_rejects_oversized() {
        let big = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            check_token_shape(&big),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_bounded_clock_skew() {
        assert_eq!(bounded_clock_skew(300).unwrap(), Duration::from_secs(300));
        assert_eq!(bounded_clock_skew(600).unwrap(), MAX_CLOCK_SKEW);
        assert_eq!(
            bounded_clock_skew(601),
            Err(JwtValidationError::ClockSkewTooLarge(601))
        );
    }

    #[test]
    fn test_validate_iat_past_and_present() {
        let now = chrono::Utc::now().timestamp();
        assert!(validate_iat(now, DEFAULT_CLOCK_SKEW).is_ok());
        assert!(validate_iat(now - 3600, DEFAULT_CLOCK_SKEW).is_ok());
    }

    #[test]
    fn test_validate_iat_far_future() {
        let far_future = chrono::Utc::now().timestamp() + 86400;
        assert!(matches!(
            validate_iat(far_future, DEFAULT_CLOCK_SKEW),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    #[test]
    fn test_validate_iat_at_boundary_exact() {
        let now = 1_700_000_000_i64;

        // iat == now + skew is the last accepted value
        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());

        assert!(matches!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }
}
