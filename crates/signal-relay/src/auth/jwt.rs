//! HS256 bearer token verification.
//!
//! # Security
//!
//! - Tokens are size- and shape-checked BEFORE parsing (`common::jwt`)
//! - Only HS256 is accepted; the `alg` header cannot downgrade it
//! - `exp` is always required and validated with zero leeway; clock skew
//!   only applies to `iat`
//! - `iat`, when present, may not lie further in the future than the
//!   configured clock skew
//! - Every failure maps to the same generic `InvalidToken` message

use super::claims::Claims;
use super::{IdentityVerifier, Principal};
use crate::errors::RelayError;
use async_trait::async_trait;
use common::jwt::{check_token_shape, validate_iat};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use tracing::instrument;

const GENERIC_TOKEN_ERROR: &str = "The access token is invalid or expired";

fn invalid_token() -> RelayError {
    RelayError::InvalidToken(GENERIC_TOKEN_ERROR.to_string())
}

/// Identity verifier for tokens signed with a shared HS256 secret.
pub struct JwtIdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl JwtIdentityVerifier {
    /// Create a verifier for tokens signed with `secret`.
    ///
    /// `clock_skew` bounds how far in the future `iat` may be.
    #[must_use]
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // jsonwebtoken defaults to 60s of `exp` leeway.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
            clock_skew,
        }
    }

    /// Verify signature and claims, returning the decoded claims.
    ///
    /// # Errors
    ///
    /// `InvalidToken` with a generic message for every failure.
    pub fn validate(&self, token: &str) -> Result<Claims, RelayError> {
        check_token_shape(token).map_err(|e| {
            tracing::debug!(target: "relay.auth", error = ?e, "Token shape check failed");
            invalid_token()
        })?;

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(target: "relay.auth", error = %e, "Token verification failed");
                invalid_token()
            })?
            .claims;

        if let Some(iat) = claims.iat {
            validate_iat(iat, self.clock_skew).map_err(|e| {
                tracing::debug!(target: "relay.auth", error = ?e, "Token iat validation failed");
                invalid_token()
            })?;
        }

        if claims.sub.trim().is_empty() {
            tracing::debug!(target: "relay.auth", "Token has empty subject");
            return Err(invalid_token());
        }

        Ok(claims)
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    #[instrument(skip_all)]
    async fn verify(&self, credential: &SecretString) -> Result<Principal, RelayError> {
        let claims = self.validate(credential.expose_secret())?;
        let elevated = claims.is_elevated();
        tracing::debug!(target: "relay.auth", elevated = elevated, "Token validated successfully");
        Ok(Principal::new(claims.sub, elevated))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_JWT_SIZE_BYTES};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret-at-least-32-bytes-long!!";

    fn verifier() -> JwtIdentityVerifier {
        JwtIdentityVerifier::new(&SecretString::from(SECRET), DEFAULT_CLOCK_SKEW)
    }

    fn sign(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[tokio::test]
    async fn test_verify_host_token() {
        let token = sign(&json!({"sub": "42", "exp": now() + 600, "iat": now()}), SECRET);

        let principal = verifier().verify(&SecretString::from(token)).await.unwrap();

        assert_eq!(principal.id(), "42");
        assert!(!principal.is_elevated());
    }

    #[tokio::test]
    async fn test_verify_admin_scope_and_superuser() {
        let scoped = sign(&json!({"sub": "1", "exp": now() + 600, "scope": "admin"}), SECRET);
        let superuser = sign(
            &json!({"sub": "1", "exp": now() + 600, "is_superuser": true}),
            SECRET,
        );

        let v = verifier();
        assert!(v.verify(&SecretString::from(scoped)).await.unwrap().is_elevated());
        assert!(v.verify(&SecretString::from(superuser)).await.unwrap().is_elevated());
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let token = sign(
            &json!({"sub": "42", "exp": now() + 600}),
            "another-secret-that-is-32-bytes-long!",
        );
        assert!(matches!(
            verifier().validate(&token),
            Err(RelayError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_rejects_expired_token() {
        let token = sign(&json!({"sub": "42", "exp": now() - 3600}), SECRET);
        assert!(matches!(
            verifier().validate(&token),
            Err(RelayError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_rejects_recently_expired_token() {
        let token = sign(&json!({"sub": "42", "exp": now() - 5}), SECRET);
        assert!(matches!(
            verifier().validate(&token),
            Err(RelayError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_accepts_token_expiring_soon() {
        let token = sign(&json!({"sub": "42", "exp": now() + 30}), SECRET);
        assert_eq!(verifier().validate(&token).unwrap().sub, "42");
    }

    #[test]
    fn test_rejects_missing_exp() {
        let token = sign(&json!({"sub": "42"}), SECRET);
        assert!(verifier().validate(&token).is_err());
    }

    #[test]
    fn test_rejects_future_iat() {
        let token = sign(
            &json!({"sub": "42", "exp": now() + 7200, "iat": now() + 3600}),
            SECRET,
        );
        assert!(verifier().validate(&token).is_err());
    }

    #[test]
    fn test_rejects_empty_subject() {
        let token = sign(&json!({"sub": "  ", "exp": now() + 600}), SECRET);
        assert!(verifier().validate(&token).is_err());
    }

    #[test]
    fn test_rejects_alg_none() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{}}}"#, now() + 600));
        let token = format!("{header}.{payload}.");

        assert!(verifier().validate(&token).is_err());
    }

    #[test]
    fn test_rejects_garbage_and_oversized() {
        let v = verifier();
        assert!(v.validate("").is_err());
        assert!(v.validate("not-a-jwt").is_err());
        assert!(v.validate(&"a".repeat(MAX_JWT_SIZE_BYTES + 1)).is_err());
    }

    #[test]
    fn test_error_message_is_generic() {
        let err = verifier().validate("x.y.z").unwrap_err();
        assert_eq!(err.to_string(), format!("Invalid token: {GENERIC_TOKEN_ERROR}"));
    }
}
