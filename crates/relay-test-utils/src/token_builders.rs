//! Builder patterns for test tokens.
//!
//! Produces HS256 tokens the relay's `JwtIdentityVerifier` accepts when it
//! is configured with [`TEST_JWT_SECRET`].

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

/// Secret shared by test servers and test tokens (at least 32 bytes).
pub const TEST_JWT_SECRET: &str = "relay-test-secret-at-least-32-bytes!!";

/// Builder for creating test JWTs
///
/// # Example
/// ```rust,ignore
/// let host_token = TestTokenBuilder::new().for_user("device-42").sign();
/// let admin_token = TestTokenBuilder::new().admin().sign();
/// ```
pub struct TestTokenBuilder {
    sub: String,
    scope: String,
    is_superuser: Option<bool>,
    exp: i64,
    iat: i64,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults (non-elevated, valid 1 hour)
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: "test-subject".to_string(),
            scope: String::new(),
            is_superuser: None,
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
        }
    }

    /// Set the subject
    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set the scope (space-separated)
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    /// Grant administrator privilege through the `admin` scope
    pub fn admin(self) -> Self {
        self.with_scope("admin")
    }

    /// Grant administrator privilege through the `is_superuser` claim
    pub fn superuser(mut self) -> Self {
        self.is_superuser = Some(true);
        self
    }

    /// Set expiration in seconds from now (negative for an expired token)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Build the claims as a JSON value
    pub fn build(&self) -> serde_json::Value {
        let mut claims = json!({
            "sub": self.sub,
            "scope": self.scope,
            "exp": self.exp,
            "iat": self.iat,
        });
        if let Some(is_superuser) = self.is_superuser {
            claims["is_superuser"] = json!(is_superuser);
        }
        claims
    }

    /// Sign with [`TEST_JWT_SECRET`]
    pub fn sign(&self) -> String {
        self.sign_with(TEST_JWT_SECRET)
    }

    /// Sign with an arbitrary secret
    pub fn sign_with(&self, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &self.build(),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("HS256 signing of JSON claims cannot fail")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
