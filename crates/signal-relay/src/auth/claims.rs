//! Bearer token claims.
//!
//! The `sub` field is redacted in Debug output to keep user identifiers out
//! of logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scope granting administrator privilege.
pub const ADMIN_SCOPE: &str = "admin";

/// Claims carried by a relay bearer token.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id) - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds). Older issuers omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Space-separated scopes granted to this token.
    #[serde(default)]
    pub scope: String,

    /// Superuser flag set by the CRUD API's token issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_superuser: Option<bool>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("scope", &self.scope)
            .field("is_superuser", &self.is_superuser)
            .finish()
    }
}

impl Claims {
    /// Check if the token has a specific scope.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == scope)
    }

    /// Whether the token grants administrator privilege, via either the
    /// `admin` scope or `is_superuser: true`.
    #[must_use]
    pub fn is_elevated(&self) -> bool {
        self.has_scope(ADMIN_SCOPE) || self.is_superuser == Some(true)
    }
}
