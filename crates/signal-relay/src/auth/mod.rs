//! Identity and authorization for relay connections.
//!
//! Token verification is delegated to an [`IdentityVerifier`]. The relay
//! only needs two facts about a caller: who they are and whether they hold
//! administrator privilege.
//!
//! # Policy
//!
//! | Endpoint | Requirement |
//! |----------|-------------|
//! | signaling, `role=host` | any authenticated principal |
//! | signaling, `role=viewer` | elevated principal |
//! | admin events | elevated principal |

pub mod claims;
pub mod jwt;

pub use claims::Claims;
pub use jwt::JwtIdentityVerifier;

use crate::errors::RelayError;
use crate::protocol::Role;
use async_trait::async_trait;
use common::secret::SecretString;
use std::fmt;

/// An authenticated caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    id: String,
    elevated: bool,
}

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<String>, elevated: bool) -> Self {
        Self {
            id: id.into(),
            elevated,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the principal holds administrator privilege.
    #[must_use]
    pub fn is_elevated(&self) -> bool {
        self.elevated
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &"[REDACTED]")
            .field("elevated", &self.elevated)
            .finish()
    }
}

/// External identity collaborator.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a bearer credential to a principal.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for any credential that cannot be verified.
    async fn verify(&self, credential: &SecretString) -> Result<Principal, RelayError>;
}

/// Check that `principal` may attach to a room as `role`.
///
/// # Errors
///
/// `Forbidden` if a viewer lacks administrator privilege.
pub fn authorize(role: Role, principal: &Principal) -> Result<(), RelayError> {
    match role {
        Role::Host => Ok(()),
        Role::Viewer if principal.is_elevated() => Ok(()),
        Role::Viewer => Err(RelayError::Forbidden(
            "viewer role requires administrator privilege".to_string(),
        )),
    }
}

/// Check that `principal` may subscribe to admin events.
///
/// # Errors
///
/// `Forbidden` without administrator privilege.
pub fn authorize_admin_events(principal: &Principal) -> Result<(), RelayError> {
    if principal.is_elevated() {
        Ok(())
    } else {
        Err(RelayError::Forbidden(
            "admin events require administrator privilege".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_host_needs_only_authentication() {
        assert!(authorize(Role::Host, &Principal::new("7", false)).is_ok());
        assert!(authorize(Role::Host, &Principal::new("1", true)).is_ok());
    }

    #[test]
    fn test_viewer_needs_elevation() {
        assert!(authorize(Role::Viewer, &Principal::new("1", true)).is_ok());

        let err = authorize(Role::Viewer, &Principal::new("7", false)).unwrap_err();
        assert!(matches!(err, RelayError::Forbidden(_)));
        assert_eq!(err.close_code(), Some(crate::protocol::CLOSE_AUTH_FAILED));
    }

    #[test]
    fn test_admin_events_need_elevation() {
        assert!(authorize_admin_events(&Principal::new("1", true)).is_ok());
        assert!(authorize_admin_events(&Principal::new("7", false)).is_err());
    }

    #[test]
    fn test_principal_debug_redacts_id() {
        let debug = format!("{:?}", Principal::new("user-secret-id", true));
        assert!(!debug.contains("user-secret-id"));
        assert!(debug.contains("elevated: true"));
    }
}
