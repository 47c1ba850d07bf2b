//! WebSocket handlers for the signal relay.
//!
//! - `GET /api/v1/ws/ws` - Signaling endpoint for hosts and viewers
//! - `GET /api/v1/ws/events` - Admin event feed
//!
//! Both endpoints take the bearer credential as a `token` query parameter
//! (browsers cannot set headers on a WebSocket handshake). Authentication
//! runs after the upgrade so a rejected client always receives a close
//! frame with [`CLOSE_AUTH_FAILED`](crate::protocol::CLOSE_AUTH_FAILED)
//! instead of a bare HTTP error.

pub mod events;
pub mod signaling;
mod socket;

pub use events::events_upgrade;
pub use signaling::signaling_upgrade;

use crate::auth::{IdentityVerifier, Principal};
use crate::errors::RelayError;
use common::secret::{ExposeSecret, SecretString};

/// Verify an optional query credential.
///
/// # Errors
///
/// `InvalidToken` if the credential is missing, blank or rejected by the
/// verifier.
pub(crate) async fn authenticate(
    verifier: &dyn IdentityVerifier,
    token: Option<&SecretString>,
) -> Result<Principal, RelayError> {
    let Some(token) = token.filter(|t| !t.expose_secret().trim().is_empty()) else {
        return Err(RelayError::InvalidToken(
            "missing access token".to_string(),
        ));
    };
    verifier.verify(token).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AcceptAll;

    #[async_trait]
    impl IdentityVerifier for AcceptAll {
        async fn verify(&self, _credential: &SecretString) -> Result<Principal, RelayError> {
            Ok(Principal::new("42", false))
        }
    }

    #[tokio::test]
    async fn test_authenticate_missing_token() {
        let err = authenticate(&AcceptAll, None).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_authenticate_blank_token() {
        let token = SecretString::from("   ");
        let err = authenticate(&AcceptAll, Some(&token)).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_authenticate_delegates_to_verifier() {
        let token = SecretString::from("opaque");
        let principal = authenticate(&AcceptAll, Some(&token)).await.unwrap();
        assert_eq!(principal.id(), "42");
    }
}
