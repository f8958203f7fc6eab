//! Identity validation for connection upgrades.
//!
//! The authentication service issues HS256 tokens signed with the shared
//! secret. A token is validated once, before the websocket upgrade; the
//! resulting [`Identity`] is fixed for the life of the connection.
//!
//! # Security
//!
//! - Tokens are size-checked before parsing (see `common::jwt`)
//! - Failures are reported with one generic message
//! - The user id is redacted in Debug output

use common::jwt::{decode_user_token, JwtValidationError};
use common::secret::{secret_bytes, ExposeSecret, SecretBox, SecretString};
use common::types::{Role, UserId};
use std::fmt;
use std::time::Duration;
use tracing::instrument;

/// Who is on the other end of a connection.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &"[REDACTED]")
            .field("username", &self.username)
            .field("role", &self.role)
            .finish()
    }
}

/// Validates identity tokens against the shared HMAC secret.
pub struct IdentityValidator {
    secret: SecretBox<[u8]>,
    clock_skew: Duration,
}

impl IdentityValidator {
    #[must_use]
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        Self {
            secret: secret_bytes(secret.expose_secret().as_bytes()),
            clock_skew,
        }
    }

    /// Validate a token and return the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns a [`JwtValidationError`] whose message never reveals which
    /// check failed.
    #[instrument(skip_all, name = "venue.auth.identity")]
    pub fn validate(&self, token: &str) -> Result<Identity, JwtValidationError> {
        let claims = decode_user_token(token, self.secret.expose_secret(), self.clock_skew)?;
        tracing::debug!(
            target: "venue.auth",
            role = claims.role.as_str(),
            "Identity token validated"
        );
        Ok(Identity {
            user_id: claims.uuid,
            username: claims.username,
            role: claims.role,
        })
    }
}

/// Pick the token from the `token` query parameter, falling back to an
/// `Authorization: Bearer` header.
#[must_use]
pub fn extract_token<'a>(
    query_token: Option<&'a str>,
    authorization: Option<&'a str>,
) -> Option<&'a str> {
    query_token
        .filter(|t| !t.is_empty())
        .or_else(|| authorization.and_then(|h| h.strip_prefix("Bearer ")))
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::jwt::{encode_user_token, UserClaims};

    const SECRET: &str = "identity-test-secret";

    fn token(role: Role, exp_offset: i64) -> (UserId, String) {
        let now = chrono::Utc::now().timestamp();
        let user_id = UserId::new();
        let claims = UserClaims {
            uuid: user_id,
            username: "ada".to_string(),
            role,
            exp: now + exp_offset,
            iat: now,
        };
        (user_id, encode_user_token(&claims, SECRET.as_bytes()).unwrap())
    }

    fn validator() -> IdentityValidator {
        IdentityValidator::new(&SecretString::from(SECRET), Duration::from_secs(300))
    }

    #[test]
    fn test_valid_token() {
        let (user_id, token) = token(Role::Moderator, 3600);
        let identity = validator().validate(&token).unwrap();
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username, "ada");
        assert_eq!(identity.role, Role::Moderator);
    }

    #[test]
    fn test_expired_token_rejected() {
        let (_, token) = token(Role::User, -3600);
        assert!(validator().validate(&token).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (_, token) = token(Role::User, 3600);
        let other = IdentityValidator::new(&SecretString::from("other"), Duration::from_secs(300));
        assert_eq!(
            other.validate(&token).unwrap_err(),
            JwtValidationError::InvalidToken
        );
    }

    #[test]
    fn test_debug_redacts_user_id() {
        let identity = Identity {
            user_id: UserId::new(),
            username: "ada".to_string(),
            role: Role::User,
        };
        let debug = format!("{identity:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&identity.user_id.to_string()));
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(Some("abc"), None), Some("abc"));
        assert_eq!(extract_token(None, Some("Bearer xyz")), Some("xyz"));
        assert_eq!(extract_token(Some(""), Some("Bearer xyz")), Some("xyz"));
        assert_eq!(extract_token(None, Some("Basic xyz")), None);
        assert_eq!(extract_token(None, Some("Bearer ")), None);
        assert_eq!(extract_token(None, None), None);
    }
}
