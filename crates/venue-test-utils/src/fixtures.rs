//! Test users and identity tokens.

use common::jwt::{encode_user_token, UserClaims};
use common::secret::SecretString;
use common::types::{Role, UserId};
use venue_server::auth::{Identity, IdentityValidator};

/// HMAC secret shared by test tokens and test validators.
pub const TEST_JWT_SECRET: &str = "venue-test-secret-0123456789abcdef";

/// A user with a fixed id, for building sessions and tokens.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

impl TestUser {
    pub fn new(username: &str, role: Role) -> Self {
        Self {
            user_id: UserId::new(),
            username: username.to_string(),
            role,
        }
    }

    pub fn guest(username: &str) -> Self {
        Self::new(username, Role::Guest)
    }

    pub fn user(username: &str) -> Self {
        Self::new(username, Role::User)
    }

    pub fn moderator(username: &str) -> Self {
        Self::new(username, Role::Moderator)
    }

    pub fn admin(username: &str) -> Self {
        Self::new(username, Role::Admin)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id,
            username: self.username.clone(),
            role: self.role,
        }
    }

    /// Token valid for one hour, signed with [`TEST_JWT_SECRET`].
    pub fn token(&self) -> String {
        self.token_expiring_in(3600)
    }

    /// Token that expired an hour ago.
    pub fn expired_token(&self) -> String {
        self.token_expiring_in(-3600)
    }

    fn token_expiring_in(&self, seconds: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = UserClaims {
            uuid: self.user_id,
            username: self.username.clone(),
            role: self.role,
            exp: now + seconds,
            iat: now.min(now + seconds),
        };
        encode_user_token(&claims, TEST_JWT_SECRET.as_bytes()).expect("Failed to sign test token")
    }
}

/// Validator accepting tokens from [`TestUser::token`].
pub fn test_validator() -> IdentityValidator {
    IdentityValidator::new(
        &SecretString::from(TEST_JWT_SECRET),
        std::time::Duration::from_secs(300),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validates_to_identity() {
        let user = TestUser::moderator("ada");
        let identity = test_validator().validate(&user.token()).unwrap();
        assert_eq!(identity, user.identity());
    }

    #[test]
    fn test_expired_token_rejected() {
        let user = TestUser::user("bob");
        assert!(test_validator().validate(&user.expired_token()).is_err());
    }
}
