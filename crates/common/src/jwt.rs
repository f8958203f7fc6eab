//! Identity-token utilities shared by the venue server and its test tooling.
//!
//! The authentication service issues HS256-signed tokens carrying the user's
//! id, display name and role. This module provides:
//! - Size limits checked before any parsing
//! - `iat` validation with bounded clock skew
//! - The `UserClaims` structure with redacted `Debug`
//! - Decoding (and, for tooling, encoding) of user tokens
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted; `exp` is required and validated
//! - Error messages are generic; details are logged at debug level
//! - The `uuid` claim is redacted in Debug output

use crate::types::{Role, UserId};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed token size in bytes (8KB).
///
/// Typical user tokens are a few hundred bytes. Larger tokens are rejected
/// before base64 decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for the `iat` claim (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum configurable clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while validating an identity token.
///
/// All variants render the same message so callers cannot tell which check
/// failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a well-formed JWT.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Signature, algorithm or expiry check failed.
    #[error("The access token is invalid or expired")]
    InvalidToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Claims
// =============================================================================

/// Claims carried by a user identity token.
///
/// A missing or null `role` decodes as [`Role::Guest`].
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// User id - redacted in Debug output.
    pub uuid: UserId,

    /// Display name chosen at sign-in.
    pub username: String,

    /// Role granted by the authentication service.
    #[serde(default, deserialize_with = "role_or_guest")]
    pub role: Role,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("uuid", &"[REDACTED]")
            .field("username", &self.username)
            .field("role", &self.role)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

fn role_or_guest<'de, D>(deserializer: D) -> Result<Role, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Role>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Functions
// =============================================================================

/// Decode and validate a user identity token.
///
/// Checks, in order: size, HS256 signature and `exp`, then `iat` against
/// `clock_skew`.
///
/// # Errors
///
/// Returns a [`JwtValidationError`]; every variant displays the same
/// generic message.
pub fn decode_user_token(
    token: &str,
    secret: &[u8],
    clock_skew: Duration,
) -> Result<UserClaims, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    if token.split('.').count() != 3 {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    }

    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<UserClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Token rejected: verification failed");
        JwtValidationError::InvalidToken
    })?;

    validate_iat(data.claims.iat, clock_skew)?;

    Ok(data.claims)
}

/// Sign user claims with HS256.
///
/// Used by operator tooling and tests; the server itself only decodes.
///
/// # Errors
///
/// Returns `JwtValidationError::MalformedToken` if the claims cannot be
/// serialized.
pub fn encode_user_token(claims: &UserClaims, secret: &[u8]) -> Result<String, JwtValidationError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to encode token");
        JwtValidationError::MalformedToken
    })
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat` is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Bounded by MAX_CLOCK_SKEW at config time, well within i64 range
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
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-with-enough-entropy-000";

    fn claims(role: Role) -> UserClaims {
        let now = chrono::Utc::now().timestamp();
        UserClaims {
            uuid: UserId::new(),
            username: "alice".to_string(),
            role,
            exp: now + 3600,
            iat: now,
        }
    }

    #[test]
    fn test_round_trip_preserves_identity() {
        let original = claims(Role::Moderator);
        let token = encode_user_token(&original, SECRET).unwrap();

        let decoded = decode_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW).unwrap();
        assert_eq!(decoded.uuid, original.uuid);
        assert_eq!(decoded.username, "alice");
        assert_eq!(decoded.role, Role::Moderator);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode_user_token(&claims(Role::User), SECRET).unwrap();
        let result = decode_user_token(&token, b"another-secret", DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::InvalidToken);
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut expired = claims(Role::User);
        expired.exp = chrono::Utc::now().timestamp() - 3600;
        let token = encode_user_token(&expired, SECRET).unwrap();

        let result = decode_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::InvalidToken);
    }

    #[test]
    fn test_oversized_token_rejected_before_parsing() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        let result = decode_user_token(&token, SECRET, DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::TokenTooLarge);
    }

    #[test]
    fn test_malformed_token_rejected() {
        let result = decode_user_token("not-a-jwt", SECRET, DEFAULT_CLOCK_SKEW);
        assert_eq!(result.unwrap_err(), JwtValidationError::MalformedToken);
    }

    #[test]
    fn test_iat_boundaries() {
        let now = 1_700_000_000;
        let skew = Duration::from_secs(300);

        assert!(validate_iat_at(now, skew, now).is_ok());
        assert!(validate_iat_at(now + 300, skew, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, skew, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_null_role_decodes_as_guest() {
        let json = format!(
            r#"{{"uuid":"{}","username":"bob","role":null,"exp":1,"iat":1}}"#,
            UserId::new()
        );
        let claims: UserClaims = serde_json::from_str(&json).unwrap();
        assert_eq!(claims.role, Role::Guest);
    }

    #[test]
    fn test_debug_redacts_user_id() {
        let c = claims(Role::User);
        let debug = format!("{c:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&c.uuid.to_string()));
    }

    #[test]
    fn test_error_messages_are_generic() {
        let messages: Vec<String> = [
            JwtValidationError::TokenTooLarge,
            JwtValidationError::MalformedToken,
            JwtValidationError::InvalidToken,
            JwtValidationError::IatTooFarInFuture,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        assert!(messages.iter().all(|m| m == "The access token is invalid or expired"));
    }
}
