//! Redacting wrappers for sensitive values.
//!
//! The venue server holds a handful of secrets: the token-signing key, the
//! database URL (which may embed a password) and raw bearer tokens while they
//! are being validated. Wrapping them in [`SecretString`] means a derived
//! `Debug` on any config or request struct prints `[REDACTED]` instead of the
//! value, and the backing memory is zeroized on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct UpgradeRequest {
//!     client_type: String,
//!     token: SecretString,
//! }
//!
//! let req = UpgradeRequest {
//!     client_type: "receiver".to_string(),
//!     token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! assert!(!format!("{req:?}").contains("eyJhbGciOi"));
//! assert_eq!(req.token.expose_secret(), "eyJhbGciOi...");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Wrap raw key bytes (for example an HMAC signing key) as a secret.
#[must_use]
pub fn secret_bytes(bytes: &[u8]) -> SecretBox<[u8]> {
    SecretBox::new(bytes.to_vec().into_boxed_slice())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_secret_string_debug_is_redacted() {
        let secret = SecretString::from("signing-key-value");
        let debug = format!("{secret:?}");
        assert!(!debug.contains("signing-key-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_bytes_expose_original() {
        let key = secret_bytes(b"hmac-key");
        assert_eq!(key.expose_secret(), b"hmac-key");
        assert!(!format!("{key:?}").contains("hmac-key"));
    }

    #[test]
    fn test_deserialized_secret_is_redacted_in_parent_debug() {
        #[derive(Debug, Deserialize)]
        struct StoreSettings {
            backend: String,
            database_url: SecretString,
        }

        let json = r#"{"backend":"postgres","database_url":"postgres://venue:pw@db/venues"}"#;
        let settings: StoreSettings = serde_json::from_str(json).unwrap();

        let debug = format!("{settings:?}");
        assert!(debug.contains("postgres"));
        assert!(!debug.contains("pw@db"));
        assert_eq!(
            settings.database_url.expose_secret(),
            "postgres://venue:pw@db/venues"
        );
    }
}
