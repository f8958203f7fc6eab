//! Identifier newtypes and the session role hierarchy.
//!
//! Entities are referenced by stable ids everywhere (venue tables, camera
//! tables, session registries). The newtypes keep a camera id from being
//! passed where a venue id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a persisted venue.
    VenueId
);

uuid_id!(
    /// Unique identifier for a persisted camera.
    CameraId
);

uuid_id!(
    /// Unique identifier for a user, taken from the identity token.
    UserId
);

uuid_id!(
    /// Unique identifier for one live connection. Never reused.
    ConnectionId
);

/// Identifier a publisher device presents when it connects.
///
/// Cameras store the sender identifier they expect; a publisher whose
/// identifier matches is attached automatically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(pub String);

impl SenderId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SenderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Session role, totally ordered from least to most privileged.
///
/// Comparisons are numeric through the derived `Ord`; never compare the
/// serialized names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    User,
    Moderator,
    Admin,
    /// Owner-equivalent role with every privilege.
    Superadmin,
}

impl Role {
    /// Returns true if this role is `level` or above.
    #[must_use]
    pub fn at_least(self, level: Role) -> bool {
        self >= level
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
