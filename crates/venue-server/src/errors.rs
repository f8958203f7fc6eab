//! Venue server error types.
//!
//! Every handler returns `VenueError`. The session dispatcher turns it into a
//! response frame with `wasSuccess: false` and the text from
//! [`VenueError::client_message`]; collaborator and internal details are only
//! logged server-side.

use thiserror::Error;

/// Venue server error type.
///
/// Error codes:
/// - `InvalidInput`: 1
/// - `Authorization`: 3
/// - `VenueNotFound`, `CameraNotFound`, `PortalNotFound`, `SessionNotFound`: 4
/// - `Conflict`: 5
/// - `Store`, `Media`, `Config`, `Internal`: 6
/// - `Precondition`: 8
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    /// A guard rejected the request. Nothing was mutated.
    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Venue not found: {0}")]
    VenueNotFound(String),

    #[error("Camera not found: {0}")]
    CameraNotFound(String),

    #[error("Portal not found: {0}")]
    PortalNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Duplicate sender attach or duplicate unique key on create.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation is invalid in the current lifecycle state.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Persistence store call failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Media-transport collaborator call failed.
    #[error("Media error: {0}")]
    Media(String),

    /// Payload did not match the procedure's input shape.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VenueError {
    /// Returns the numeric error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            VenueError::InvalidInput(_) => 1,
            VenueError::Authorization(_) => 3,
            VenueError::VenueNotFound(_)
            | VenueError::CameraNotFound(_)
            | VenueError::PortalNotFound(_)
            | VenueError::SessionNotFound(_) => 4,
            VenueError::Conflict(_) => 5,
            VenueError::Store(_)
            | VenueError::Media(_)
            | VenueError::Config(_)
            | VenueError::Internal(_) => 6,
            VenueError::Precondition(_) => 8,
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            VenueError::Store(_)
            | VenueError::Media(_)
            | VenueError::Config(_)
            | VenueError::Internal(_) => "An internal error occurred".to_string(),
            VenueError::VenueNotFound(_) => "Venue not found".to_string(),
            VenueError::CameraNotFound(_) => "Camera not found".to_string(),
            VenueError::PortalNotFound(_) => "Portal not found".to_string(),
            VenueError::SessionNotFound(_) => "Session not found".to_string(),
            VenueError::Authorization(msg)
            | VenueError::Conflict(msg)
            | VenueError::Precondition(msg)
            | VenueError::InvalidInput(msg) => msg.clone(),
        }
    }

    /// Error class name, used as a bounded metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            VenueError::Authorization(_) => "authorization",
            VenueError::VenueNotFound(_)
            | VenueError::CameraNotFound(_)
            | VenueError::PortalNotFound(_)
            | VenueError::SessionNotFound(_) => "not_found",
            VenueError::Conflict(_) => "conflict",
            VenueError::Precondition(_) => "precondition",
            VenueError::Store(_) | VenueError::Media(_) => "collaborator",
            VenueError::InvalidInput(_) => "invalid_input",
            VenueError::Config(_) | VenueError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for VenueError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return VenueError::Conflict("An entry with that name already exists".to_string());
            }
        }
        VenueError::Store(err.to_string())
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        VenueError::Media(err.to_string())
    }
}

impl From<serde_json::Error> for VenueError {
    fn from(err: serde_json::Error) -> Self {
        VenueError::InvalidInput(format!("Malformed payload: {err}"))
    }
}
