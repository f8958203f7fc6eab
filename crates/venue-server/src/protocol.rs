//! Wire frames for the client connection.
//!
//! Every frame is a JSON object tagged by `type`:
//!
//! ```json
//! {"type": "request",  "id": "7", "subject": "camera.join", "data": {...}}
//! {"type": "response", "id": "7", "subject": "camera.join", "wasSuccess": true, "data": {...}}
//! {"type": "response", "id": "8", "subject": "venue.delete", "wasSuccess": false, "message": "..."}
//! {"type": "message",  "id": "3", "subject": "venue.state", "data": {...}}
//! {"type": "message",  "subject": "consumerClosed", "data": {...}}
//! ```
//!
//! Messages carrying an `id` belong to the subscription opened by the request
//! with that id; messages without one are events.

use crate::errors::VenueError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest accepted correlation id.
pub const MAX_REQUEST_ID_LEN: usize = 64;

/// Largest accepted inbound frame.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Request {
        id: String,
        subject: String,
        #[serde(default)]
        data: Value,
    },
    Response {
        id: String,
        subject: String,
        #[serde(rename = "wasSuccess")]
        was_success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default)]
        data: Value,
    },
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        subject: String,
        #[serde(default)]
        data: Value,
    },
}

impl Frame {
    #[must_use]
    pub fn success(id: String, subject: String, data: Value) -> Self {
        Frame::Response {
            id,
            subject,
            was_success: true,
            message: None,
            data,
        }
    }

    /// Failure response carrying the client-safe message of `error`.
    #[must_use]
    pub fn failure(id: String, subject: String, error: &VenueError) -> Self {
        Frame::Response {
            id,
            subject,
            was_success: false,
            message: Some(error.client_message()),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn event(subject: &str, data: Value) -> Self {
        Frame::Message {
            id: None,
            subject: subject.to_string(),
            data,
        }
    }

    #[must_use]
    pub fn push(subscription_id: String, subject: &str, data: Value) -> Self {
        Frame::Message {
            id: Some(subscription_id),
            subject: subject.to_string(),
            data,
        }
    }
}

/// An inbound request after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: String,
    pub subject: String,
    pub data: Value,
}

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    TooLarge,
    Malformed,
    MissingId,
    NotARequest,
}

impl Violation {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Violation::TooLarge => "too_large",
            Violation::Malformed => "malformed",
            Violation::MissingId => "missing_id",
            Violation::NotARequest => "not_a_request",
        }
    }
}

/// Parse an inbound text frame into a request.
///
/// Only requests are accepted from clients; everything else is a violation.
pub fn parse_request(text: &str) -> Result<Request, Violation> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(Violation::TooLarge);
    }
    let value: Value = serde_json::from_str(text).map_err(|_| Violation::Malformed)?;

    // Distinguish a missing id from other shape errors before typed parsing.
    if value.get("type").and_then(Value::as_str) == Some("request") {
        match value.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN => {}
            _ => return Err(Violation::MissingId),
        }
    }

    match serde_json::from_value::<Frame>(value) {
        Ok(Frame::Request { id, subject, data }) => Ok(Request { id, subject, data }),
        Ok(_) => Err(Violation::NotARequest),
        Err(_) => Err(Violation::Malformed),
    }
}
