//! Uniform response envelope.
//!
//! Every response the gateway rewrites is serialized as
//! `{"success": bool, "message": string, "data": any | null}`.

use serde::Serialize;
use serde_json::Value;

/// Message attached to every success envelope.
pub const SUCCESS_MESSAGE: &str = "Success";

/// Message attached to failure envelopes the gateway synthesizes itself.
///
/// Internal error detail is never exposed through this message.
pub const DEFAULT_ERROR_MESSAGE: &str = "An unexpected error occurred.";

/// Content type of a serialized envelope.
pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";

const ENVELOPE_KEYS: [&str; 3] = ["success", "message", "data"];

/// Wire contract for wrapped responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    /// Always serialized, as `null` when absent.
    pub data: Option<Value>,
}

impl Envelope {
    /// Successful outcome carrying `data`.
    ///
    /// A JSON `null` payload is normalized to `None`.
    pub fn ok(data: Option<Value>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: data.filter(|value| !value.is_null()),
        }
    }

    /// Successful outcome with the default message.
    pub fn ok_default(data: Option<Value>) -> Self {
        Self::ok(data, SUCCESS_MESSAGE)
    }

    /// Failed outcome. Failure envelopes never carry data.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Serialize the envelope to its wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Whether `value` already has the envelope shape.
///
/// An envelope is a JSON object containing `success`, `message` and `data`
/// keys, compared case-insensitively. Extra keys are allowed.
pub fn is_envelope(value: &Value) -> bool {
    let Value::Object(map) = value else {
        return false;
    };

    ENVELOPE_KEYS
        .iter()
        .all(|key| map.keys().any(|candidate| candidate.eq_ignore_ascii_case(key)))
}
