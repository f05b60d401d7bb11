//! Wrapping decision for a buffered response.
//!
//! # Decision order
//! ```text
//! 204 No Content             → pass through
//! non-JSON content type      → pass through
//! 2xx                        → success path
//!     blank body             → Ok(null)
//!     malformed JSON         → pass through
//!     already an envelope    → pass through
//!     otherwise              → Ok(parsed)
//! >= 400                     → failure path
//!     blank body             → Fail(default message)
//!     otherwise              → pass through
//! anything else (1xx, 3xx)   → pass through
//! ```
//!
//! Everything in here is pure; the interceptor owns I/O and logging.

use axum::http::StatusCode;
use serde_json::Value;

use crate::envelope::is_envelope;

const UTF8_BOM: &str = "\u{feff}";

/// Why a response was forwarded unmodified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    NoContent,
    NonJsonContentType,
    UnwrappedStatus,
    MalformedJson,
    AlreadyWrapped,
    ErrorBodyPresent,
    Oversized,
}

impl PassReason {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PassReason::NoContent => "no_content",
            PassReason::NonJsonContentType => "non_json_content_type",
            PassReason::UnwrappedStatus => "unwrapped_status",
            PassReason::MalformedJson => "malformed_json",
            PassReason::AlreadyWrapped => "already_wrapped",
            PassReason::ErrorBodyPresent => "error_body_present",
            PassReason::Oversized => "oversized",
        }
    }
}

/// Outcome of the wrapping decision. Exactly one per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    PassThrough(PassReason),
    /// Wrap as a success envelope with the parsed body as data.
    WrapSuccess(Option<Value>),
    /// Wrap as a failure envelope with the default message.
    WrapFailure,
}

impl Disposition {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::PassThrough(reason) => reason.as_str(),
            Disposition::WrapSuccess(_) => "wrap_success",
            Disposition::WrapFailure => "wrap_failure",
        }
    }
}

/// Decide how to shape a response from its status, content type and body.
pub fn decide(status: StatusCode, content_type: Option<&str>, body: &[u8]) -> Disposition {
    if status == StatusCode::NO_CONTENT {
        return Disposition::PassThrough(PassReason::NoContent);
    }

    if !is_json_content_type(content_type) {
        return Disposition::PassThrough(PassReason::NonJsonContentType);
    }

    if status.is_success() {
        return decide_success(body);
    }

    if status.as_u16() >= 400 {
        return decide_failure(body);
    }

    Disposition::PassThrough(PassReason::UnwrappedStatus)
}

fn decide_success(body: &[u8]) -> Disposition {
    if is_blank(body) {
        return Disposition::WrapSuccess(None);
    }

    let Some(value) = parse_json(body) else {
        return Disposition::PassThrough(PassReason::MalformedJson);
    };

    if is_envelope(&value) {
        return Disposition::PassThrough(PassReason::AlreadyWrapped);
    }

    Disposition::WrapSuccess(Some(value).filter(|value| !value.is_null()))
}

fn decide_failure(body: &[u8]) -> Disposition {
    if is_blank(body) {
        Disposition::WrapFailure
    } else {
        Disposition::PassThrough(PassReason::ErrorBodyPresent)
    }
}

/// Whether a content type is eligible for wrapping.
///
/// A missing or blank content type is eligible. Otherwise the value must
/// mention `application/json` or a `+json` structured suffix.
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type.map(str::trim).filter(|ct| !ct.is_empty()) else {
        return true;
    };

    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("application/json") || lowered.contains("+json")
}

/// Whether a body is empty or whitespace-only text.
///
/// A leading UTF-8 byte order mark is ignored. Bytes that are not valid
/// UTF-8 are never blank.
pub fn is_blank(body: &[u8]) -> bool {
    match std::str::from_utf8(body) {
        Ok(text) => strip_bom(text).trim().is_empty(),
        Err(_) => false,
    }
}

fn parse_json(body: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(body).ok()?;
    serde_json::from_str(strip_bom(text)).ok()
}

fn strip_bom(text: &str) -> &str {
    text.strip_prefix(UTF8_BOM).unwrap_or(text)
}
