//! Request ID handling.
//!
//! # Responsibilities
//! - Generate a UUID `x-request-id` for requests that arrive without one
//! - Echo the request ID back on the response
//! - Forward the ID to the upstream so logs correlate end to end
//!
//! # Design Decisions
//! - Request ID added as early as possible, before the interceptor logs
//! - An ID supplied by the client is kept as-is

use axum::http::HeaderName;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Header carrying the request's trace identifier.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer that assigns a UUID `x-request-id` when the client sent none.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Layer that copies the request's `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}
