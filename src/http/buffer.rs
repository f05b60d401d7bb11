//! Per-request response capture.
//!
//! The inner handler's body is drained into memory before any byte reaches
//! the client, so the interceptor can decide on the complete response. The
//! buffer is owned by a single request and dropped when it completes.

use std::borrow::Cow;

use axum::body::Body;
use axum::http::{header, response::Parts, HeaderMap, HeaderValue, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use http_body_util::BodyExt;

use crate::envelope::{Envelope, CONTENT_TYPE};

/// Rendered `Envelope::fail(DEFAULT_ERROR_MESSAGE)`, used if serialization fails.
const FALLBACK_FAILURE_BODY: &[u8] =
    br#"{"success":false,"message":"An unexpected error occurred.","data":null}"#;

/// Error raised while draining the inner response body.
#[derive(Debug, thiserror::Error)]
#[error("failed to read response body: {0}")]
pub struct BufferError(#[source] pub axum::Error);

/// A fully buffered inner response.
#[derive(Debug)]
pub struct BufferedResponse {
    parts: Parts,
    body: Bytes,
}

/// Result of capturing the inner response.
#[derive(Debug)]
pub enum Captured {
    Buffered(BufferedResponse),
    /// Body exceeded the buffer limit. Already-read bytes are replayed ahead
    /// of the unread remainder, so the response is still byte-identical.
    Streaming(Response<Body>),
}

/// Drain `response` into memory, honoring an optional size limit.
pub async fn capture(response: Response<Body>, limit: Option<usize>) -> Result<Captured, BufferError> {
    let (parts, mut body) = response.into_parts();

    if let (Some(limit), Some(declared)) = (limit, declared_length(&parts.headers)) {
        if declared > limit as u64 {
            return Ok(Captured::Streaming(Response::from_parts(parts, body)));
        }
    }

    let mut buffer = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(BufferError)?;
        // Trailers are dropped.
        let Ok(data) = frame.into_data() else {
            continue;
        };
        buffer.extend_from_slice(&data);

        if limit.is_some_and(|limit| buffer.len() > limit) {
            let prefix = buffer.freeze();
            let replay = stream::once(async move { Ok::<_, axum::Error>(prefix) })
                .chain(body.into_data_stream());
            return Ok(Captured::Streaming(Response::from_parts(
                parts,
                Body::from_stream(replay),
            )));
        }
    }

    Ok(Captured::Buffered(BufferedResponse {
        parts,
        body: buffer.freeze(),
    }))
}

impl BufferedResponse {
    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    /// Declared content type, if present.
    ///
    /// Bytes outside visible ASCII are decoded lossily, so an unusual header
    /// still counts as declared.
    pub fn content_type(&self) -> Option<Cow<'_, str>> {
        self.parts
            .headers
            .get(header::CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Forward the captured response unchanged.
    pub fn pass_through(self) -> Response<Body> {
        Response::from_parts(self.parts, Body::from(self.body))
    }

    /// Replace the body with `envelope`, keeping status and other headers.
    pub fn wrap(self, envelope: &Envelope) -> Response<Body> {
        let mut parts = self.parts;
        let body = render(envelope);
        set_envelope_headers(&mut parts.headers, body.len());
        Response::from_parts(parts, Body::from(body))
    }
}

/// Fresh response carrying only `envelope`, with no inherited headers.
pub fn envelope_response(status: StatusCode, envelope: &Envelope) -> Response<Body> {
    let body = render(envelope);
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    set_envelope_headers(response.headers_mut(), body.len());
    *response.body_mut() = Body::from(body);
    response
}

fn render(envelope: &Envelope) -> Bytes {
    match envelope.to_bytes() {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize envelope");
            Bytes::from_static(FALLBACK_FAILURE_BODY)
        }
    }
}

fn set_envelope_headers(headers: &mut HeaderMap, len: usize) {
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONTENT_ENCODING);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
