//! Inner handlers behind the interceptor.
//!
//! # Responsibilities
//! - Answer the built-in `/health` route
//! - Forward every other request to the configured upstream
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Failures here produce plain status codes with empty bodies; the
//!   interceptor turns those into failure envelopes
//! - The upstream body is streamed into the interceptor's buffer, never
//!   collected here

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::UpstreamConfig;

/// Headers that apply to a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Shared handle to the upstream service.
#[derive(Clone)]
pub struct Upstream {
    authority: Option<Authority>,
    client: Client<HttpConnector, Body>,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let authority = config.address.as_deref().and_then(|address| {
            address
                .parse::<Authority>()
                .inspect_err(|e| tracing::warn!(address, error = %e, "Invalid upstream address"))
                .ok()
        });

        Self { authority, client }
    }
}

/// Liveness probe. Plain text, so it is never enveloped.
pub async fn health() -> &'static str {
    "Healthy"
}

/// Forward the request to the upstream and stream its response back.
pub async fn forward(State(upstream): State<Upstream>, request: Request<Body>) -> Response<Body> {
    let Some(authority) = upstream.authority.clone() else {
        tracing::debug!("No upstream configured");
        return StatusCode::NOT_FOUND.into_response();
    };

    let (mut parts, body) = request.into_parts();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(authority.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build upstream URI");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    strip_hop_by_hop(&mut parts.headers);
    if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
        parts.headers.insert(header::HOST, host);
    }
    // The pooled client speaks HTTP/1.1 to the upstream regardless of the
    // client's protocol.
    parts.version = Version::HTTP_11;

    match upstream.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::warn!(upstream = %authority, error = %e, "Upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
