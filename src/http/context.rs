//! Per-request context seen by the interceptor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{Method, Request};
use uuid::Uuid;

use crate::http::request::X_REQUEST_ID;

/// Tracks whether any byte of the response has reached the client.
///
/// A fresh handle is inserted into each request's extensions. Handlers that
/// write to the client out of band (for instance after taking over an
/// upgraded connection) must call [`ResponseProgress::mark_started`] first.
#[derive(Debug, Clone, Default)]
pub struct ResponseProgress {
    started: Arc<AtomicBool>,
}

impl ResponseProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the client has started receiving bytes.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

/// Request metadata captured before the inner handler runs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub trace_id: String,
    pub progress: ResponseProgress,
}

impl RequestContext {
    /// Capture the context of `request` and attach a fresh progress handle.
    pub fn attach<B>(request: &mut Request<B>) -> Self {
        let trace_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let progress = ResponseProgress::new();
        request.extensions_mut().insert(progress.clone());

        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            trace_id,
            progress,
        }
    }
}
