//! Response normalization middleware.
//!
//! # Data Flow
//! ```text
//! request
//!     → log start, attach RequestContext
//!     → inner handler (output drained into a private buffer)
//!     → disposition.rs decides: pass through | wrap success | wrap failure
//!     → decided bytes handed to the connection
//!     → log completion (exactly once, on every path)
//!
//! inner handler faults (Err, panic, body error, deadline):
//!     nothing sent yet   → 500 (408 on deadline) + failure envelope
//!     already streaming  → fault re-raised to the connection, which aborts
//! ```
//!
//! # Design Decisions
//! - No state is shared between requests; buffer, timer and decision live
//!   in the request's future and are dropped with it
//! - The deadline covers the handler and the body drain together
//! - The "already started" signal is read once, when the fault surfaces
//! - Fault detail is logged but never written to the client

use std::any::Any;
use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody};
use axum::http::{header, Request, Response, StatusCode};
use bytes::Bytes;
use futures_util::FutureExt;
use tower::{BoxError, Layer, Service};
use tracing::Instrument;

use crate::config::EnvelopeConfig;
use crate::envelope::{Envelope, DEFAULT_ERROR_MESSAGE};
use crate::http::buffer::{self, BufferError, BufferedResponse, Captured};
use crate::http::context::RequestContext;
use crate::http::disposition::{decide, Disposition, PassReason};
use crate::observability::metrics;

/// Fault raised by the inner handler instead of a response.
#[derive(Debug, thiserror::Error)]
pub enum HandlerFault {
    #[error("inner handler failed: {0}")]
    Service(#[source] BoxError),

    #[error("inner handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Body(#[from] BufferError),

    #[error("inner handler exceeded deadline of {0:?}")]
    Deadline(Duration),
}

/// Installs [`ResponseInterceptor`] around a service.
#[derive(Debug, Clone, Default)]
pub struct ResponseInterceptorLayer {
    config: EnvelopeConfig,
    deadline: Option<Duration>,
}

impl ResponseInterceptorLayer {
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config, deadline: None }
    }

    /// Bound the time to produce and drain a response.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl<S> Layer<S> for ResponseInterceptorLayer {
    type Service = ResponseInterceptor<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseInterceptor {
            inner,
            config: self.config.clone(),
            deadline: self.deadline,
        }
    }
}

/// Rewrites every response of the wrapped service into an [`Envelope`]
/// where appropriate, and converts handler faults into failure envelopes.
#[derive(Debug, Clone)]
pub struct ResponseInterceptor<S> {
    inner: S,
    config: EnvelopeConfig,
    deadline: Option<Duration>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ResponseInterceptor<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send + 'static,
    ResBody: HttpBody<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let started_at = Instant::now();
        let ctx = RequestContext::attach(&mut req);
        let span = tracing::info_span!(
            "request",
            method = %ctx.method,
            path = %ctx.path,
            trace_id = %ctx.trace_id,
        );

        span.in_scope(|| {
            tracing::info!(
                method = %ctx.method,
                path = %ctx.path,
                trace_id = %ctx.trace_id,
                "Request started"
            );
        });

        let limit = self.config.max_buffer_bytes;
        let deadline = self.deadline;
        let fut = self.inner.call(req);

        Box::pin(process(ctx, fut, limit, deadline, started_at).instrument(span))
    }
}

async fn process<F, E, B>(
    ctx: RequestContext,
    inner: F,
    limit: Option<usize>,
    deadline: Option<Duration>,
    started_at: Instant,
) -> Result<Response<Body>, BoxError>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: Into<BoxError>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let outcome = AssertUnwindSafe(run_within(deadline, run_inner(inner, limit)))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerFault::Panic(panic_message(&*panic))));

    let (result, disposition) = match outcome {
        Ok(Captured::Buffered(buffered)) => {
            let (response, label) = shape(buffered);
            (Ok(response), label)
        }
        Ok(Captured::Streaming(response)) => {
            tracing::debug!("Response exceeds buffer limit. Streaming without wrapping.");
            (Ok(response), PassReason::Oversized.as_str())
        }
        Err(fault) => handle_fault(&ctx, fault),
    };

    let elapsed = started_at.elapsed();
    log_completion(&ctx, &result, disposition, elapsed);
    metrics::record_request(
        &ctx.method,
        result.as_ref().map(|response| response.status().as_u16()).ok(),
        disposition,
        elapsed,
    );

    result
}

/// Await the inner handler and drain its body into the private buffer.
async fn run_inner<F, E, B>(inner: F, limit: Option<usize>) -> Result<Captured, HandlerFault>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: Into<BoxError>,
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let response = inner
        .await
        .map_err(|e| HandlerFault::Service(e.into()))?
        .map(Body::new);

    Ok(buffer::capture(response, limit).await?)
}

async fn run_within<F>(deadline: Option<Duration>, fut: F) -> Result<Captured, HandlerFault>
where
    F: Future<Output = Result<Captured, HandlerFault>>,
{
    let Some(deadline) = deadline else {
        return fut.await;
    };

    tokio::time::timeout(deadline, fut)
        .await
        .unwrap_or(Err(HandlerFault::Deadline(deadline)))
}

/// Apply the wrapping decision to a buffered response.
fn shape(buffered: BufferedResponse) -> (Response<Body>, &'static str) {
    let content_type = buffered.content_type().map(Cow::into_owned);
    let disposition = decide(buffered.status(), content_type.as_deref(), buffered.body());
    let label = disposition.label();

    let response = match disposition {
        Disposition::PassThrough(reason) => {
            tracing::debug!(
                reason = reason.as_str(),
                status = buffered.status().as_u16(),
                content_type = content_type.as_deref().unwrap_or("none"),
                "Skipping wrapping"
            );
            buffered.pass_through()
        }
        Disposition::WrapSuccess(data) => {
            tracing::debug!(has_data = data.is_some(), "Wrapping successful response");
            buffered.wrap(&Envelope::ok_default(data))
        }
        Disposition::WrapFailure => {
            tracing::debug!("Empty error response. Wrapping with default message.");
            buffered.wrap(&Envelope::fail(DEFAULT_ERROR_MESSAGE))
        }
    };

    (response, label)
}

fn handle_fault(
    ctx: &RequestContext,
    fault: HandlerFault,
) -> (Result<Response<Body>, BoxError>, &'static str) {
    let started = ctx.progress.has_started();

    if started {
        tracing::warn!(error = %fault, "Response already started. Re-raising fault.");
        return (Err(fault.into()), "fault_reraised");
    }

    let status = match fault {
        HandlerFault::Deadline(_) => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!(error = %fault, status = status.as_u16(), "Unhandled fault. Returning failure response.");
    let response = buffer::envelope_response(status, &Envelope::fail(DEFAULT_ERROR_MESSAGE));
    (Ok(response), "fault_recovered")
}

fn log_completion(
    ctx: &RequestContext,
    result: &Result<Response<Body>, BoxError>,
    disposition: &'static str,
    elapsed: Duration,
) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

    match result {
        Ok(response) => {
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("unknown");
            tracing::info!(
                method = %ctx.method,
                path = %ctx.path,
                trace_id = %ctx.trace_id,
                status = response.status().as_u16(),
                elapsed_ms,
                content_type,
                disposition,
                "Request completed"
            );
        }
        Err(_) => {
            tracing::info!(
                method = %ctx.method,
                path = %ctx.path,
                trace_id = %ctx.trace_id,
                status = "aborted",
                elapsed_ms,
                content_type = "unknown",
                disposition,
                "Request completed"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
