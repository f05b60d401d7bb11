//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Create the Axum router with the inner handlers
//! - Wrap it in the service stack (request ID, response interceptor)
//! - Serve HTTP/1.1 and HTTP/2 connections from the bounded listener
//! - Drain connections gracefully on shutdown
//!
//! # Service Stack
//! ```text
//! SetRequestId → PropagateRequestId → ResponseInterceptor → Router
//!                                                           ├─ /health
//!                                                           └─ fallback: upstream forward
//! ```
//!
//! The interceptor's fault re-raise surfaces here as a service error; hyper
//! then aborts the affected connection.

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestId, SetRequestId};

use crate::config::GatewayConfig;
use crate::http::interceptor::{ResponseInterceptor, ResponseInterceptorLayer};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::upstream::{forward, health, Upstream};
use crate::lifecycle::ShutdownSignal;
use crate::net::{ConnectionTracker, Listener, ListenerError};

/// Complete per-request service stack.
pub type GatewayService = SetRequestId<PropagateRequestId<ResponseInterceptor<Router>>, MakeRequestUuid>;

/// Error type for the serving loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// HTTP server for the gateway.
pub struct HttpServer {
    service: GatewayService,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let upstream = Upstream::new(&config.upstream);
        let router = Self::build_router(upstream);

        let service = ServiceBuilder::new()
            .layer(set_request_id_layer())
            .layer(propagate_request_id_layer())
            .layer(
                ResponseInterceptorLayer::new(config.envelope.clone())
                    .with_deadline(Duration::from_secs(config.timeouts.request_secs)),
            )
            .service(router);

        Self { service, config }
    }

    /// Build the Axum router.
    fn build_router(upstream: Upstream) -> Router {
        Router::new()
            .route("/health", get(health))
            .fallback(forward)
            .with_state(upstream)
    }

    /// Serve connections from `listener` until `shutdown` fires, then wait
    /// for in-flight connections to drain.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let tracker = ConnectionTracker::new();
        let builder = auto::Builder::new(TokioExecutor::new());

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => break,
            };

            let (stream, peer_addr, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let guard = tracker.track();
            let service = TowerToHyperService::new(self.service.clone());
            let builder = builder.clone();
            let mut conn_shutdown = shutdown.clone();

            tokio::spawn(async move {
                let _permit = permit;
                let connection_id = guard.id();
                tracing::trace!(%connection_id, peer_addr = %peer_addr, "Serving connection");

                let conn = builder.serve_connection(TokioIo::new(stream), service);
                tokio::pin!(conn);

                let mut draining = false;
                loop {
                    tokio::select! {
                        result = conn.as_mut() => {
                            if let Err(e) = result {
                                tracing::debug!(%connection_id, error = %e, "Connection closed with error");
                            }
                            break;
                        }
                        _ = conn_shutdown.recv(), if !draining => {
                            draining = true;
                            conn.as_mut().graceful_shutdown();
                        }
                    }
                }

                drop(guard);
            });
        }

        tracing::info!(
            active_connections = tracker.active_count(),
            "Stopped accepting connections, draining"
        );

        let grace = Duration::from_secs(self.config.timeouts.shutdown_secs);
        if !tracker.wait_for_drain(grace).await {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Shutdown grace period elapsed with connections still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
