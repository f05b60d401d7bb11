//! Response-normalizing HTTP gateway.
//!
//! Every response produced behind the gateway is rewritten into the uniform
//! [`Envelope`] shape `{"success", "message", "data"}`, unless it must be
//! left alone (no content, non-JSON, redirects, error bodies, responses that
//! are already enveloped).

pub mod config;
pub mod envelope;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::GatewayConfig;
pub use envelope::Envelope;
pub use http::{HttpServer, ResponseInterceptorLayer};
pub use lifecycle::Shutdown;
