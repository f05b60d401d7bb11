//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Connection (net/)
//!     → server.rs (service stack, connection serving)
//!     → request.rs (x-request-id assigned and echoed)
//!     → interceptor.rs (buffer, decide, shape, log)
//!         → context.rs (per-request metadata and started flag)
//!         → upstream.rs (inner handlers)
//!         → buffer.rs (capture inner body)
//!         → disposition.rs (pass through or wrap)
//!     → Send to client
//! ```

pub mod buffer;
pub mod context;
pub mod disposition;
pub mod interceptor;
pub mod request;
pub mod server;
pub mod upstream;

pub use context::{RequestContext, ResponseProgress};
pub use disposition::{decide, Disposition, PassReason};
pub use interceptor::{HandlerFault, ResponseInterceptor, ResponseInterceptorLayer};
pub use request::X_REQUEST_ID;
pub use server::{GatewayService, HttpServer, ServerError};
