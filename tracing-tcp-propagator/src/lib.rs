//! W3C trace context propagation over a raw TCP connection.
//!
//! A client starts a `CLIENT` span, injects the current trace context into a
//! block of `key:value` header lines, and sends that block followed by a
//! payload over one TCP connection. The server parses the block, extracts the
//! context and runs its processing inside a `SERVER` span parented to the
//! client span.
//!
//! ```text
//! traceparent:00-<trace-id>-<span-id>-01\n
//! tracestate:\n
//! \n
//! <payload>
//! ```
//!
//! # Modules
//!
//! - [`carrier`]: header map and the W3C inject/extract codec.
//! - [`framing`]: encoding and lenient decoding of wire messages.
//! - [`lifecycle`]: spans that end exactly once.
//! - [`telemetry`]: one-time installation and bounded shutdown of the
//!   tracer provider, and log setup.
//! - [`transport`]: the client, the server and their connection handlers.
//! - [`config`]: settings read from the environment.
//!
//! # Getting started
//!
//! ```no_run
//! use tracing_tcp_propagator::config::{ExporterConfig, TransportConfig};
//! use tracing_tcp_propagator::telemetry::{
//!     ServiceInfo, TracingContext, DEFAULT_ENVIRONMENT, DEFAULT_VERSION, SHUTDOWN_TIMEOUT,
//! };
//! use tracing_tcp_propagator::transport::{Client, CLIENT_TRACER_NAME, GREETING};
//!
//! # #[tokio::main]
//! # async fn main() -> tracing_tcp_propagator::Result<()> {
//! let telemetry = TracingContext::new();
//! telemetry.install(
//!     &ExporterConfig::from_env(),
//!     ServiceInfo::new("client", DEFAULT_ENVIRONMENT, DEFAULT_VERSION),
//! )?;
//!
//! let client = Client::new(
//!     telemetry.codec()?,
//!     telemetry.lifecycle(CLIENT_TRACER_NAME)?,
//!     TransportConfig::from_env().server_addr,
//! );
//! client.send(GREETING).await?;
//!
//! telemetry.shutdown(SHUTDOWN_TIMEOUT).await
//! # }
//! ```
pub mod carrier;
pub mod config;
pub mod error;
pub mod framing;
pub mod lifecycle;
pub mod telemetry;
pub mod transport;

pub use carrier::{CarrierMap, ContextCodec};
pub use error::{Error, LifecycleError, Result, TransportError};
pub use framing::{Decoded, HeaderBlock, WireMessage};
pub use lifecycle::{ManagedSpan, SpanLifecycle, SpanState};
pub use telemetry::{ServiceInfo, TracingContext};
