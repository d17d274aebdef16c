//! Error types shared by the codec, span lifecycle and transport layers.
use opentelemetry_sdk::error::OTelSdkError;
use std::io;
use std::time::Duration;

/// Top level error returned by this crate.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Propagation or tracing was used before [`TracingContext::install`] ran.
    ///
    /// [`TracingContext::install`]: crate::telemetry::TracingContext::install
    #[error("tracing is not initialized; install the tracing context first")]
    NotInitialized,

    /// The OTLP span exporter could not be built.
    #[error("failed to build span exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A socket level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A span was used after it ended.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A message processor rejected a payload.
    #[error("message processing failed: {0}")]
    Processing(String),

    /// Flushing or shutting down the tracer provider failed.
    #[error("telemetry shutdown failed: {0}")]
    Shutdown(#[from] OTelSdkError),

    /// Flush and shutdown did not finish within the bound.
    #[error("telemetry shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The log subscriber could not be installed.
    #[error("failed to install log subscriber: {0}")]
    Logging(String),
}

/// Failures on a single connection attempt.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Could not open the outbound connection.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Target address as configured.
        addr: String,
        /// Underlying socket error.
        source: io::Error,
    },

    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested listen address.
        addr: String,
        /// Underlying socket error.
        source: io::Error,
    },

    /// Accepting an inbound connection failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Reading from a connected socket failed.
    #[error("failed to read from {peer}: {source}")]
    Read {
        /// Remote end of the connection.
        peer: String,
        /// Underlying socket error.
        source: io::Error,
    },

    /// Writing, flushing or closing a connected socket failed.
    #[error("failed to write to {peer}: {source}")]
    Write {
        /// Remote end of the connection.
        peer: String,
        /// Underlying socket error.
        source: io::Error,
    },
}

/// Misuse of a span after it reached its terminal state.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LifecycleError {
    /// `end` was called on a span that had already ended.
    #[error("span `{0}` was ended more than once")]
    AlreadyEnded(String),

    /// A span was made current after it ended.
    #[error("span `{0}` was activated after it ended")]
    ActivatedAfterEnd(String),
}

/// Crate wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
