//! Process configuration read once from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `OTEL_EXPORTER_TYPE` (`http` or `grpc`) | `grpc` |
//! | `OTEL_EXPORTER_OTLP_HTTP_ENDPOINT` | `http://collector:4318/v1/traces` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://collector:4317` |
//! | `TCP_PROPAGATION_SERVER_ADDR` | `server:8080` |
//! | `TCP_PROPAGATION_LISTEN_ADDR` | `0.0.0.0:8080` |
//!
//! Empty values count as unset.
use std::env;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Selects the OTLP transport.
pub const OTEL_EXPORTER_TYPE: &str = "OTEL_EXPORTER_TYPE";
/// OTLP/HTTP traces endpoint.
pub const OTEL_EXPORTER_OTLP_HTTP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_HTTP_ENDPOINT";
/// Default OTLP/HTTP traces endpoint.
pub const OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT: &str = "http://collector:4318/v1/traces";
/// OTLP/gRPC endpoint.
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Default OTLP/gRPC endpoint.
pub const OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT: &str = "http://collector:4317";
/// Address the client connects to.
pub const TCP_PROPAGATION_SERVER_ADDR: &str = "TCP_PROPAGATION_SERVER_ADDR";
/// Default address the client connects to.
pub const TCP_PROPAGATION_SERVER_ADDR_DEFAULT: &str = "server:8080";
/// Address the server listens on.
pub const TCP_PROPAGATION_LISTEN_ADDR: &str = "TCP_PROPAGATION_LISTEN_ADDR";
/// Default address the server listens on.
pub const TCP_PROPAGATION_LISTEN_ADDR_DEFAULT: &str = "0.0.0.0:8080";

/// Transport used to push spans to the collector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExporterProtocol {
    /// OTLP over HTTP with protobuf bodies.
    Http,
    /// OTLP over gRPC.
    #[default]
    Grpc,
}

impl FromStr for ExporterProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ExporterProtocol::Http),
            "grpc" => Ok(ExporterProtocol::Grpc),
            other => Err(format!("unknown exporter type `{other}`")),
        }
    }
}

impl fmt::Display for ExporterProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExporterProtocol::Http => f.write_str("http"),
            ExporterProtocol::Grpc => f.write_str("grpc"),
        }
    }
}

/// Span exporter selection and endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExporterConfig {
    /// Selected transport.
    pub protocol: ExporterProtocol,
    /// Endpoint used when `protocol` is [`ExporterProtocol::Http`].
    pub http_endpoint: String,
    /// Endpoint used when `protocol` is [`ExporterProtocol::Grpc`].
    pub grpc_endpoint: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            protocol: ExporterProtocol::default(),
            http_endpoint: OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT.to_owned(),
            grpc_endpoint: OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT.to_owned(),
        }
    }
}

impl ExporterConfig {
    /// Read the exporter settings from the environment.
    ///
    /// An unrecognized exporter type logs a warning and selects gRPC.
    pub fn from_env() -> Self {
        let protocol = match env_value(OTEL_EXPORTER_TYPE) {
            Some(value) => value.parse().unwrap_or_else(|err: String| {
                warn!(name: "ExporterTypeInvalid", reason = %err, fallback = %ExporterProtocol::Grpc);
                ExporterProtocol::Grpc
            }),
            None => ExporterProtocol::default(),
        };

        ExporterConfig {
            protocol,
            http_endpoint: env_value(OTEL_EXPORTER_OTLP_HTTP_ENDPOINT)
                .unwrap_or_else(|| OTEL_EXPORTER_OTLP_HTTP_ENDPOINT_DEFAULT.to_owned()),
            grpc_endpoint: env_value(OTEL_EXPORTER_OTLP_ENDPOINT)
                .unwrap_or_else(|| OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT.to_owned()),
        }
    }

    /// Endpoint for the selected transport.
    pub fn endpoint(&self) -> &str {
        match self.protocol {
            ExporterProtocol::Http => &self.http_endpoint,
            ExporterProtocol::Grpc => &self.grpc_endpoint,
        }
    }
}

/// Socket addresses for the two roles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Where the client connects.
    pub server_addr: String,
    /// Where the server listens.
    pub listen_addr: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            server_addr: TCP_PROPAGATION_SERVER_ADDR_DEFAULT.to_owned(),
            listen_addr: TCP_PROPAGATION_LISTEN_ADDR_DEFAULT.to_owned(),
        }
    }
}

impl TransportConfig {
    /// Read the socket addresses from the environment.
    pub fn from_env() -> Self {
        TransportConfig {
            server_addr: env_value(TCP_PROPAGATION_SERVER_ADDR)
                .unwrap_or_else(|| TCP_PROPAGATION_SERVER_ADDR_DEFAULT.to_owned()),
            listen_addr: env_value(TCP_PROPAGATION_LISTEN_ADDR)
                .unwrap_or_else(|| TCP_PROPAGATION_LISTEN_ADDR_DEFAULT.to_owned()),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
