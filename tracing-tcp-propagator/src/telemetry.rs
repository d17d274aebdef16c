//! # Tracing context
//!
//! [`TracingContext`] owns everything the propagation and span layers need:
//! the tracer provider, the propagators and the lifecycle counters. It is
//! created once at process start and handed to the components that inject,
//! extract or start spans. Installation happens at most once per handle.
use crate::carrier::ContextCodec;
use crate::config::{ExporterConfig, ExporterProtocol};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleStats, SpanLifecycle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use std::borrow::Cow;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Upper bound on flushing and shutting down the tracer provider.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Attribute key for the deployment environment.
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
/// Attribute key for the service version.
pub const VERSION: &str = "version";

/// Environment reported by the bundled client and server.
pub const DEFAULT_ENVIRONMENT: &str = "tcptest";
/// Version reported by the bundled client and server.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Identity stamped on every span as fixed attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    /// `service.name`
    pub name: Cow<'static, str>,
    /// `deployment.environment`
    pub environment: Cow<'static, str>,
    /// `version`
    pub version: Cow<'static, str>,
}

impl ServiceInfo {
    /// Create a service identity.
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        environment: impl Into<Cow<'static, str>>,
        version: impl Into<Cow<'static, str>>,
    ) -> Self {
        ServiceInfo {
            name: name.into(),
            environment: environment.into(),
            version: version.into(),
        }
    }

    /// The fixed attribute set.
    pub fn attributes(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new(SERVICE_NAME, self.name.to_string()),
            KeyValue::new(DEPLOYMENT_ENVIRONMENT, self.environment.to_string()),
            KeyValue::new(VERSION, self.version.to_string()),
        ]
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.name.to_string())
            .build()
    }
}

#[derive(Debug)]
struct Installed {
    provider: SdkTracerProvider,
    codec: ContextCodec,
    service: ServiceInfo,
    stats: Arc<LifecycleStats>,
}

/// Handle to the tracing pipeline of this process.
#[derive(Debug, Default)]
pub struct TracingContext {
    installed: OnceLock<Installed>,
}

impl TracingContext {
    /// Create a handle with nothing installed yet.
    pub fn new() -> Self {
        TracingContext::default()
    }

    /// Install an OTLP batch pipeline for `config`.
    ///
    /// Must run inside a Tokio runtime when the gRPC transport is selected.
    /// A second call logs a notice and leaves the first installation in place.
    pub fn install(&self, config: &ExporterConfig, service: ServiceInfo) -> Result<()> {
        if self.is_installed() {
            info!(name: "TracingAlreadyInitialized", service = %service.name, message = "tracing is already initialized");
            return Ok(());
        }

        info!(name: "ExporterSelected", protocol = %config.protocol, endpoint = %config.endpoint());
        let exporter = match config.protocol {
            ExporterProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(config.endpoint())
                .build()?,
            ExporterProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(config.endpoint())
                .build()?,
        };

        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(service.resource())
            .build();

        self.install_with_provider(provider, service)
    }

    /// Install a caller-built provider together with the W3C propagators.
    ///
    /// A second call logs a notice, shuts the rejected provider down and
    /// leaves the first installation in place.
    pub fn install_with_provider(
        &self,
        provider: SdkTracerProvider,
        service: ServiceInfo,
    ) -> Result<()> {
        let candidate = Installed {
            provider,
            codec: ContextCodec::w3c(),
            service,
            stats: Arc::default(),
        };

        match self.installed.set(candidate) {
            Ok(()) => {
                info!(name: "TracingInitialized", message = "tracing initialized");
                Ok(())
            }
            Err(rejected) => {
                info!(name: "TracingAlreadyInitialized", service = %rejected.service.name, message = "tracing is already initialized");
                if let Err(err) = rejected.provider.shutdown() {
                    warn!(name: "RejectedProviderShutdownFailed", error = %err);
                }
                Ok(())
            }
        }
    }

    /// `true` once a pipeline has been installed.
    pub fn is_installed(&self) -> bool {
        self.installed.get().is_some()
    }

    /// Codec for injecting into and extracting from carriers.
    pub fn codec(&self) -> Result<ContextCodec> {
        Ok(self.get()?.codec.clone())
    }

    /// Lifecycle manager whose spans come from a tracer named `tracer_name`.
    pub fn lifecycle(&self, tracer_name: impl Into<Cow<'static, str>>) -> Result<SpanLifecycle> {
        let installed = self.get()?;
        Ok(SpanLifecycle::new(
            installed.provider.tracer(tracer_name),
            &installed.service,
            installed.stats.clone(),
        ))
    }

    /// Flush buffered spans and shut the provider down, waiting at most `timeout`.
    ///
    /// Spans still open at this point are logged; they will not be exported.
    /// When the bound is exceeded the flush keeps running in the background
    /// and [`Error::ShutdownTimeout`] is returned.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let Some(installed) = self.installed.get() else {
            info!(name: "NoTracerProviderToShutdown", message = "no tracer provider to shut down");
            return Ok(());
        };

        let open = installed.stats.open_spans();
        if open > 0 {
            warn!(name: "ShutdownWithOpenSpans", open_spans = open);
        }

        let provider = installed.provider.clone();
        let flush_and_shutdown = tokio::task::spawn_blocking(move || {
            let flushed = provider.force_flush();
            let shut_down = provider.shutdown();
            flushed.and(shut_down)
        });

        match tokio::time::timeout(timeout, flush_and_shutdown).await {
            Ok(Ok(result)) => {
                result?;
                info!(name: "TracingShutdownComplete", message = "telemetry flushed and shut down");
                Ok(())
            }
            Ok(Err(join_err)) => Err(Error::Shutdown(
                opentelemetry_sdk::error::OTelSdkError::InternalFailure(join_err.to_string()),
            )),
            Err(_) => {
                warn!(name: "TracingShutdownTimedOut", timeout_secs = timeout.as_secs());
                Err(Error::ShutdownTimeout(timeout))
            }
        }
    }

    fn get(&self) -> Result<&Installed> {
        self.installed.get().ok_or(Error::NotInitialized)
    }
}

/// Install a `fmt` log subscriber filtered by `RUST_LOG` (default `info`).
///
/// Exporter transports (`hyper`, `tonic`, `h2`, `reqwest`) and the OpenTelemetry
/// crates are limited to warnings.
pub fn init_logging() -> Result<()> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    for directive in [
        "hyper=warn",
        "tonic=warn",
        "h2=warn",
        "reqwest=warn",
        "opentelemetry=warn",
        "opentelemetry_sdk=warn",
    ] {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|err| Error::Logging(format!("{directive}: {err}")))?,
        );
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_names(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|err| Error::Logging(err.to_string()))
}
