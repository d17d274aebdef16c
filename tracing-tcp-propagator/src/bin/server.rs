use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_tcp_propagator::config::{ExporterConfig, TransportConfig};
use tracing_tcp_propagator::telemetry::{
    init_logging, ServiceInfo, TracingContext, DEFAULT_ENVIRONMENT, DEFAULT_VERSION,
    SHUTDOWN_TIMEOUT,
};
use tracing_tcp_propagator::transport::{
    LogPayload, LoggingHandler, Pipeline, Server, TracingHandler, SERVER_TRACER_NAME,
};

async fn run(telemetry: &TracingContext) -> tracing_tcp_propagator::Result<()> {
    telemetry.install(
        &ExporterConfig::from_env(),
        ServiceInfo::new("server", DEFAULT_ENVIRONMENT, DEFAULT_VERSION),
    )?;

    let codec = telemetry.codec()?;
    let lifecycle = telemetry.lifecycle(SERVER_TRACER_NAME)?;
    let listen_addr = TransportConfig::from_env().listen_addr;

    let server = Server::bind(&listen_addr, move || {
        Pipeline::new()
            .add_last(LoggingHandler)
            .add_last(TracingHandler::new(codec.clone(), lifecycle.clone(), LogPayload))
    })
    .await?;

    server
        .serve_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!(name: "ShutdownSignalReceived", message = "stopping server"),
                Err(err) => warn!(name: "ShutdownSignalFailed", error = %err),
            }
        })
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        eprintln!("{err}");
    }

    let telemetry = TracingContext::new();
    let outcome = run(&telemetry).await;

    if let Err(err) = telemetry.shutdown(SHUTDOWN_TIMEOUT).await {
        error!(name: "TelemetryShutdownFailed", error = %err);
    }

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(name: "ServerFailed", error = %err);
            ExitCode::FAILURE
        }
    }
}
