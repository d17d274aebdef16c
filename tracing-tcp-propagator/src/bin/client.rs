use std::process::ExitCode;
use tracing::{error, info};
use tracing_tcp_propagator::config::{ExporterConfig, TransportConfig};
use tracing_tcp_propagator::telemetry::{
    init_logging, ServiceInfo, TracingContext, DEFAULT_ENVIRONMENT, DEFAULT_VERSION,
    SHUTDOWN_TIMEOUT,
};
use tracing_tcp_propagator::transport::{Client, CLIENT_TRACER_NAME, GREETING};

async fn run(telemetry: &TracingContext) -> tracing_tcp_propagator::Result<()> {
    telemetry.install(
        &ExporterConfig::from_env(),
        ServiceInfo::new("client", DEFAULT_ENVIRONMENT, DEFAULT_VERSION),
    )?;

    let client = Client::new(
        telemetry.codec()?,
        telemetry.lifecycle(CLIENT_TRACER_NAME)?,
        TransportConfig::from_env().server_addr,
    );
    let sent = client.send(GREETING).await?;
    info!(name: "ClientDone", trace_id = %sent.trace_id(), target = %client.target());
    Ok(())
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
            error!(name: "ClientFailed", error = %err);
            ExitCode::FAILURE
        }
    }
}
