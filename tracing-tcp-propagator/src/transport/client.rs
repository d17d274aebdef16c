use crate::carrier::ContextCodec;
use crate::error::{Result, TransportError};
use crate::framing::WireMessage;
use crate::lifecycle::SpanLifecycle;
use bytes::Bytes;
use opentelemetry::trace::{SpanContext, SpanKind};
use opentelemetry::Context;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info};

/// Name of the span covering one send.
pub const CLIENT_SPAN_NAME: &str = "client-send";
/// Name of the tracer the client starts spans from.
pub const CLIENT_TRACER_NAME: &str = "tcp-client";
/// Payload sent by the bundled client.
pub const GREETING: &str = "Hello from the Client";

/// Sends one framed message per connection, carrying the current trace.
#[derive(Clone, Debug)]
pub struct Client {
    codec: ContextCodec,
    lifecycle: SpanLifecycle,
    target: String,
}

impl Client {
    /// Create a client that connects to `target` (`host:port`).
    pub fn new(codec: ContextCodec, lifecycle: SpanLifecycle, target: impl Into<String>) -> Self {
        Client {
            codec,
            lifecycle,
            target: target.into(),
        }
    }

    /// Address this client connects to.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Send `payload` in a client span that is a child of the current span,
    /// or a new trace root when there is none.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<SpanContext> {
        let parent = Context::current();
        self.send_with_parent(&parent, payload).await
    }

    /// Connect, send `payload` with the trace headers of a new client span
    /// under `parent`, and close the connection.
    ///
    /// The span is ended before this returns, and marked as an error when
    /// delivery fails. Returns the identifiers of that span.
    pub async fn send_with_parent(
        &self,
        parent: &Context,
        payload: impl Into<Bytes>,
    ) -> Result<SpanContext> {
        let payload = payload.into();
        let mut span = self
            .lifecycle
            .start(CLIENT_SPAN_NAME, SpanKind::Client, parent);
        let span_context = span.span_context();
        let cx = span.activate_context()?;

        info!(
            name: "ClientSpanStarted",
            trace_id = %span_context.trace_id(),
            span_id = %span_context.span_id(),
            target = %self.target,
        );

        let delivered = self.deliver(&cx, payload).await;
        if let Err(err) = &delivered {
            span.record_error(err);
            error!(
                name: "SendFailed",
                trace_id = %span_context.trace_id(),
                span_id = %span_context.span_id(),
                error = %err,
            );
        }
        span.end()?;

        delivered.map(|()| span_context)
    }

    async fn deliver(&self, cx: &Context, payload: Bytes) -> Result<()> {
        let carrier = self.codec.inject(cx);
        debug!(name: "ContextInjected", headers = ?carrier);
        let frame = WireMessage::new(carrier, payload).encode();

        let mut stream = TcpStream::connect(&self.target)
            .await
            .map_err(|source| TransportError::Connect {
                addr: self.target.clone(),
                source,
            })?;
        let peer = stream
            .peer_addr()
            .map_or_else(|_| self.target.clone(), |addr| addr.to_string());

        let written = async {
            stream.write_all(&frame).await?;
            stream.flush().await?;
            stream.shutdown().await
        }
        .await;
        written.map_err(|source| TransportError::Write {
            peer: peer.clone(),
            source,
        })?;

        info!(name: "MessageSent", %peer, bytes = frame.len());
        Ok(())
    }
}
