use super::{Connection, ConnectionHandler};
use crate::carrier::ContextCodec;
use crate::error::{Error, Result};
use crate::framing::{self, Decoded, HeaderBlock};
use crate::lifecycle::SpanLifecycle;
use bytes::Bytes;
use opentelemetry::trace::{SpanKind, TraceContextExt};
use opentelemetry::Context;
use tracing::{debug, error, info, warn};

/// Name of the span covering the handling of one received message.
pub const SERVER_SPAN_NAME: &str = "server-receive";
/// Name of the tracer the server starts spans from.
pub const SERVER_TRACER_NAME: &str = "tcp-server";

/// Business logic run on a received payload.
///
/// Runs synchronously inside the read event, with the server span current.
/// `cx` is that same context.
pub trait MessageProcessor: Send {
    /// Handle `payload`. Replies can be queued on `conn`.
    fn process(&mut self, conn: &mut Connection, payload: &Bytes, cx: &Context) -> Result<()>;
}

/// Logs the payload and does nothing else.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPayload;

impl MessageProcessor for LogPayload {
    fn process(&mut self, conn: &mut Connection, payload: &Bytes, _cx: &Context) -> Result<()> {
        if payload.is_empty() {
            info!(name: "PayloadMissing", peer = %conn.peer(), message = "message payload is missing");
        } else {
            info!(
                name: "PayloadReceived",
                peer = %conn.peer(),
                payload = %String::from_utf8_lossy(payload),
            );
        }
        Ok(())
    }
}

/// Logs connection events.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHandler;

impl ConnectionHandler for LoggingHandler {
    fn on_data(&mut self, conn: &mut Connection, data: &Bytes) -> Result<()> {
        debug!(name: "DataReceived", peer = %conn.peer(), bytes = data.len());
        Ok(())
    }

    fn on_error(&mut self, conn: &Connection, err: &Error) {
        error!(name: "ConnectionFailed", peer = %conn.peer(), error = %err);
    }
}

/// Decodes each read event, continues the sender's trace and runs a
/// [`MessageProcessor`] inside a server span.
#[derive(Debug)]
pub struct TracingHandler<P> {
    codec: ContextCodec,
    lifecycle: SpanLifecycle,
    processor: P,
}

impl<P: MessageProcessor> TracingHandler<P> {
    /// Create a handler whose server spans come from `lifecycle`.
    pub fn new(codec: ContextCodec, lifecycle: SpanLifecycle, processor: P) -> Self {
        TracingHandler {
            codec,
            lifecycle,
            processor,
        }
    }
}

impl<P: MessageProcessor> ConnectionHandler for TracingHandler<P> {
    fn on_data(&mut self, conn: &mut Connection, data: &Bytes) -> Result<()> {
        let Decoded {
            message,
            header_block,
        } = framing::decode(data.clone());

        match header_block {
            HeaderBlock::Missing => {
                warn!(name: "HeaderBlockMissing", peer = %conn.peer(), bytes = data.len(), message = "no header block; treating the whole message as payload");
            }
            HeaderBlock::Present { skipped_lines } if skipped_lines > 0 => {
                warn!(name: "HeaderLinesSkipped", peer = %conn.peer(), skipped_lines);
            }
            HeaderBlock::Present { .. } => {}
        }

        let parent_cx = self.codec.extract(&message.carrier);
        let parent = parent_cx.span().span_context().clone();
        if parent.is_valid() {
            info!(
                name: "TraceContextExtracted",
                peer = %conn.peer(),
                trace_id = %parent.trace_id(),
                span_id = %parent.span_id(),
            );
        } else {
            warn!(name: "TraceContextMissing", peer = %conn.peer(), message = "no valid trace context; starting a new trace");
        }

        let processor = &mut self.processor;
        self.lifecycle.in_span(SERVER_SPAN_NAME, SpanKind::Server, &parent_cx, |cx| {
            let result = processor.process(conn, &message.payload, cx);
            if let Err(err) = &result {
                let span_context = cx.span().span_context().clone();
                error!(
                    name: "MessageProcessingFailed",
                    trace_id = %span_context.trace_id(),
                    span_id = %span_context.span_id(),
                    error = %err,
                );
            }
            result
        })
    }
}
